// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Power sequencing and link training.

use crate::AccessMode;
use crate::HostStatus;
use crate::Rtd129xPcieHost;
use crate::SpeedMode;
use crate::direct;
use crate::platform::ClockControl;
use crate::platform::Delay;
use crate::platform::GpioOutput;
use crate::platform::HostPlatform;
use crate::platform::RegionKind;
use crate::platform::ResetControl;
use crate::platform::ResetId;
use crate::regs::RegisterIo;
use crate::spec::LINK_CTRL_GEN1;
use crate::spec::LinkStatus;
use crate::spec::ctrl;
use crate::spec::post_link;
use crate::spec::power;
use crate::spec::sys_ctr;
use crate::spec::system;
use crate::spec::window;
use thiserror::Error;

/// Time the endpoint is held in reset through its PERST# GPIO.
const PERST_HOLD_MS: u32 = 100;
/// Settle time after switching to the steady-state access mode.
const MODE_SETTLE_MS: u32 = 50;
/// Delay after each PHY calibration word.
const CALIBRATION_DELAY_MS: u32 = 1;

/// State of the PCIe link.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Not trained, or torn down by a full suspend.
    Down,
    /// Bring-up in progress.
    Training,
    /// The link is up and configuration accesses are possible.
    Up,
    /// Bring-up failed; the bring-up resources have been released.
    Failed,
}

/// Depth of a suspend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerState {
    /// The controller keeps its resources; only the standby registers are
    /// programmed.
    Standby,
    /// Resets are asserted and the clock and GPIO are released. Resume
    /// retrains the link.
    Suspend,
}

/// Errors from attaching the controller or retraining its link.
#[derive(Debug, Error)]
pub enum AttachError {
    /// A register region could not be mapped.
    #[error("failed to map the {0:?} region")]
    MapRegion(RegionKind, #[source] anyhow::Error),
    /// A reset line is missing.
    #[error("failed to get the {} reset", .0.name())]
    Reset(ResetId, #[source] anyhow::Error),
    /// The reference clock is missing.
    #[error("failed to get the reference clock")]
    ClockMissing(#[source] anyhow::Error),
    /// The endpoint reset GPIO could not be requested.
    #[error("failed to request reset gpio {0}")]
    Gpio(u32, #[source] anyhow::Error),
    /// The reference clock could not be enabled.
    #[error("failed to enable the reference clock")]
    ClockEnable(#[source] anyhow::Error),
    /// The link did not come up.
    #[error("link did not come up within {timeout_ms}ms")]
    LinkDown {
        /// The training timeout that expired.
        timeout_ms: u32,
    },
}

impl AttachError {
    /// Maps the error to the status reported to the bus layer.
    pub fn status(&self) -> HostStatus {
        match self {
            AttachError::LinkDown { .. } => HostStatus::NoDevice,
            AttachError::MapRegion(..)
            | AttachError::Reset(..)
            | AttachError::ClockMissing(_)
            | AttachError::Gpio(..)
            | AttachError::ClockEnable(_) => HostStatus::ConfigError,
        }
    }
}

/// The resets, clock and GPIO used to sequence the controller.
pub(crate) struct PowerResources<P: HostPlatform> {
    resets: Vec<(ResetId, P::Reset)>,
    clock: P::Clock,
    clock_enabled: bool,
    gpio: Option<P::Gpio>,
}

impl<P: HostPlatform> PowerResources<P> {
    /// Acquires every power resource and holds the controller in reset.
    pub fn acquire(platform: &mut P, gpio_line: u32) -> Result<Self, AttachError> {
        let gpio = platform
            .request_gpio(gpio_line)
            .map_err(|err| AttachError::Gpio(gpio_line, err))?;
        let clock = platform.clock().map_err(AttachError::ClockMissing)?;
        let resets = ResetId::ALL
            .into_iter()
            .map(|id| {
                platform
                    .reset_control(id)
                    .map(|reset| (id, reset))
                    .map_err(|err| AttachError::Reset(id, err))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut this = Self {
            resets,
            clock,
            clock_enabled: false,
            gpio: Some(gpio),
        };
        this.assert_resets();
        Ok(this)
    }

    fn assert_resets(&mut self) {
        for (_, reset) in &mut self.resets {
            reset.assert();
        }
    }

    fn deassert_resets(&mut self) {
        for (_, reset) in &mut self.resets {
            reset.deassert();
        }
    }

    fn enable_clock(&mut self) -> anyhow::Result<()> {
        let result = self.clock.prepare_enable();
        self.clock_enabled = result.is_ok();
        result
    }

    fn disable_clock(&mut self) {
        self.clock.disable_unprepare();
        self.clock_enabled = false;
    }

    /// Returns the controller to its reset state and releases the GPIO.
    fn release(&mut self) {
        self.assert_resets();
        if self.clock_enabled {
            self.disable_clock();
        }
        self.gpio = None;
    }
}

impl<P: HostPlatform> Rtd129xPcieHost<P> {
    /// Returns the current link state.
    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    /// Brings the controller out of reset and trains the link.
    ///
    /// On timeout the controller is returned to reset and its clock and GPIO
    /// are released.
    pub(crate) fn train_link(&mut self) -> Result<(), AttachError> {
        self.link_state = LinkState::Training;
        tracing::info!(speed = ?self.config.speed_mode, "training PCIe slot 2 link");

        if self.chip.needs_phy_preconfig() {
            self.preconfigure_phy();
        }

        self.power.deassert_resets();
        if let Err(err) = self.power.enable_clock() {
            self.power.disable_clock();
            self.link_state = LinkState::Failed;
            tracing::error!(
                error = err.as_ref() as &dyn std::error::Error,
                "unable to enable reference clock"
            );
            return Err(AttachError::ClockEnable(err));
        }

        self.ctrl.write_u32(ctrl::SYS_CTR, sys_ctr::BASE_MODE);
        if self.config.speed_mode == SpeedMode::Gen1 {
            let link_ctrl = self.ctrl.read_u32(ctrl::LINK_CTRL);
            self.ctrl
                .write_u32(ctrl::LINK_CTRL, (link_ctrl & !0xF) | LINK_CTRL_GEN1);
        }

        for &word in &self.config.phy_calibration {
            self.ctrl.write_u32(ctrl::MDIO_CTR, word);
            self.delay.delay_ms(CALIBRATION_DELAY_MS);
        }

        if let Some(gpio) = &mut self.power.gpio {
            gpio.set_output(false);
            self.delay.delay_ms(PERST_HOLD_MS);
            gpio.set_output(true);
        }

        let mode = *self.access.get_mut();
        direct::configure_mode(&self.ctrl, mode);
        self.delay.delay_ms(MODE_SETTLE_MS);
        self.ctrl.write_u32(ctrl::LINK_INIT, post_link::LINK_INIT);

        if !self.wait_for_link() {
            let timeout_ms = self.config.link_timeout_ms;
            self.power.release();
            self.link_state = LinkState::Failed;
            tracing::error!(timeout_ms, "PCIe slot 2 link down");
            return Err(AttachError::LinkDown { timeout_ms });
        }

        tracing::info!("PCIe slot 2 link up");
        self.post_link_setup();
        self.link_state = LinkState::Up;
        Ok(())
    }

    fn preconfigure_phy(&self) {
        let clock = self.system.read_u32(system::PHY_CLOCK);
        self.system.write_u32(
            system::PHY_CLOCK,
            (clock & !system::PHY_CLOCK_MASK) | system::PHY_CLOCK_SELECT,
        );
        let lanes = self.system.read_u32(system::LANE_CONFIG);
        self.system
            .write_u32(system::LANE_CONFIG, lanes & !system::LANE_CONFIG_SLOT2_MASK);
        self.system
            .write_u8(system::PHY_POWER, system::PHY_POWER_ON);
        tracing::debug!(chip = ?self.chip, "phy preconfigured");
    }

    fn wait_for_link(&self) -> bool {
        let interval = self.config.link_poll_interval_ms.max(1);
        let mut elapsed = 0;
        loop {
            if LinkStatus::from(self.ctrl.read_u32(ctrl::LINK_STATUS)).link_up() {
                return true;
            }
            self.delay.delay_ms(interval);
            elapsed += interval;
            if elapsed >= self.config.link_timeout_ms {
                return false;
            }
        }
    }

    fn post_link_setup(&self) {
        let muxpad = self.muxpad.read_u32(post_link::MUXPAD_OFFSET);
        self.muxpad
            .write_u32(post_link::MUXPAD_OFFSET, muxpad | post_link::MUXPAD_ENABLE);
        self.ctrl.write_u32(ctrl::DBI_COMMAND, post_link::DBI_ENABLE);
        self.ctrl
            .write_u32(ctrl::WINDOW_PHYS_BASE, post_link::WINDOW_PHYS_BASE);
        self.ctrl.write_u32(ctrl::WINDOW_MASK, window::MASK_4K);
        self.ctrl.write_u32(ctrl::WINDOW_BASE, post_link::WINDOW_BASE);
        self.ctrl.write_u32(ctrl::DLLP_CTRL, post_link::DLLP_NO_HANG);
        self.ctrl
            .write_u32(ctrl::MEM_LIMIT, post_link::MEM_LIMIT_BASE);
        self.ctrl.write_u32(ctrl::MEM_BASE, post_link::MEM_LIMIT_BASE);
    }

    /// Puts the controller into `state`.
    pub fn suspend(&mut self, state: PowerState) {
        tracing::info!(?state, "suspending PCIe slot 2");
        match state {
            PowerState::Standby => {
                self.ctrl
                    .write_u32(ctrl::AUX_POWER, power::STANDBY_AUX_POWER);
                self.ctrl.write_u32(ctrl::PM_CTRL, power::STANDBY_PM_CTRL);
                self.ctrl.write_u32(ctrl::PWR_STATE, power::STANDBY_ENTER);
            }
            PowerState::Suspend => {
                self.power.release();
                self.link_state = LinkState::Down;
            }
        }
        self.suspended = Some(state);
    }

    /// Leaves a previous [`suspend`](Self::suspend).
    ///
    /// After a full suspend the GPIO is requested again and the link is
    /// retrained. If that fails the controller stays suspended, and the next
    /// call retries. Does nothing if the controller is not suspended.
    pub fn resume(&mut self) -> Result<(), AttachError> {
        let Some(state) = self.suspended.take() else {
            return Ok(());
        };
        tracing::info!(?state, "resuming PCIe slot 2");
        match state {
            PowerState::Standby => {
                self.ctrl.write_u32(ctrl::PWR_STATE, power::STANDBY_EXIT);
                Ok(())
            }
            PowerState::Suspend => {
                let result = self.retrain();
                if result.is_err() {
                    self.suspended = Some(PowerState::Suspend);
                }
                result
            }
        }
    }

    fn retrain(&mut self) -> Result<(), AttachError> {
        let line = self.config.reset_gpio;
        // A retrain that failed at clock enable still holds the line.
        self.power.gpio = None;
        let gpio = self.platform.request_gpio(line).map_err(|err| {
            self.link_state = LinkState::Failed;
            AttachError::Gpio(line, err)
        })?;
        self.power.gpio = Some(gpio);
        self.train_link()
    }

    /// Switches the steady-state configuration access mode.
    pub fn configure_direct_mode(&self, enabled: bool) {
        let mode = if enabled {
            AccessMode::Direct
        } else {
            AccessMode::Indirect
        };
        let mut access = self.access.lock();
        direct::configure_mode(&self.ctrl, mode);
        *access = mode;
    }

    /// Returns the controller to reset and releases its resources.
    pub fn detach(mut self) {
        tracing::info!("detaching PCIe slot 2");
        self.power.release();
        self.link_state = LinkState::Down;
    }
}
