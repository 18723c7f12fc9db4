// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host controller driver for the PCIe root complex in slot 2 of Realtek
//! RTD129x SoCs.
//!
//! The controller exposes a single endpoint (bus 1, device 0, function 0).
//! Its configuration space is reached either through an indirect
//! address/data/status register interface or directly through a 4K
//! configuration window, and the same window forwards the endpoint's MMIO.
//! Several silicon errata are worked around along the way: link-layer (DLLP)
//! errors are cleared and the access repeated, two offsets within every 4K
//! page are reached through a narrowed translation window, and a range of the
//! window is serialized against the eMMC controller.
//!
//! Platform services (register mappings, resets, clock, GPIO, delays) are
//! supplied through [`platform::HostPlatform`].

pub mod direct;
pub mod dllp;
pub mod indirect;
pub mod link;
pub mod platform;
pub mod regs;
pub mod request;
pub mod spec;
pub mod translate;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use link::AttachError;
pub use link::LinkState;
pub use link::PowerState;
pub use window::MmioWindow;

use crate::dllp::DllpError;
use crate::dllp::with_dllp_recovery;
use crate::link::PowerResources;
use crate::platform::ChipInfo;
use crate::platform::Delay;
use crate::platform::HostPlatform;
use crate::platform::RegionKind;
use crate::platform::SharedBusLock;
use crate::regs::RegisterIo;
use crate::request::ConfigRequest;
use crate::spec::ctrl;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Settle delay before every configuration access on A00 silicon.
const A00_ACCESS_DELAY_US: u32 = 200;

/// Target link speed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpeedMode {
    /// 2.5 GT/s.
    Gen1,
    /// 5 GT/s.
    Gen2,
}

/// How configuration space is accessed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    /// Plain loads and stores through the configuration window.
    Direct,
    /// Transactions through the indirect register interface.
    Indirect,
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct PcieHostConfig {
    /// Target link speed.
    pub speed_mode: SpeedMode,
    /// Initial configuration access mode.
    pub access_mode: AccessMode,
    /// PHY calibration words written through MDIO before the link is trained.
    pub phy_calibration: Vec<u32>,
    /// GPIO line wired to the endpoint's PERST#.
    pub reset_gpio: u32,
    /// Interval between link status polls.
    pub link_poll_interval_ms: u32,
    /// Time allowed for the link to come up.
    pub link_timeout_ms: u32,
}

impl PcieHostConfig {
    /// Returns the default configuration for an endpoint whose PERST# is
    /// wired to `reset_gpio`.
    pub fn new(reset_gpio: u32) -> Self {
        Self {
            speed_mode: SpeedMode::Gen2,
            access_mode: AccessMode::Indirect,
            phy_calibration: Vec::new(),
            reset_gpio,
            link_poll_interval_ms: 10,
            link_timeout_ms: 80,
        }
    }

    /// Sets the target link speed.
    pub fn with_speed_mode(mut self, speed_mode: SpeedMode) -> Self {
        self.speed_mode = speed_mode;
        self
    }

    /// Sets the initial access mode.
    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Sets the PHY calibration sequence.
    pub fn with_phy_calibration(mut self, words: impl IntoIterator<Item = u32>) -> Self {
        self.phy_calibration = words.into_iter().collect();
        self
    }

    /// Sets the link poll interval and timeout.
    pub fn with_link_timing(mut self, poll_interval_ms: u32, timeout_ms: u32) -> Self {
        self.link_poll_interval_ms = poll_interval_ms;
        self.link_timeout_ms = timeout_ms;
        self
    }
}

/// Status codes reported to the bus layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostStatus {
    /// The access completed.
    Successful,
    /// No device at the requested address.
    DeviceNotFound,
    /// The access was malformed or could not be completed.
    SetFailed,
    /// The controller could not be configured.
    ConfigError,
    /// The link is down.
    NoDevice,
}

impl HostStatus {
    /// Returns the status for the outcome of a configuration access.
    pub fn of<T>(result: &Result<T, ConfigError>) -> Self {
        match result {
            Ok(_) => HostStatus::Successful,
            Err(err) => err.status(),
        }
    }
}

/// Errors from configuration and window accesses.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The request does not target the endpoint.
    #[error("no device at {bus:02x}:{device:02x}.{function}")]
    DeviceNotFound {
        /// Requested bus.
        bus: u8,
        /// Requested device.
        device: u8,
        /// Requested function.
        function: u8,
    },
    /// The access size is not 1, 2 or 4.
    #[error("invalid access size {0}")]
    InvalidSize(usize),
    /// The access is not contained in a naturally aligned dword.
    #[error("{size}-byte access at {register:#x} is misaligned")]
    Misaligned {
        /// Requested offset.
        register: u32,
        /// Requested size.
        size: usize,
    },
    /// The offset lies beyond the configuration space.
    #[error("register {0:#x} is outside of configuration space")]
    InvalidRegister(u32),
    /// An indirect transaction failed on every issue.
    #[error("transaction at {register:#x} failed with status {status:#x}")]
    TransactionFailed {
        /// Requested offset.
        register: u32,
        /// Last status observed.
        status: u32,
        /// Data left in the read data register, for reads.
        partial: Option<u32>,
    },
    /// Link-layer errors persisted through every retry.
    #[error("link-layer errors at {register:#x}")]
    LinkLayer {
        /// Requested offset.
        register: u32,
        /// The recovery failure.
        #[source]
        source: DllpError,
    },
    /// The link is not up.
    #[error("link is not up")]
    LinkDown,
}

impl ConfigError {
    /// Maps the error to the status reported to the bus layer.
    pub fn status(&self) -> HostStatus {
        match self {
            ConfigError::DeviceNotFound { .. } => HostStatus::DeviceNotFound,
            ConfigError::InvalidSize(_)
            | ConfigError::Misaligned { .. }
            | ConfigError::InvalidRegister(_)
            | ConfigError::TransactionFailed { .. }
            | ConfigError::LinkLayer { .. } => HostStatus::SetFailed,
            ConfigError::LinkDown => HostStatus::NoDevice,
        }
    }
}

/// The RTD129x PCIe slot 2 host controller.
pub struct Rtd129xPcieHost<P: HostPlatform> {
    platform: P,
    config: PcieHostConfig,
    chip: ChipInfo,
    ctrl: P::Registers,
    cfg: P::Registers,
    system: P::Registers,
    muxpad: P::Registers,
    window: MmioWindow,
    delay: P::Delay,
    shared_bus_lock: Option<Arc<dyn SharedBusLock>>,
    /// Serializes every access that touches the window registers.
    access: Mutex<AccessMode>,
    power: PowerResources<P>,
    link_state: LinkState,
    suspended: Option<PowerState>,
}

impl<P: HostPlatform> Rtd129xPcieHost<P> {
    /// Claims the controller's resources from `platform` and trains the link.
    ///
    /// Resources acquired before a failure are released when the error is
    /// returned.
    pub fn attach(mut platform: P, config: PcieHostConfig) -> Result<Self, AttachError> {
        let chip = platform.chip();
        tracing::info!(
            ?chip,
            speed = ?config.speed_mode,
            mode = ?config.access_mode,
            "attaching PCIe slot 2 host"
        );

        let mut map = |kind| {
            platform
                .map_region(kind)
                .map_err(|err| AttachError::MapRegion(kind, err))
        };
        let ctrl = map(RegionKind::Control)?;
        let cfg = map(RegionKind::ConfigWindow)?;
        let system = map(RegionKind::System)?;
        let muxpad = map(RegionKind::PadMux)?;

        let power = PowerResources::acquire(&mut platform, config.reset_gpio)?;
        let delay = platform.delay();
        let shared_bus_lock = platform.shared_bus_lock();

        let mut host = Self {
            window: MmioWindow::new(cfg.phys_base, cfg.len),
            ctrl: ctrl.registers,
            cfg: cfg.registers,
            system: system.registers,
            muxpad: muxpad.registers,
            access: Mutex::new(config.access_mode),
            platform,
            config,
            chip,
            delay,
            shared_bus_lock,
            power,
            link_state: LinkState::Down,
            suspended: None,
        };
        host.train_link()?;
        Ok(host)
    }

    /// Returns the SoC identity.
    pub fn chip(&self) -> ChipInfo {
        self.chip
    }

    /// Returns the current configuration access mode.
    pub fn access_mode(&self) -> AccessMode {
        *self.access.lock()
    }

    /// Reads `size` bytes of configuration space at `register`.
    pub fn read_config(
        &self,
        bus: u8,
        device: u8,
        function: u8,
        register: u32,
        size: usize,
    ) -> Result<u32, ConfigError> {
        let request = ConfigRequest::new(bus, device, function, register, size)?;
        self.check_link()?;
        self.access_delay();

        let access = self.access.lock();
        let value = with_dllp_recovery(&self.ctrl, register, || match *access {
            AccessMode::Direct => Ok(direct::read(
                &self.ctrl,
                &self.cfg,
                self.shared_bus_lock.as_deref(),
                &request,
            )),
            AccessMode::Indirect => indirect::read(&self.ctrl, &self.delay, &request),
        })
        .map_err(|source| ConfigError::LinkLayer { register, source })??;
        tracing::debug!(register, size, value, "config read");
        Ok(value)
    }

    /// Writes the low `size` bytes of `value` to configuration space at
    /// `register`.
    pub fn write_config(
        &self,
        bus: u8,
        device: u8,
        function: u8,
        register: u32,
        size: usize,
        value: u32,
    ) -> Result<(), ConfigError> {
        let request = ConfigRequest::new(bus, device, function, register, size)?;
        self.check_link()?;
        self.access_delay();

        let access = self.access.lock();
        if spec::window::BAR_RELOCATION_REGISTERS.contains(&register)
            && value & spec::window::BAR_RELOCATION_MATCH == spec::window::BAR_RELOCATION_MATCH
        {
            let base = value & !spec::window::BAR_FLAGS_MASK;
            self.ctrl.write_u32(ctrl::WINDOW_BASE, base);
            tracing::debug!(register, base, "window base follows BAR");
        }
        with_dllp_recovery(&self.ctrl, register, || match *access {
            AccessMode::Direct => {
                direct::write(
                    &self.ctrl,
                    &self.cfg,
                    self.shared_bus_lock.as_deref(),
                    &request,
                    value,
                );
                Ok(())
            }
            AccessMode::Indirect => indirect::write(&self.ctrl, &self.delay, &request, value),
        })
        .map_err(|source| ConfigError::LinkLayer { register, source })??;
        tracing::debug!(register, size, value, "config write");
        Ok(())
    }

    fn check_link(&self) -> Result<(), ConfigError> {
        if self.link_state == LinkState::Up {
            Ok(())
        } else {
            Err(ConfigError::LinkDown)
        }
    }

    fn access_delay(&self) {
        if self.chip.needs_access_delay() {
            self.delay.delay_us(A00_ACCESS_DELAY_US);
        }
    }
}
