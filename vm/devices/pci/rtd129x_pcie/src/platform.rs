// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces to the platform services the controller depends on: register
//! mappings, reset lines, the reference clock, the endpoint reset GPIO,
//! delays, and the bus lock shared with the eMMC controller.

use crate::regs::RegisterIo;
use crate::spec::window;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// The register regions claimed by the controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionKind {
    /// Controller-control registers.
    Control,
    /// Configuration space window, also the forwarded MMIO window.
    ConfigWindow,
    /// System registers used for early-revision PHY setup.
    System,
    /// Pad mux registers shared with the eMMC controller.
    PadMux,
}

/// A mapped register region together with its physical placement.
#[derive(Debug)]
pub struct MappedRegion<R> {
    /// Register access to the region.
    pub registers: R,
    /// Physical base address of the region.
    pub phys_base: u64,
    /// Length of the region in bytes.
    pub len: u64,
}

/// Reset lines of the controller, in deassertion order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetId {
    /// Stitch logic reset.
    Stitch,
    /// Controller reset.
    Rstn,
    /// Core reset.
    Core,
    /// Power domain reset.
    Power,
    /// Non-stitch logic reset.
    NonStitch,
    /// PHY reset.
    Phy,
    /// PHY MDIO reset.
    PhyMdio,
}

impl ResetId {
    /// Every reset line, in the order they are released during bring-up.
    pub const ALL: [Self; 7] = [
        Self::Stitch,
        Self::Rstn,
        Self::Core,
        Self::Power,
        Self::NonStitch,
        Self::Phy,
        Self::PhyMdio,
    ];

    /// Returns the platform name of the reset line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stitch => "stitch",
            Self::Rstn => "rstn",
            Self::Core => "core",
            Self::Power => "power",
            Self::NonStitch => "nonstitch",
            Self::Phy => "phy",
            Self::PhyMdio => "phy_mdio",
        }
    }
}

/// SoC model.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipModel {
    /// RTD1295.
    Rtd1295,
    /// RTD1296.
    Rtd1296,
}

/// SoC silicon revision.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipRevision {
    /// First silicon.
    A00,
    /// Metal fix of first silicon.
    A01,
    /// Second silicon.
    B00,
}

/// Identity of the SoC the controller lives on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// SoC model.
    pub model: ChipModel,
    /// Silicon revision.
    pub revision: ChipRevision,
}

impl ChipInfo {
    /// Whether the PHY needs the system-register setup before bring-up.
    pub fn needs_phy_preconfig(&self) -> bool {
        self.revision == ChipRevision::A00
            || (self.model == ChipModel::Rtd1296 && self.revision != ChipRevision::B00)
    }

    /// Whether every configuration access must be preceded by a settle delay.
    pub fn needs_access_delay(&self) -> bool {
        self.revision == ChipRevision::A00
    }
}

/// A reset line.
pub trait ResetControl: Send {
    /// Holds the block in reset.
    fn assert(&mut self);
    /// Releases the block from reset.
    fn deassert(&mut self);
}

/// The controller's reference clock.
pub trait ClockControl: Send {
    /// Prepares and enables the clock.
    fn prepare_enable(&mut self) -> anyhow::Result<()>;
    /// Disables and unprepares the clock.
    fn disable_unprepare(&mut self);
}

/// The GPIO line wired to the endpoint's PERST#.
///
/// Dropping the value releases the line.
pub trait GpioOutput: Send {
    /// Drives the line as an output at the given level.
    fn set_output(&mut self, high: bool);
}

/// Busy-wait delays.
pub trait Delay: Send + Sync {
    /// Spins for `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Spins for `ms` milliseconds.
    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }
}

/// A [`Delay`] that spins on the monotonic clock.
#[derive(Debug, Copy, Clone, Default)]
pub struct SpinDelay;

impl Delay for SpinDelay {
    fn delay_us(&self, us: u32) {
        let deadline = Instant::now() + Duration::from_micros(us.into());
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// The cross-subsystem lock serializing accesses to the window range that
/// aliases the eMMC controller.
pub trait SharedBusLock: Send + Sync {
    /// Takes the lock, spinning until it is available.
    fn acquire(&self);
    /// Releases the lock.
    fn release(&self);
}

/// Holds the [`SharedBusLock`] for the duration of one window access.
pub(crate) struct SharedBusGuard<'a>(&'a dyn SharedBusLock);

impl<'a> SharedBusGuard<'a> {
    /// Takes `lock` if `offset` falls in the range that aliases the eMMC
    /// controller.
    pub fn for_offset(lock: Option<&'a dyn SharedBusLock>, offset: u32) -> Option<Self> {
        let lock = lock?;
        if !window::SHARED_BUS_RANGE.contains(&(offset & window::PAGE_OFFSET_MASK)) {
            return None;
        }
        lock.acquire();
        Some(Self(lock))
    }
}

impl Drop for SharedBusGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Services the controller obtains from the platform at attach time.
///
/// Errors returned by the acquisition methods fail the attach; anything that
/// was acquired before the failure is released by dropping it.
pub trait HostPlatform: Send {
    /// Register access type for the mapped regions.
    type Registers: RegisterIo;
    /// Reset line type.
    type Reset: ResetControl;
    /// Reference clock type.
    type Clock: ClockControl;
    /// Endpoint reset GPIO type.
    type Gpio: GpioOutput;
    /// Delay provider type.
    type Delay: Delay;

    /// Maps one of the controller's register regions.
    fn map_region(&mut self, kind: RegionKind) -> anyhow::Result<MappedRegion<Self::Registers>>;
    /// Gets a reset line.
    fn reset_control(&mut self, id: ResetId) -> anyhow::Result<Self::Reset>;
    /// Gets the reference clock.
    fn clock(&mut self) -> anyhow::Result<Self::Clock>;
    /// Requests the endpoint reset GPIO `line`.
    fn request_gpio(&mut self, line: u32) -> anyhow::Result<Self::Gpio>;
    /// Returns the delay provider.
    fn delay(&mut self) -> Self::Delay;
    /// Returns the SoC identity.
    fn chip(&self) -> ChipInfo;

    /// Returns the eMMC shared bus lock, if the platform has one.
    fn shared_bus_lock(&self) -> Option<Arc<dyn SharedBusLock>> {
        None
    }
}
