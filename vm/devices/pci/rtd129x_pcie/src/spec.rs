// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register layout of the RTD129x PCIe slot 2 controller.
//!
//! Offsets in [`ctrl`] are relative to the controller-control region. The
//! configuration window region has no registers of its own; it is addressed
//! through the translation window described by [`ctrl::WINDOW_MASK`] and
//! [`ctrl::WINDOW_BASE`].

use bitfield_struct::bitfield;

pub mod ctrl {
    //! Controller-control region offsets.

    /// DBI command register of the root port.
    pub const DBI_COMMAND: usize = 0x004;
    /// Memory limit register programmed after link-up.
    pub const MEM_LIMIT: usize = 0x020;
    /// Memory base register programmed after link-up.
    pub const MEM_BASE: usize = 0x024;
    /// Power management control, poked on standby suspend.
    pub const PM_CTRL: usize = 0x098;
    /// Link control; the low nibble selects the target link speed.
    pub const LINK_CTRL: usize = 0x0A0;
    /// Auxiliary power control, poked on standby suspend.
    pub const AUX_POWER: usize = 0x178;
    /// Port link initial setting.
    pub const LINK_INIT: usize = 0x710;

    /// System control; selects the access mode. See [`super::sys_ctr`].
    pub const SYS_CTR: usize = 0xC00;
    /// Indirect transaction kind. See [`super::transaction`].
    pub const INDIR_CTR: usize = 0xC04;
    /// Indirect transaction GO strobe.
    pub const CFG_CT: usize = 0xC08;
    /// Indirect byte enable and direction. See [`super::CfgEnable`].
    pub const CFG_EN: usize = 0xC0C;
    /// Indirect status, write-1-to-clear. See [`super::CfgStatus`].
    pub const CFG_ST: usize = 0xC10;
    /// Indirect target address. See [`super::IndirectAddress`].
    pub const CFG_ADDR: usize = 0xC14;
    /// Indirect write data.
    pub const CFG_WDATA: usize = 0xC18;
    /// PHY MDIO control; calibration words are written here.
    pub const MDIO_CTR: usize = 0xC1C;
    /// Indirect read data.
    pub const CFG_RDATA: usize = 0xC20;
    /// Power state control, distinguishes standby entry and exit.
    pub const PWR_STATE: usize = 0xC6C;
    /// DLLP error handling control.
    pub const DLLP_CTRL: usize = 0xC78;
    /// Link-layer error status, write-1-to-clear. See [`super::DllpStatus`].
    pub const DLLP_STATUS: usize = 0xC7C;
    /// Link status. See [`super::LinkStatus`].
    pub const LINK_STATUS: usize = 0xCB4;
    /// Physical base of the configuration window.
    pub const WINDOW_PHYS_BASE: usize = 0xCFC;
    /// Translation window mask.
    pub const WINDOW_MASK: usize = 0xD00;
    /// Translation window base.
    pub const WINDOW_BASE: usize = 0xD04;
}

pub mod sys_ctr {
    //! Values written to [`super::ctrl::SYS_CTR`].

    /// Base operating mode used while the PHY is calibrated.
    pub const BASE_MODE: u32 = 0x0014_0010;
    /// Steady-state direct access mode, also the per-access switch into
    /// configuration access while direct mode is active.
    pub const DIRECT: u32 = 0x0004_0012;
    /// Steady-state indirect access mode.
    pub const INDIRECT: u32 = 0x001E_0022;
    /// Mode restored after each direct configuration access.
    pub const DIRECT_IDLE: u32 = 0x001E_0002;
}

pub mod transaction {
    //! Values written to [`super::ctrl::INDIR_CTR`].

    /// Configuration read.
    pub const CFG_READ: u32 = 0x10;
    /// Configuration write.
    pub const CFG_WRITE: u32 = 0x12;
}

pub mod window {
    //! Translation window masks.

    /// Narrow mask forced for the erratum offsets.
    pub const MASK_2K: u32 = 0xFFFF_F800;
    /// Default mask.
    pub const MASK_4K: u32 = 0xFFFF_F000;
    /// Low bits of an address that select a register within a 4K page.
    pub const PAGE_OFFSET_MASK: u32 = 0xFFF;
    /// Window offsets that must not be accessed directly: `0xCEC` and `0xC68`
    /// within any 4K page alias controller registers on RTD129x silicon.
    pub const ERRATUM_OFFSETS: [u32; 2] = [0xCEC, 0xC68];
    /// Window offsets `0x800..0xA00` alias the eMMC controller's control path.
    pub const SHARED_BUS_RANGE: core::ops::Range<u32> = 0x800..0xA00;
    /// Endpoint BAR registers whose writes also retarget the window base.
    pub const BAR_RELOCATION_REGISTERS: [u32; 4] = [0x10, 0x18, 0x20, 0x24];
    /// Bits that mark a BAR value as lying in the forwarded window.
    pub const BAR_RELOCATION_MATCH: u32 = 0xC100_0000;
    /// Low BAR bits dropped when retargeting the window base.
    pub const BAR_FLAGS_MASK: u32 = 0xF;
}

pub mod post_link {
    //! Register values applied once the link is up.

    /// Memory and I/O decode plus bus mastering, so DBI accesses work.
    pub const DBI_ENABLE: u32 = 0x0000_0007;
    /// Physical base of the configuration window.
    pub const WINDOW_PHYS_BASE: u32 = 0x9803_C000;
    /// Translation base used for configuration reads and writes.
    pub const WINDOW_BASE: u32 = 0xC100_0000;
    /// Keeps the controller from hanging when a DLLP error is reported.
    pub const DLLP_NO_HANG: u32 = 0x0100_0001;
    /// Default memory limit and base.
    pub const MEM_LIMIT_BASE: u32 = 0x0000_FFF0;
    /// Port link initial setting written before link polling.
    pub const LINK_INIT: u32 = 0x0001_0120;
    /// Pad mux register offset within the pad mux region.
    pub const MUXPAD_OFFSET: usize = 0x61C;
    /// Pad mux bit that routes the slot 2 pads to the controller.
    pub const MUXPAD_ENABLE: u32 = 0x0000_0010;
}

pub mod power {
    //! Register values used by suspend and resume.

    /// [`super::ctrl::AUX_POWER`] value on standby entry.
    pub const STANDBY_AUX_POWER: u32 = 0xA3FF_0001;
    /// [`super::ctrl::PM_CTRL`] value on standby entry.
    pub const STANDBY_PM_CTRL: u32 = 0x0000_0400;
    /// [`super::ctrl::PWR_STATE`] value on standby entry.
    pub const STANDBY_ENTER: u32 = 0x0000_0031;
    /// [`super::ctrl::PWR_STATE`] value on standby exit.
    pub const STANDBY_EXIT: u32 = 0x0000_0032;
}

pub mod system {
    //! System region registers poked on early silicon revisions.

    /// Lane configuration; bits 19:16 select the slot 2 PHY source.
    pub const LANE_CONFIG: usize = 0x00;
    /// PHY power sequencing byte register.
    pub const PHY_POWER: usize = 0x08;
    /// PHY clock select; bits 2:0.
    pub const PHY_CLOCK: usize = 0x14;

    /// Bits cleared in [`LANE_CONFIG`].
    pub const LANE_CONFIG_SLOT2_MASK: u32 = 0xF << 16;
    /// Bits replaced in [`PHY_CLOCK`].
    pub const PHY_CLOCK_MASK: u32 = 0x7;
    /// Value placed in [`PHY_CLOCK`].
    pub const PHY_CLOCK_SELECT: u32 = 0x1;
    /// Value written to [`PHY_POWER`].
    pub const PHY_POWER_ON: u8 = 0x51;
}

/// GO strobe written to [`ctrl::CFG_CT`].
pub const GO_CT: u32 = 0x1;

/// Value of [`ctrl::CFG_EN`] for a full dword write.
pub const CFG_EN_FULL_DWORD: u32 = 0x1;

/// Low nibble of [`ctrl::LINK_CTRL`] selecting a Gen1 target speed.
pub const LINK_CTRL_GEN1: u32 = 0x1;

/// Indirect transaction status.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct CfgStatus {
    /// The transaction has completed.
    pub done: bool,
    /// The transaction completed with an error.
    pub error: bool,
    /// A parity error was detected.
    pub parity_error: bool,
    /// A system error was signaled.
    pub system_error: bool,
    /// The transaction was terminated with a master abort.
    pub master_abort: bool,
    /// The transaction was terminated with a target abort.
    pub target_abort: bool,
    /// The controller signaled a target abort.
    pub signaled_target_abort: bool,
    #[bits(25)]
    _reserved: u32,
}

impl CfgStatus {
    /// Write-1-to-clear value for the done and error bits.
    pub const CLEAR: Self = Self::new().with_done(true).with_error(true);

    /// Returns the names of the decoded error conditions that are set.
    pub fn error_flags(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.parity_error(), "parity error"),
            (self.system_error(), "system error"),
            (self.master_abort(), "master abort"),
            (self.target_abort(), "target abort"),
            (self.signaled_target_abort(), "signaled target abort"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
    }
}

/// Indirect byte enable and direction control.
#[bitfield(u32)]
pub struct CfgEnable {
    /// Byte lanes taking part in the transaction.
    #[bits(4)]
    pub byte_count: u8,
    /// Honor `byte_count`; otherwise the whole dword is transferred.
    pub byte_enable: bool,
    /// The transaction is a write.
    pub write: bool,
    #[bits(26)]
    _reserved: u32,
}

/// Indirect target address.
#[bitfield(u32)]
pub struct IndirectAddress {
    /// Configuration register offset.
    #[bits(12)]
    pub register: u16,
    #[bits(4)]
    _reserved: u8,
    /// Function number.
    #[bits(3)]
    pub function: u8,
    /// Device number.
    #[bits(5)]
    pub device: u8,
    /// Bus number.
    pub bus: u8,
}

/// Link-layer error status.
#[bitfield(u32)]
pub struct DllpStatus {
    /// Pending DLLP error bits.
    #[bits(5)]
    pub errors: u8,
    #[bits(27)]
    _reserved: u32,
}

/// Link status.
#[bitfield(u32)]
pub struct LinkStatus {
    #[bits(11)]
    _reserved: u16,
    /// The data link layer is up.
    pub link_up: bool,
    #[bits(20)]
    _reserved2: u32,
}
