// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::MmioWindow;
use crate::platform::ChipInfo;
use crate::platform::ChipModel;
use crate::platform::ChipRevision;
use crate::platform::ClockControl;
use crate::platform::Delay;
use crate::platform::GpioOutput;
use crate::platform::HostPlatform;
use crate::platform::MappedRegion;
use crate::platform::RegionKind;
use crate::platform::ResetControl;
use crate::platform::ResetId;
use crate::platform::SharedBusLock;
use crate::regs::RegisterIo;
use crate::spec::CFG_EN_FULL_DWORD;
use crate::spec::CfgEnable;
use crate::spec::CfgStatus;
use crate::spec::GO_CT;
use crate::spec::LinkStatus;
use crate::spec::ctrl;
use crate::spec::transaction;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub const CTRL_PHYS_BASE: u64 = 0x9803_B000;
pub const CFG_PHYS_BASE: u64 = 0x9803_C000;
pub const SYSTEM_PHYS_BASE: u64 = 0x9801_C600;
pub const MUXPAD_PHYS_BASE: u64 = 0x9801_2000;

const CTRL_LEN: usize = 0x1000;
const CFG_LEN: usize = 0x1000;
const SYSTEM_LEN: usize = 0x100;
const MUXPAD_LEN: usize = 0x1000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A write to the control region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Write {
    pub offset: usize,
    pub value: u32,
}

/// Platform interactions, in the order they happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Assert(ResetId),
    Deassert(ResetId),
    ClockEnable,
    ClockDisable,
    GpioRequest(u32),
    GpioLevel(bool),
    GpioFree,
    BusLock,
    BusUnlock,
}

#[derive(Default)]
struct SimState {
    ctrl: HashMap<usize, u32>,
    ctrl_writes: Vec<Write>,
    ctrl_reads: usize,
    cfg: Vec<u8>,
    cfg_accesses: Vec<(usize, usize, u32)>,
    system: Vec<u8>,
    muxpad: Vec<u8>,
    config_space: HashMap<u32, u32>,
    /// `CFG_EN` has been written since the last transaction started.
    cfg_en_armed: bool,
    issues: u32,
    status_polls: u32,
    fail_remaining: u32,
    fail_flags: u32,
    never_done: bool,
    dllp_errors: VecDeque<u32>,
    link_up_after: Option<u32>,
    link_polls: u32,
    events: Vec<Event>,
    missing_region: Option<RegionKind>,
    missing_reset: Option<ResetId>,
    gpio_unavailable: bool,
    clock_enable_fails: bool,
}

impl SimState {
    fn ctrl_value(&self, offset: usize) -> u32 {
        self.ctrl.get(&offset).copied().unwrap_or(0)
    }

    fn read_ctrl(&mut self, offset: usize) -> u32 {
        self.ctrl_reads += 1;
        match offset {
            ctrl::CFG_ST => self.status_polls += 1,
            ctrl::DLLP_STATUS => {
                if self.ctrl_value(offset) == 0 {
                    let next = self.dllp_errors.pop_front().unwrap_or(0);
                    self.ctrl.insert(offset, next);
                }
            }
            ctrl::LINK_STATUS => {
                self.link_polls += 1;
                let up = self.link_up_after.is_some_and(|n| self.link_polls > n);
                self.ctrl
                    .insert(offset, LinkStatus::new().with_link_up(up).into_bits());
            }
            _ => {}
        }
        self.ctrl_value(offset)
    }

    fn write_ctrl(&mut self, offset: usize, value: u32) {
        self.ctrl_writes.push(Write { offset, value });
        match offset {
            ctrl::CFG_ST | ctrl::DLLP_STATUS => {
                *self.ctrl.entry(offset).or_default() &= !value;
            }
            ctrl::CFG_EN => {
                self.ctrl.insert(offset, value);
                self.cfg_en_armed = true;
            }
            ctrl::CFG_CT => {
                self.ctrl.insert(offset, value);
                if value & GO_CT != 0 {
                    self.run_transaction();
                }
            }
            _ => {
                self.ctrl.insert(offset, value);
            }
        }
    }

    /// Returns the bit mask of the lanes enabled for the transaction being
    /// started. Panics unless `CFG_EN` was programmed for it with a direction
    /// matching `INDIR_CTR`.
    fn enabled_lanes(&mut self) -> u32 {
        assert!(
            std::mem::take(&mut self.cfg_en_armed),
            "transaction started without programming CFG_EN"
        );
        let raw = self.ctrl_value(ctrl::CFG_EN);
        let write = match self.ctrl_value(ctrl::INDIR_CTR) {
            transaction::CFG_READ => false,
            transaction::CFG_WRITE => true,
            kind => panic!("unexpected transaction kind {kind:#x}"),
        };
        if write && raw == CFG_EN_FULL_DWORD {
            return !0;
        }
        let enable = CfgEnable::from(raw);
        assert!(enable.byte_enable(), "CFG_EN {raw:#x} has no byte lanes");
        assert_eq!(enable.write(), write, "CFG_EN {raw:#x} direction mismatch");
        (0..4)
            .filter(|lane| enable.byte_count() & (1 << lane) != 0)
            .fold(0, |acc, lane| acc | (0xFF << (lane * 8)))
    }

    fn run_transaction(&mut self) {
        self.issues += 1;
        let mask = self.enabled_lanes();
        let status = if self.never_done {
            CfgStatus::new()
        } else if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            CfgStatus::from(CfgStatus::CLEAR.into_bits() | self.fail_flags)
        } else {
            let register = self.ctrl_value(ctrl::CFG_ADDR) & 0xFFC;
            match self.ctrl_value(ctrl::INDIR_CTR) {
                transaction::CFG_READ => {
                    let data = self.config_space.get(&register).copied().unwrap_or(0);
                    self.ctrl.insert(ctrl::CFG_RDATA, data & mask);
                }
                transaction::CFG_WRITE => {
                    let data = self.ctrl_value(ctrl::CFG_WDATA);
                    let old = self.config_space.entry(register).or_default();
                    *old = (*old & !mask) | (data & mask);
                }
                kind => panic!("unexpected transaction kind {kind:#x}"),
            }
            CfgStatus::new().with_done(true)
        };
        self.ctrl.insert(ctrl::CFG_ST, status.into_bits());
    }

    fn bytes(&mut self, region: RegionKind) -> &mut Vec<u8> {
        match region {
            RegionKind::ConfigWindow => &mut self.cfg,
            RegionKind::System => &mut self.system,
            RegionKind::PadMux => &mut self.muxpad,
            RegionKind::Control => unreachable!("control region is register backed"),
        }
    }

    fn read_bytes(&mut self, region: RegionKind, offset: usize, size: usize) -> u32 {
        if region == RegionKind::ConfigWindow {
            let base = self.ctrl_value(ctrl::WINDOW_BASE);
            self.cfg_accesses.push((offset, size, base));
        }
        let bytes = &self.bytes(region)[offset..offset + size];
        bytes
            .iter()
            .rev()
            .fold(0, |acc, &byte| (acc << 8) | u32::from(byte))
    }

    fn write_bytes(&mut self, region: RegionKind, offset: usize, size: usize, value: u32) {
        if region == RegionKind::ConfigWindow {
            let base = self.ctrl_value(ctrl::WINDOW_BASE);
            self.cfg_accesses.push((offset, size, base));
        }
        let bytes = &mut self.bytes(region)[offset..offset + size];
        bytes.copy_from_slice(&value.to_le_bytes()[..size]);
    }
}

/// A simulated controller: its control registers, the configuration window,
/// the endpoint's configuration space behind the indirect interface, and the
/// system and pad mux regions.
#[derive(Clone)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                cfg: vec![0; CFG_LEN],
                system: vec![0; SYSTEM_LEN],
                muxpad: vec![0; MUXPAD_LEN],
                ..Default::default()
            })),
        }
    }

    pub fn registers(&self, region: RegionKind) -> SimRegisters {
        SimRegisters {
            state: self.state.clone(),
            region,
        }
    }

    pub fn ctrl(&self) -> SimRegisters {
        self.registers(RegionKind::Control)
    }

    pub fn cfg(&self) -> SimRegisters {
        self.registers(RegionKind::ConfigWindow)
    }

    pub fn config_window(&self) -> MmioWindow {
        MmioWindow::new(CFG_PHYS_BASE, CFG_LEN as u64)
    }

    /// Sets a control register without logging the write.
    pub fn poke_ctrl(&self, offset: usize, value: u32) {
        self.state.lock().ctrl.insert(offset, value);
    }

    /// Returns a control register without side effects.
    pub fn peek_ctrl(&self, offset: usize) -> u32 {
        self.state.lock().ctrl_value(offset)
    }

    pub fn ctrl_writes(&self) -> Vec<Write> {
        self.state.lock().ctrl_writes.clone()
    }

    pub fn ctrl_writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .ctrl_writes
            .iter()
            .filter(|write| write.offset == offset)
            .map(|write| write.value)
            .collect()
    }

    pub fn ctrl_reads(&self) -> usize {
        self.state.lock().ctrl_reads
    }

    pub fn poke_cfg(&self, offset: usize, bytes: &[u8]) {
        self.state.lock().cfg[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek_cfg(&self, offset: usize, len: usize) -> Vec<u8> {
        self.state.lock().cfg[offset..offset + len].to_vec()
    }

    /// Window accesses as (offset, size, translation base at the time).
    pub fn cfg_accesses(&self) -> Vec<(usize, usize, u32)> {
        self.state.lock().cfg_accesses.clone()
    }

    pub fn poke_system(&self, offset: usize, value: u32) {
        self.state.lock().system[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn peek_system(&self, offset: usize) -> u32 {
        self.state.lock().read_bytes(RegionKind::System, offset, 4)
    }

    pub fn peek_muxpad(&self, offset: usize) -> u32 {
        self.state.lock().read_bytes(RegionKind::PadMux, offset, 4)
    }

    pub fn set_config_dword(&self, register: u32, value: u32) {
        self.state.lock().config_space.insert(register, value);
    }

    pub fn config_dword(&self, register: u32) -> u32 {
        self.state
            .lock()
            .config_space
            .get(&register)
            .copied()
            .unwrap_or(0)
    }

    /// Indirect transactions started.
    pub fn issues(&self) -> u32 {
        self.state.lock().issues
    }

    /// Reads of the indirect status register.
    pub fn status_polls(&self) -> u32 {
        self.state.lock().status_polls
    }

    /// Fails the next `count` transactions with the error bit and `flags`.
    pub fn fail_transactions(&self, count: u32, flags: u32) {
        let mut state = self.state.lock();
        state.fail_remaining = count;
        state.fail_flags = flags;
    }

    pub fn set_never_done(&self, never_done: bool) {
        self.state.lock().never_done = never_done;
    }

    /// Queues DLLP error values, each reported once the previous is cleared.
    pub fn queue_dllp_errors(&self, errors: impl IntoIterator<Item = u32>) {
        self.state.lock().dllp_errors.extend(errors);
    }

    /// Reports the link as up once it has been polled more than `polls`
    /// times, or never.
    pub fn set_link_up_after(&self, polls: Option<u32>) {
        let mut state = self.state.lock();
        state.link_up_after = polls;
        state.link_polls = 0;
    }

    pub fn link_polls(&self) -> u32 {
        self.state.lock().link_polls
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    fn record(&self, event: Event) {
        self.state.lock().events.push(event);
    }

    /// Forgets every logged access and event, keeping register contents.
    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.ctrl_writes.clear();
        state.ctrl_reads = 0;
        state.cfg_accesses.clear();
        state.events.clear();
        state.issues = 0;
        state.status_polls = 0;
        state.link_polls = 0;
    }
}

pub struct SimRegisters {
    state: Arc<Mutex<SimState>>,
    region: RegionKind,
}

impl SimRegisters {
    fn read(&self, offset: usize, size: usize) -> u32 {
        let mut state = self.state.lock();
        match self.region {
            RegionKind::Control => {
                let aligned = offset & !3;
                let shift = (offset & 3) * 8;
                state.read_ctrl(aligned) >> shift
            }
            region => state.read_bytes(region, offset, size),
        }
    }

    fn write(&self, offset: usize, size: usize, value: u32) {
        let mut state = self.state.lock();
        match self.region {
            RegionKind::Control => {
                assert_eq!(size, 4, "sub-dword control register write at {offset:#x}");
                state.write_ctrl(offset, value);
            }
            region => state.write_bytes(region, offset, size, value),
        }
    }
}

impl RegisterIo for SimRegisters {
    fn len(&self) -> usize {
        match self.region {
            RegionKind::Control => CTRL_LEN,
            RegionKind::ConfigWindow => CFG_LEN,
            RegionKind::System => SYSTEM_LEN,
            RegionKind::PadMux => MUXPAD_LEN,
        }
    }

    fn read_u8(&self, offset: usize) -> u8 {
        self.read(offset, 1) as u8
    }

    fn read_u16(&self, offset: usize) -> u16 {
        self.read(offset, 2) as u16
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.read(offset, 4)
    }

    fn write_u8(&self, offset: usize, data: u8) {
        self.write(offset, 1, data.into());
    }

    fn write_u16(&self, offset: usize, data: u16) {
        self.write(offset, 2, data.into());
    }

    fn write_u32(&self, offset: usize, data: u32) {
        self.write(offset, 4, data);
    }
}

/// A [`Delay`] that only accounts for the time requested.
#[derive(Clone, Default)]
pub struct SimDelay {
    total_us: Arc<AtomicU64>,
}

impl SimDelay {
    pub fn total_us(&self) -> u64 {
        self.total_us.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.total_us.store(0, Ordering::SeqCst);
    }
}

impl Delay for SimDelay {
    fn delay_us(&self, us: u32) {
        self.total_us.fetch_add(us.into(), Ordering::SeqCst);
    }

    fn delay_ms(&self, ms: u32) {
        self.total_us
            .fetch_add(u64::from(ms) * 1000, Ordering::SeqCst);
    }
}

/// A [`SharedBusLock`] that counts acquisitions and optionally records them
/// as platform events.
#[derive(Default)]
pub struct SimBusLock {
    hw: Option<SimHardware>,
    acquisitions: AtomicUsize,
    held: AtomicBool,
}

impl SimBusLock {
    pub fn recording(hw: SimHardware) -> Self {
        Self {
            hw: Some(hw),
            ..Default::default()
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl SharedBusLock for SimBusLock {
    fn acquire(&self) {
        assert!(!self.held.swap(true, Ordering::SeqCst), "bus lock is held");
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(hw) = &self.hw {
            hw.record(Event::BusLock);
        }
    }

    fn release(&self) {
        assert!(self.held.swap(false, Ordering::SeqCst), "bus lock not held");
        if let Some(hw) = &self.hw {
            hw.record(Event::BusUnlock);
        }
    }
}

pub struct SimReset {
    hw: SimHardware,
    id: ResetId,
}

impl ResetControl for SimReset {
    fn assert(&mut self) {
        self.hw.record(Event::Assert(self.id));
    }

    fn deassert(&mut self) {
        self.hw.record(Event::Deassert(self.id));
    }
}

pub struct SimClock {
    hw: SimHardware,
}

impl ClockControl for SimClock {
    fn prepare_enable(&mut self) -> anyhow::Result<()> {
        self.hw.record(Event::ClockEnable);
        if self.hw.state.lock().clock_enable_fails {
            anyhow::bail!("clock gate did not ungate");
        }
        Ok(())
    }

    fn disable_unprepare(&mut self) {
        self.hw.record(Event::ClockDisable);
    }
}

pub struct SimGpio {
    hw: SimHardware,
}

impl GpioOutput for SimGpio {
    fn set_output(&mut self, high: bool) {
        self.hw.record(Event::GpioLevel(high));
    }
}

impl Drop for SimGpio {
    fn drop(&mut self) {
        self.hw.record(Event::GpioFree);
    }
}

/// A [`HostPlatform`] backed by [`SimHardware`].
#[derive(Clone)]
pub struct SimPlatform {
    pub hw: SimHardware,
    pub delay_total: SimDelay,
    chip: ChipInfo,
    bus_lock: Option<Arc<SimBusLock>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::with_chip(ChipInfo {
            model: ChipModel::Rtd1295,
            revision: ChipRevision::B00,
        })
    }

    pub fn with_chip(chip: ChipInfo) -> Self {
        let hw = SimHardware::new();
        Self {
            bus_lock: Some(Arc::new(SimBusLock::recording(hw.clone()))),
            hw,
            delay_total: SimDelay::default(),
            chip,
        }
    }

    pub fn without_bus_lock(mut self) -> Self {
        self.bus_lock = None;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.hw.events()
    }

    pub fn remove_region(&self, kind: RegionKind) {
        self.hw.state.lock().missing_region = Some(kind);
    }

    pub fn remove_reset(&self, id: ResetId) {
        self.hw.state.lock().missing_reset = Some(id);
    }

    pub fn set_gpio_unavailable(&self, unavailable: bool) {
        self.hw.state.lock().gpio_unavailable = unavailable;
    }

    pub fn fail_clock_enable(&self) {
        self.hw.state.lock().clock_enable_fails = true;
    }
}

impl HostPlatform for SimPlatform {
    type Registers = SimRegisters;
    type Reset = SimReset;
    type Clock = SimClock;
    type Gpio = SimGpio;
    type Delay = SimDelay;

    fn map_region(&mut self, kind: RegionKind) -> anyhow::Result<MappedRegion<SimRegisters>> {
        if self.hw.state.lock().missing_region == Some(kind) {
            anyhow::bail!("no {kind:?} region");
        }
        let (phys_base, len) = match kind {
            RegionKind::Control => (CTRL_PHYS_BASE, CTRL_LEN),
            RegionKind::ConfigWindow => (CFG_PHYS_BASE, CFG_LEN),
            RegionKind::System => (SYSTEM_PHYS_BASE, SYSTEM_LEN),
            RegionKind::PadMux => (MUXPAD_PHYS_BASE, MUXPAD_LEN),
        };
        Ok(MappedRegion {
            registers: self.hw.registers(kind),
            phys_base,
            len: len as u64,
        })
    }

    fn reset_control(&mut self, id: ResetId) -> anyhow::Result<SimReset> {
        if self.hw.state.lock().missing_reset == Some(id) {
            anyhow::bail!("no {} reset", id.name());
        }
        Ok(SimReset {
            hw: self.hw.clone(),
            id,
        })
    }

    fn clock(&mut self) -> anyhow::Result<SimClock> {
        Ok(SimClock {
            hw: self.hw.clone(),
        })
    }

    fn request_gpio(&mut self, line: u32) -> anyhow::Result<SimGpio> {
        if self.hw.state.lock().gpio_unavailable {
            anyhow::bail!("gpio {line} is busy");
        }
        self.hw.record(Event::GpioRequest(line));
        Ok(SimGpio {
            hw: self.hw.clone(),
        })
    }

    fn delay(&mut self) -> SimDelay {
        self.delay_total.clone()
    }

    fn chip(&self) -> ChipInfo {
        self.chip
    }

    fn shared_bus_lock(&self) -> Option<Arc<dyn SharedBusLock>> {
        self.bus_lock
            .clone()
            .map(|lock| lock as Arc<dyn SharedBusLock>)
    }
}
