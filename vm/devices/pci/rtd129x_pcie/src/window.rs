// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MMIO window forwarded to the endpoint, and accessors that reach it
//! through the translation window.

use crate::ConfigError;
use crate::Rtd129xPcieHost;
use crate::dllp::with_dllp_recovery;
use crate::platform::HostPlatform;
use crate::platform::SharedBusGuard;
use crate::regs::AccessSize;
use crate::regs::read_sized;
use crate::regs::write_sized;
use crate::translate::translate;

/// Physical placement of the forwarded MMIO window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MmioWindow {
    base: u64,
    len: u64,
}

impl MmioWindow {
    /// Describes a window of `len` bytes at `base`.
    pub fn new(base: u64, len: u64) -> Self {
        Self { base, len }
    }

    /// First address of the window.
    pub fn start(&self) -> u64 {
        self.base
    }

    /// Last address of the window, inclusive.
    pub fn end(&self) -> u64 {
        self.base + self.len.saturating_sub(1)
    }

    /// Length of the window in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether `addr` falls inside the window.
    pub fn contains(&self, addr: u64) -> bool {
        addr.checked_sub(self.base).is_some_and(|offset| offset < self.len)
    }
}

impl<P: HostPlatform> Rtd129xPcieHost<P> {
    /// Returns the forwarded MMIO window.
    pub fn mmio_window(&self) -> MmioWindow {
        self.window
    }

    /// Reads `size` bytes at window address `addr`.
    pub fn window_read(&self, addr: u32, size: usize) -> Result<u32, ConfigError> {
        let size = window_access_size(addr, size)?;
        self.check_link()?;

        let _access = self.access.lock();
        let value = with_dllp_recovery(&self.ctrl, addr, || {
            let window = translate(&self.ctrl, addr);
            let _bus = SharedBusGuard::for_offset(self.shared_bus_lock.as_deref(), addr);
            read_sized(&self.cfg, window.physical_offset(), size)
        })
        .map_err(|source| ConfigError::LinkLayer {
            register: addr,
            source,
        })?;
        tracing::trace!(addr, size = size.bytes(), value, "window read");
        Ok(value)
    }

    /// Writes the low `size` bytes of `value` at window address `addr`.
    pub fn window_write(&self, addr: u32, size: usize, value: u32) -> Result<(), ConfigError> {
        let size = window_access_size(addr, size)?;
        self.check_link()?;

        let _access = self.access.lock();
        with_dllp_recovery(&self.ctrl, addr, || {
            let window = translate(&self.ctrl, addr);
            let _bus = SharedBusGuard::for_offset(self.shared_bus_lock.as_deref(), addr);
            write_sized(&self.cfg, window.physical_offset(), size, value);
        })
        .map_err(|source| ConfigError::LinkLayer {
            register: addr,
            source,
        })?;
        tracing::trace!(addr, size = size.bytes(), value, "window write");
        Ok(())
    }
}

fn window_access_size(addr: u32, size: usize) -> Result<AccessSize, ConfigError> {
    let size = AccessSize::try_from(size).map_err(ConfigError::InvalidSize)?;
    if addr as usize % size.bytes() != 0 {
        return Err(ConfigError::Misaligned {
            register: addr,
            size: size.bytes(),
        });
    }
    Ok(size)
}
