// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Direct configuration access through the memory-mapped configuration
//! window.

use crate::AccessMode;
use crate::platform::SharedBusGuard;
use crate::platform::SharedBusLock;
use crate::regs::RegisterIo;
use crate::regs::read_sized;
use crate::regs::write_sized;
use crate::request::ConfigRequest;
use crate::spec::ctrl;
use crate::spec::sys_ctr;
use crate::translate::translate;

/// Programs the steady-state access mode.
pub fn configure_mode<R: RegisterIo + ?Sized>(ctrl: &R, mode: AccessMode) {
    let value = match mode {
        AccessMode::Direct => sys_ctr::DIRECT,
        AccessMode::Indirect => sys_ctr::INDIRECT,
    };
    ctrl.write_u32(ctrl::SYS_CTR, value);
    tracing::debug!(?mode, value, "access mode configured");
}

/// Reads the register described by `request` through the window.
pub fn read<R, W>(ctrl: &R, cfg: &W, lock: Option<&dyn SharedBusLock>, request: &ConfigRequest) -> u32
where
    R: RegisterIo + ?Sized,
    W: RegisterIo + ?Sized,
{
    bracket(ctrl, || {
        let window = translate(ctrl, request.register());
        let _bus = SharedBusGuard::for_offset(lock, request.register());
        read_sized(cfg, window.physical_offset(), request.size())
    })
}

/// Writes `value` to the register described by `request` through the window.
pub fn write<R, W>(
    ctrl: &R,
    cfg: &W,
    lock: Option<&dyn SharedBusLock>,
    request: &ConfigRequest,
    value: u32,
) where
    R: RegisterIo + ?Sized,
    W: RegisterIo + ?Sized,
{
    bracket(ctrl, || {
        let window = translate(ctrl, request.register());
        let _bus = SharedBusGuard::for_offset(lock, request.register());
        write_sized(cfg, window.physical_offset(), request.size(), value);
    })
}

/// Switches the controller into configuration access for the duration of
/// `access`.
fn bracket<R: RegisterIo + ?Sized, T>(ctrl: &R, access: impl FnOnce() -> T) -> T {
    ctrl.write_u32(ctrl::SYS_CTR, sys_ctr::DIRECT);
    let value = access();
    ctrl.write_u32(ctrl::SYS_CTR, sys_ctr::DIRECT_IDLE);
    value
}
