// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recovery from data link layer errors reported after an access.

use crate::regs::RegisterIo;
use crate::spec::DllpStatus;
use crate::spec::ctrl;
use std::fmt::Debug;
use thiserror::Error;

/// Number of times an access is repeated after a link-layer error.
pub const DLLP_RETRY_LIMIT: u32 = 5;

/// An access kept reporting link-layer errors.
#[derive(Debug, Error)]
#[error("link-layer errors {status:#x} persisted after {attempts} attempts")]
pub struct DllpError {
    /// The last status observed.
    pub status: u32,
    /// Number of times the access was performed.
    pub attempts: u32,
}

/// Runs `access` and repeats it while the controller reports DLLP errors.
///
/// Each reported error is cleared before the access is repeated. `address` is
/// only used for diagnostics.
pub fn with_dllp_recovery<R, T, F>(ctrl: &R, address: u32, mut access: F) -> Result<T, DllpError>
where
    R: RegisterIo + ?Sized,
    T: Debug,
    F: FnMut() -> T,
{
    let mut attempts = 0;
    loop {
        let value = access();
        attempts += 1;
        let status = DllpStatus::from(ctrl.read_u32(ctrl::DLLP_STATUS));
        if status.errors() == 0 {
            return Ok(value);
        }
        let bits = status.into_bits();
        ctrl.write_u32(ctrl::DLLP_STATUS, bits);
        tracing::warn!(
            address,
            status = bits,
            ?value,
            attempts,
            "DLLP error after access"
        );
        if attempts > DLLP_RETRY_LIMIT {
            return Err(DllpError {
                status: bits,
                attempts,
            });
        }
    }
}
