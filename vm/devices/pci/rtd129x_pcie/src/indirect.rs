// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Indirect configuration transactions through the controller's
//! address/data/status registers.

use crate::ConfigError;
use crate::platform::Delay;
use crate::regs::RegisterIo;
use crate::request::ConfigRequest;
use crate::spec::CFG_EN_FULL_DWORD;
use crate::spec::CfgEnable;
use crate::spec::CfgStatus;
use crate::spec::GO_CT;
use crate::spec::ctrl;
use crate::spec::transaction;

/// Status polls allowed for a read before it is considered timed out.
pub const READ_POLL_BUDGET: u32 = 20_000;
/// Status polls allowed for a write before it is considered timed out.
pub const WRITE_POLL_BUDGET: u32 = 1_000;
/// Delay between status polls.
pub const POLL_DELAY_US: u32 = 50;
/// Number of times a transaction is issued before it is reported as failed.
pub const MAX_ISSUES: u32 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    Read,
    Write(u32),
}

impl Direction {
    fn poll_budget(self) -> u32 {
        match self {
            Direction::Read => READ_POLL_BUDGET,
            Direction::Write(_) => WRITE_POLL_BUDGET,
        }
    }
}

/// Reads the endpoint configuration register described by `request`.
pub fn read<R, D>(ctrl: &R, delay: &D, request: &ConfigRequest) -> Result<u32, ConfigError>
where
    R: RegisterIo + ?Sized,
    D: Delay + ?Sized,
{
    transact(ctrl, delay, request, Direction::Read)
}

/// Writes `value` to the endpoint configuration register described by
/// `request`.
pub fn write<R, D>(
    ctrl: &R,
    delay: &D,
    request: &ConfigRequest,
    value: u32,
) -> Result<(), ConfigError>
where
    R: RegisterIo + ?Sized,
    D: Delay + ?Sized,
{
    transact(ctrl, delay, request, Direction::Write(value)).map(drop)
}

fn transact<R, D>(
    ctrl: &R,
    delay: &D,
    request: &ConfigRequest,
    direction: Direction,
) -> Result<u32, ConfigError>
where
    R: RegisterIo + ?Sized,
    D: Delay + ?Sized,
{
    let lanes = request.lanes();
    let mut status = CfgStatus::new();
    for issue in 1..=MAX_ISSUES {
        start(ctrl, request, direction);

        let mut done = false;
        for _ in 0..direction.poll_budget() {
            status = CfgStatus::from(ctrl.read_u32(ctrl::CFG_ST));
            delay.delay_us(POLL_DELAY_US);
            if status.done() {
                done = true;
                break;
            }
        }

        status = CfgStatus::from(ctrl.read_u32(ctrl::CFG_ST));
        if done && !status.error() {
            ctrl.write_u32(ctrl::CFG_ST, status.into_bits());
            return Ok(match direction {
                Direction::Read => lanes.extract(ctrl.read_u32(ctrl::CFG_RDATA)),
                Direction::Write(_) => 0,
            });
        }

        if !done {
            tracing::warn!(
                register = request.register(),
                status = status.into_bits(),
                issue,
                "indirect transaction timed out"
            );
        }
        for flag in status.error_flags() {
            tracing::warn!(register = request.register(), issue, flag, "indirect transaction error");
        }
        ctrl.write_u32(ctrl::CFG_ST, CfgStatus::CLEAR.into_bits());
    }

    tracing::error!(
        register = request.register(),
        status = status.into_bits(),
        write = matches!(direction, Direction::Write(_)),
        "indirect transaction failed"
    );
    Err(ConfigError::TransactionFailed {
        register: request.register(),
        status: status.into_bits(),
        partial: match direction {
            Direction::Read => Some(lanes.extract(ctrl.read_u32(ctrl::CFG_RDATA))),
            Direction::Write(_) => None,
        },
    })
}

fn start<R: RegisterIo + ?Sized>(ctrl: &R, request: &ConfigRequest, direction: Direction) {
    let lanes = request.lanes();
    ctrl.write_u32(
        ctrl::INDIR_CTR,
        match direction {
            Direction::Read => transaction::CFG_READ,
            Direction::Write(_) => transaction::CFG_WRITE,
        },
    );
    ctrl.write_u32(ctrl::CFG_ST, CfgStatus::CLEAR.into_bits());
    match direction {
        Direction::Read => {
            let address = request.indirect_address(request.register() & !3);
            ctrl.write_u32(ctrl::CFG_ADDR, address.into_bits());
            let enable = CfgEnable::new()
                .with_byte_count(lanes.mask())
                .with_byte_enable(true)
                .with_write(false);
            ctrl.write_u32(ctrl::CFG_EN, enable.into_bits());
        }
        Direction::Write(value) => {
            let address = request.indirect_address(request.register());
            ctrl.write_u32(ctrl::CFG_ADDR, address.into_bits());
            ctrl.write_u32(ctrl::CFG_WDATA, lanes.place(value));
            let enable = if lanes.mask() == 0xF {
                CFG_EN_FULL_DWORD
            } else {
                CfgEnable::new()
                    .with_byte_count(lanes.mask())
                    .with_byte_enable(true)
                    .with_write(true)
                    .into_bits()
            };
            ctrl.write_u32(ctrl::CFG_EN, enable);
        }
    }
    ctrl.write_u32(ctrl::CFG_CT, GO_CT);
}
