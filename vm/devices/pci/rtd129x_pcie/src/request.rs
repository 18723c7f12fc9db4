// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Validation of configuration space requests.

use crate::ConfigError;
use crate::regs::AccessSize;
use crate::spec::IndirectAddress;

/// Bus number of the only reachable endpoint.
pub const ENDPOINT_BUS: u8 = 1;

/// Size of a PCIe extended configuration space.
pub const CONFIG_SPACE_SIZE: u32 = 0x1000;

/// Byte lanes selected within a dword by an access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteLanes {
    mask: u8,
    shift: u32,
}

impl ByteLanes {
    /// Computes the lanes touched by an access of `size` at `register`.
    ///
    /// Returns `None` if the access would cross a dword boundary.
    pub fn new(register: u32, size: AccessSize) -> Option<Self> {
        let lane = register & 3;
        let mask = ((1u32 << size.bytes()) - 1) << lane;
        if mask > 0xF {
            return None;
        }
        Some(Self {
            mask: mask as u8,
            shift: lane * 8,
        })
    }

    /// Returns the 4-bit lane mask.
    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Returns the lane mask expanded to a 32-bit data mask.
    pub fn bit_mask(&self) -> u32 {
        (0..4)
            .filter(|lane| self.mask & (1 << lane) != 0)
            .fold(0, |acc, lane| acc | (0xFF << (lane * 8)))
    }

    /// Positions `value` on the selected lanes.
    pub fn place(&self, value: u32) -> u32 {
        (value << self.shift) & self.bit_mask()
    }

    /// Extracts the selected lanes from `dword`.
    pub fn extract(&self, dword: u32) -> u32 {
        (dword & self.bit_mask()) >> self.shift
    }
}

/// A validated configuration space access to the endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    register: u32,
    size: AccessSize,
    lanes: ByteLanes,
}

impl ConfigRequest {
    /// Validates an access of `size` bytes at `register` of
    /// `bus`/`device`/`function`.
    ///
    /// The target is checked first, so a request for an absent device fails
    /// with [`ConfigError::DeviceNotFound`] regardless of its other fields.
    pub fn new(
        bus: u8,
        device: u8,
        function: u8,
        register: u32,
        size: usize,
    ) -> Result<Self, ConfigError> {
        if bus != ENDPOINT_BUS || device != 0 || function != 0 {
            return Err(ConfigError::DeviceNotFound {
                bus,
                device,
                function,
            });
        }
        let size = AccessSize::try_from(size).map_err(ConfigError::InvalidSize)?;
        if register >= CONFIG_SPACE_SIZE {
            return Err(ConfigError::InvalidRegister(register));
        }
        let lanes = ByteLanes::new(register, size).ok_or(ConfigError::Misaligned {
            register,
            size: size.bytes(),
        })?;
        Ok(Self {
            register,
            size,
            lanes,
        })
    }

    /// The register offset as requested.
    pub fn register(&self) -> u32 {
        self.register
    }

    /// The access width.
    pub fn size(&self) -> AccessSize {
        self.size
    }

    /// The byte lanes of the access.
    pub fn lanes(&self) -> ByteLanes {
        self.lanes
    }

    /// The controller's encoding of the target, for `register`.
    pub fn indirect_address(&self, register: u32) -> IndirectAddress {
        IndirectAddress::new()
            .with_bus(ENDPOINT_BUS)
            .with_register(register as u16)
    }
}
