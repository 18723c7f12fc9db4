// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sized register access to the controller's memory-mapped regions.

// UNSAFETY: Volatile loads and stores to a caller-provided mapping.
#![expect(unsafe_code)]

use std::ptr::NonNull;

/// Width of a single register or configuration space access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessSize {
    /// 8-bit access.
    Byte = 1,
    /// 16-bit access.
    Word = 2,
    /// 32-bit access.
    Dword = 4,
}

impl AccessSize {
    /// Returns the access width in bytes.
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for AccessSize {
    type Error = usize;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Dword),
            size => Err(size),
        }
    }
}

/// Access to a memory-mapped register region.
///
/// Offsets are in bytes from the start of the region. Implementations are
/// expected to perform each call as exactly one bus access of the stated
/// width, in program order.
pub trait RegisterIo: Send + Sync {
    /// Returns the length of the region in bytes.
    fn len(&self) -> usize;
    /// Reads a byte.
    fn read_u8(&self, offset: usize) -> u8;
    /// Reads a 16-bit word.
    fn read_u16(&self, offset: usize) -> u16;
    /// Reads a 32-bit dword.
    fn read_u32(&self, offset: usize) -> u32;
    /// Writes a byte.
    fn write_u8(&self, offset: usize, data: u8);
    /// Writes a 16-bit word.
    fn write_u16(&self, offset: usize, data: u16);
    /// Writes a 32-bit dword.
    fn write_u32(&self, offset: usize, data: u32);
}

/// Performs a load of `size` at `offset`, zero-extended to 32 bits.
pub(crate) fn read_sized<R: RegisterIo + ?Sized>(regs: &R, offset: usize, size: AccessSize) -> u32 {
    match size {
        AccessSize::Byte => regs.read_u8(offset).into(),
        AccessSize::Word => regs.read_u16(offset).into(),
        AccessSize::Dword => regs.read_u32(offset),
    }
}

/// Performs a store of the low `size` bytes of `data` at `offset`.
pub(crate) fn write_sized<R: RegisterIo + ?Sized>(
    regs: &R,
    offset: usize,
    size: AccessSize,
    data: u32,
) {
    match size {
        AccessSize::Byte => regs.write_u8(offset, data as u8),
        AccessSize::Word => regs.write_u16(offset, data as u16),
        AccessSize::Dword => regs.write_u32(offset, data),
    }
}

/// A [`RegisterIo`] over a mapping of device memory.
#[derive(Debug)]
pub struct MappedRegisters {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is device memory that is only touched through volatile
// accesses, which may be issued from any thread.
unsafe impl Send for MappedRegisters {}
// SAFETY: see above; `MappedRegisters` has no interior state of its own.
unsafe impl Sync for MappedRegisters {}

impl MappedRegisters {
    /// Wraps the mapping at `base` of `len` bytes.
    ///
    /// # Safety
    /// `base..base + len` must be mapped, valid for volatile reads and writes
    /// of 1, 2 and 4 bytes at naturally aligned offsets, and must stay mapped
    /// for the lifetime of the returned value.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    fn ptr<T>(&self, offset: usize) -> *mut T {
        let size = size_of::<T>();
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= self.len),
            "register access {offset:#x}+{size} outside of region of {:#x} bytes",
            self.len
        );
        assert_eq!(offset % size, 0, "misaligned register access {offset:#x}");
        // SAFETY: the bounds have been checked above.
        unsafe { self.base.as_ptr().add(offset).cast() }
    }
}

impl RegisterIo for MappedRegisters {
    fn len(&self) -> usize {
        self.len
    }

    fn read_u8(&self, offset: usize) -> u8 {
        // SAFETY: `ptr` checked bounds and alignment; the mapping is valid
        // per the contract of `new`.
        unsafe { self.ptr::<u8>(offset).read_volatile() }
    }

    fn read_u16(&self, offset: usize) -> u16 {
        // SAFETY: as above.
        u16::from_le(unsafe { self.ptr::<u16>(offset).read_volatile() })
    }

    fn read_u32(&self, offset: usize) -> u32 {
        // SAFETY: as above.
        u32::from_le(unsafe { self.ptr::<u32>(offset).read_volatile() })
    }

    fn write_u8(&self, offset: usize, data: u8) {
        // SAFETY: as above.
        unsafe { self.ptr::<u8>(offset).write_volatile(data) }
    }

    fn write_u16(&self, offset: usize, data: u16) {
        // SAFETY: as above.
        unsafe { self.ptr::<u16>(offset).write_volatile(data.to_le()) }
    }

    fn write_u32(&self, offset: usize, data: u32) {
        // SAFETY: as above.
        unsafe { self.ptr::<u32>(offset).write_volatile(data.to_le()) }
    }
}
