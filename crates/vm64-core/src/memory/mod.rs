//! Block-paged, bounds-checked physical memory.
//!
//! The address space is `0..total` bytes backed by fixed 4 KiB blocks. Every
//! read or write is split into per-block copies (partial head, whole blocks,
//! partial tail) so no single copy crosses a block boundary. One mutex
//! serializes all access.

/// Fixed memory-region map.
pub mod map;
/// Stack push/pop helpers over `SB + SP`.
pub mod stack;
/// Write-staging overlay committed at instruction retirement.
pub mod staged;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{MachineError, Width};

pub use map::{
    decode_memory_region, ivt_entry_address, MemoryRegion, RegionDescriptor, BIOS_END,
    BIOS_START, BOOT_LOADER_END, BOOT_LOADER_START, CONFIG_END, CONFIG_START, DISPLAY_COLUMNS,
    DISPLAY_END, DISPLAY_ROWS, DISPLAY_START, EXTENDED_START, FIXED_MEMORY_REGIONS, IVT_END,
    IVT_ENTRY_BYTES, IVT_START,
};
pub use stack::{pop, push};
pub use staged::StagedMemory;

/// Bytes per backing block.
pub const BLOCK_SIZE: usize = 4096;
/// Default memory size (32 MiB).
pub const DEFAULT_TOTAL_MEMORY: u64 = 32 * 1024 * 1024;

type Block = [u8; BLOCK_SIZE];

/// Physical memory shared by the execution thread, devices and the debugger.
#[derive(Debug)]
pub struct Memory {
    blocks: Mutex<Vec<Block>>,
    total: u64,
}

impl Memory {
    /// Allocates zeroed memory, rounding `total_bytes` up to whole blocks.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        let block_count = usize::try_from(total_bytes.div_ceil(BLOCK_SIZE as u64)).unwrap_or(0);
        Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; block_count]),
            total: block_count as u64 * BLOCK_SIZE as u64,
        }
    }

    /// Size of the address space in bytes.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Validates that `address..address+length` lies inside the address space.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when the range ends past
    /// the last byte or its end overflows.
    pub fn check_range(&self, address: u64, length: u64) -> Result<(), MachineError> {
        match address.checked_add(length) {
            Some(end) if end <= self.total => Ok(()),
            _ => Err(MachineError::IllegalMemoryAccess { address, length }),
        }
    }

    /// Copies `buffer.len()` bytes starting at `address` into `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for out-of-range accesses;
    /// `buffer` is left untouched in that case.
    pub fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MachineError> {
        self.check_range(address, buffer.len() as u64)?;
        let blocks = self.lock();
        for_each_chunk(address, buffer.len(), |block, offset, range| {
            buffer[range.clone()].copy_from_slice(&blocks[block][offset..offset + range.len()]);
        });
        Ok(())
    }

    /// Copies `data` into memory starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for out-of-range accesses;
    /// memory is left untouched in that case.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), MachineError> {
        self.check_range(address, data.len() as u64)?;
        let mut blocks = self.lock();
        for_each_chunk(address, data.len(), |block, offset, range| {
            blocks[block][offset..offset + range.len()].copy_from_slice(&data[range]);
        });
        Ok(())
    }

    /// Reads `length` bytes into a fresh vector.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for out-of-range accesses.
    pub fn read_vec(&self, address: u64, length: u64) -> Result<Vec<u8>, MachineError> {
        self.check_range(address, length)?;
        let mut buffer = vec![0; usize::try_from(length).unwrap_or(0)];
        self.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Reads a little-endian value of `width` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for out-of-range accesses.
    pub fn read_value(&self, address: u64, width: Width) -> Result<u64, MachineError> {
        let mut bytes = [0u8; 8];
        self.read(address, &mut bytes[..width.bytes() as usize])?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes the low `width` bytes of `value` in little-endian order.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for out-of-range accesses.
    pub fn write_value(&self, address: u64, width: Width, value: u64) -> Result<(), MachineError> {
        self.write(address, &value.to_le_bytes()[..width.bytes() as usize])
    }

    /// Applies a batch of writes under one lock, after validating all of them.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] for the first
    /// out-of-range write; nothing is written in that case.
    pub fn write_batch(&self, writes: &[(u64, Vec<u8>)]) -> Result<(), MachineError> {
        for (address, data) in writes {
            self.check_range(*address, data.len() as u64)?;
        }
        let mut blocks = self.lock();
        for (address, data) in writes {
            for_each_chunk(*address, data.len(), |block, offset, range| {
                blocks[block][offset..offset + range.len()].copy_from_slice(&data[range]);
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Block>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Byte-addressed access used by the stack helpers and instruction handlers.
pub trait Bus {
    /// Validates `address..address+length`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn check(&self, address: u64, length: u64) -> Result<(), MachineError>;

    /// Fills `buffer` from `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn read_bytes(&self, address: u64, buffer: &mut [u8]) -> Result<(), MachineError>;

    /// Stores `data` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), MachineError>;

    /// Reads a little-endian value of `width` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn read_word(&self, address: u64, width: Width) -> Result<u64, MachineError> {
        let mut bytes = [0u8; 8];
        self.read_bytes(address, &mut bytes[..width.bytes() as usize])?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes the low `width` bytes of `value` in little-endian order.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn write_word(&mut self, address: u64, width: Width, value: u64) -> Result<(), MachineError> {
        self.write_bytes(address, &value.to_le_bytes()[..width.bytes() as usize])
    }

    /// Reads `length` bytes into a fresh vector, validating before allocating.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when out of range.
    fn read_range(&self, address: u64, length: u64) -> Result<Vec<u8>, MachineError> {
        self.check(address, length)?;
        let mut buffer = vec![0; usize::try_from(length).unwrap_or(0)];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer)
    }
}

impl Bus for Memory {
    fn check(&self, address: u64, length: u64) -> Result<(), MachineError> {
        self.check_range(address, length)
    }

    fn read_bytes(&self, address: u64, buffer: &mut [u8]) -> Result<(), MachineError> {
        self.read(address, buffer)
    }

    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), MachineError> {
        self.write(address, data)
    }
}

/// Walks `address..address+length` one block-local chunk at a time.
///
/// The callback receives the block index, the offset inside that block and
/// the matching range inside the caller's buffer.
fn for_each_chunk(
    address: u64,
    length: usize,
    mut chunk: impl FnMut(usize, usize, std::ops::Range<usize>),
) {
    let mut done = 0usize;
    while done < length {
        let linear = address + done as u64;
        let block = (linear / BLOCK_SIZE as u64) as usize;
        let offset = (linear % BLOCK_SIZE as u64) as usize;
        let count = (BLOCK_SIZE - offset).min(length - done);
        chunk(block, offset, done..done + count);
        done += count;
    }
}
