//! Write-staging overlay over [`Memory`].
//!
//! Every write is range-checked when staged and kept in order; reads see the
//! staged bytes on top of live memory. Nothing reaches memory until
//! [`StagedMemory::commit`], so a faulting instruction leaves memory as it
//! found it.

use crate::memory::{Bus, Memory};
use crate::MachineError;

/// Pending writes of one instruction or one trap delivery.
#[derive(Debug)]
pub struct StagedMemory<'a> {
    memory: &'a Memory,
    pending: Vec<(u64, Vec<u8>)>,
}

impl<'a> StagedMemory<'a> {
    /// Starts an empty stage over `memory`.
    #[must_use]
    pub const fn new(memory: &'a Memory) -> Self {
        Self {
            memory,
            pending: Vec::new(),
        }
    }

    /// Underlying memory.
    #[must_use]
    pub const fn memory(&self) -> &'a Memory {
        self.memory
    }

    /// Number of staged writes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Applies every staged write under one memory lock.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] if a staged write no
    /// longer fits; writes are range-checked when staged, so this only happens
    /// if memory shrank.
    pub fn commit(self) -> Result<(), MachineError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.memory.write_batch(&self.pending)
    }
}

impl Bus for StagedMemory<'_> {
    fn check(&self, address: u64, length: u64) -> Result<(), MachineError> {
        self.memory.check_range(address, length)
    }

    fn read_bytes(&self, address: u64, buffer: &mut [u8]) -> Result<(), MachineError> {
        self.memory.read(address, buffer)?;
        let end = address + buffer.len() as u64;
        for (write_address, data) in &self.pending {
            let write_end = write_address + data.len() as u64;
            let start = address.max(*write_address);
            let stop = end.min(write_end);
            if start >= stop {
                continue;
            }
            let into = (start - address) as usize..(stop - address) as usize;
            let from = (start - write_address) as usize..(stop - write_address) as usize;
            buffer[into].copy_from_slice(&data[from]);
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), MachineError> {
        self.memory.check_range(address, data.len() as u64)?;
        if !data.is_empty() {
            self.pending.push((address, data.to_vec()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StagedMemory;
    use crate::memory::{Bus, Memory};
    use crate::Width;

    #[test]
    fn reads_see_staged_bytes_before_commit() {
        let memory = Memory::new(0x2000);
        memory.write(0x100, &[1, 2, 3, 4]).unwrap();
        let mut stage = StagedMemory::new(&memory);
        stage.write_bytes(0x102, &[9, 9, 9]).unwrap();

        let mut seen = [0u8; 6];
        stage.read_bytes(0x100, &mut seen).unwrap();
        assert_eq!(seen, [1, 2, 9, 9, 9, 0]);
        assert_eq!(memory.read_vec(0x100, 6).unwrap(), vec![1, 2, 3, 4, 0, 0]);

        stage.commit().unwrap();
        assert_eq!(memory.read_vec(0x100, 6).unwrap(), vec![1, 2, 9, 9, 9, 0]);
    }

    #[test]
    fn later_writes_win_and_dropping_discards() {
        let memory = Memory::new(0x2000);
        {
            let mut stage = StagedMemory::new(&memory);
            stage.write_word(0x10, Width::W32, 0x1111_1111).unwrap();
            stage.write_word(0x12, Width::W8, 0xAB).unwrap();
            assert_eq!(stage.read_word(0x10, Width::W32).unwrap(), 0x11AB_1111);
            assert_eq!(stage.pending(), 2);
        }
        assert_eq!(memory.read_value(0x10, Width::W32).unwrap(), 0);
    }

    #[test]
    fn out_of_range_write_is_rejected_when_staged() {
        let memory = Memory::new(0x1000);
        let mut stage = StagedMemory::new(&memory);
        assert!(stage.write_bytes(0xFFF, &[1, 2]).is_err());
        assert_eq!(stage.pending(), 0);
    }
}
