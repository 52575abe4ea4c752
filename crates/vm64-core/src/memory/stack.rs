//! Stack helpers: values live at `SB + SP` and the stack grows down.
//!
//! `SP` starts at the configured stack size, so a pop that would move it past
//! that size is an invalid-frame pop.

use crate::memory::Bus;
use crate::{MachineError, RegisterFile, SpecialRegister, Width};

/// Pushes the low `width` bytes of `value`.
///
/// # Errors
///
/// Returns [`MachineError::StackOverflow`] when `SP` is smaller than the value
/// width, or [`MachineError::IllegalMemoryAccess`] when `SB + SP` is outside
/// memory. `SP` is unchanged on error.
pub fn push(
    memory: &mut impl Bus,
    regs: &mut RegisterFile,
    width: Width,
    value: u64,
) -> Result<(), MachineError> {
    let sp = regs.special(SpecialRegister::StackPointer);
    let size = width.bytes();
    if sp < size {
        return Err(MachineError::StackOverflow { sp, size });
    }
    let new_sp = sp - size;
    let base = regs.special(SpecialRegister::StackBase);
    memory.write_word(base.wrapping_add(new_sp), width, value)?;
    regs.set_special(SpecialRegister::StackPointer, new_sp);
    Ok(())
}

/// Pops a `width`-byte value.
///
/// # Errors
///
/// Returns [`MachineError::StackOverflow`] when the pop would move `SP` past
/// `stack_size`. `SP` is unchanged on error.
pub fn pop(
    memory: &impl Bus,
    regs: &mut RegisterFile,
    width: Width,
    stack_size: u64,
) -> Result<u64, MachineError> {
    let sp = regs.special(SpecialRegister::StackPointer);
    let size = width.bytes();
    match sp.checked_add(size) {
        Some(new_sp) if new_sp <= stack_size => {
            let base = regs.special(SpecialRegister::StackBase);
            let value = memory.read_word(base.wrapping_add(sp), width)?;
            regs.set_special(SpecialRegister::StackPointer, new_sp);
            Ok(value)
        }
        _ => Err(MachineError::StackOverflow { sp, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::{pop, push};
    use crate::memory::{Memory, BLOCK_SIZE};
    use crate::{MachineError, RegisterFile, SpecialRegister, Width};
    use proptest::prelude::*;

    fn stack(sb: u64, size: u64) -> RegisterFile {
        let mut regs = RegisterFile::default();
        regs.set_special(SpecialRegister::StackBase, sb);
        regs.set_special(SpecialRegister::StackPointer, size);
        regs
    }

    #[test]
    fn push_writes_below_stack_pointer() {
        let mut memory = Memory::new(4 * BLOCK_SIZE as u64);
        let mut regs = stack(0x1000, 0x100);
        push(&mut memory, &mut regs, Width::W16, 0xBEEF).unwrap();

        assert_eq!(regs.special(SpecialRegister::StackPointer), 0xFE);
        assert_eq!(memory.read_value(0x10FE, Width::W16).unwrap(), 0xBEEF);
    }

    #[test]
    fn push_underflow_faults_and_keeps_stack_pointer() {
        let mut memory = Memory::new(4 * BLOCK_SIZE as u64);
        let mut regs = stack(0x1000, 4);
        assert_eq!(
            push(&mut memory, &mut regs, Width::W64, 1),
            Err(MachineError::StackOverflow { sp: 4, size: 8 })
        );
        assert_eq!(regs.special(SpecialRegister::StackPointer), 4);
    }

    #[test]
    fn pop_past_frame_faults() {
        let memory = Memory::new(4 * BLOCK_SIZE as u64);
        let mut regs = stack(0x1000, 0x10);
        assert!(matches!(
            pop(&memory, &mut regs, Width::W64, 0x10),
            Err(MachineError::StackOverflow { .. })
        ));
        assert_eq!(regs.special(SpecialRegister::StackPointer), 0x10);
    }

    proptest! {
        #[test]
        fn pushes_then_pops_are_lifo(values in proptest::collection::vec(any::<u64>(), 1..32), w in 0usize..4) {
            let width = Width::ALL[w];
            let mut memory = Memory::new(4 * BLOCK_SIZE as u64);
            let mut regs = stack(0x2000, 0x400);
            for value in &values {
                push(&mut memory, &mut regs, width, *value).unwrap();
            }
            for value in values.iter().rev() {
                prop_assert_eq!(pop(&memory, &mut regs, width, 0x400).unwrap(), value & width.mask());
            }
            prop_assert_eq!(regs.special(SpecialRegister::StackPointer), 0x400);
        }
    }
}
