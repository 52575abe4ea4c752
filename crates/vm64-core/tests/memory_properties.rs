//! Memory bounds, block splitting, register aliasing and stack ordering.

use log as _;
use rstest as _;
use serde as _;
use tempfile as _;
use thiserror as _;
use toml as _;

use proptest::prelude::*;
use vm64_core::memory::{pop, push};
use vm64_core::{
    MachineError, Memory, RegisterFile, RegisterId, SpecialRegister, Width, BLOCK_SIZE,
};

const BLOCK: u64 = BLOCK_SIZE as u64;

#[test]
fn last_byte_is_addressable_and_one_past_is_not() {
    let memory = Memory::new(4 * BLOCK);
    let total = memory.total();
    assert!(memory.write(total - 1, &[0x5A]).is_ok());
    assert_eq!(memory.read_vec(total - 1, 1).unwrap(), vec![0x5A]);
    assert_eq!(
        memory.read_vec(total, 1),
        Err(MachineError::IllegalMemoryAccess {
            address: total,
            length: 1
        })
    );
}

fn width() -> impl Strategy<Value = Width> {
    prop::sample::select(Width::ALL.to_vec())
}

proptest! {
    #[test]
    fn block_spanning_access_matches_split_access(
        split in 1u64..16,
        data in prop::collection::vec(any::<u8>(), 16),
    ) {
        let memory = Memory::new(2 * BLOCK);
        let start = BLOCK - split;
        memory.write(start, &data).unwrap();

        let whole = memory.read_vec(start, 16).unwrap();
        let mut halves = memory.read_vec(start, split).unwrap();
        halves.extend(memory.read_vec(BLOCK, 16 - split).unwrap());
        prop_assert_eq!(&whole, &halves);
        prop_assert_eq!(whole, data);
    }

    #[test]
    fn narrow_store_keeps_wider_bits(
        initial in any::<u64>(),
        value in any::<u64>(),
        w in width(),
        index in 0u8..16,
    ) {
        let id = RegisterId::General(index);
        let mut regs = RegisterFile::default();
        regs.store(Width::W64, id, initial);
        regs.store(w, id, value);

        prop_assert_eq!(regs.load(w, id), value & w.mask());
        prop_assert_eq!(regs.load(w, id) & !w.mask(), 0);
        prop_assert_eq!(regs.load(Width::W64, id) & !w.mask(), initial & !w.mask());
    }

    #[test]
    fn pushes_pop_back_in_reverse(
        values in prop::collection::vec(any::<u64>(), 1..32),
        w in width(),
    ) {
        let mut memory = Memory::new(2 * BLOCK);
        let mut regs = RegisterFile::default();
        regs.set_special(SpecialRegister::StackBase, BLOCK);
        regs.set_special(SpecialRegister::StackPointer, BLOCK);

        for &value in &values {
            push(&mut memory, &mut regs, w, value).unwrap();
        }
        for &value in values.iter().rev() {
            prop_assert_eq!(pop(&memory, &mut regs, w, BLOCK).unwrap(), value & w.mask());
        }
        prop_assert_eq!(regs.special(SpecialRegister::StackPointer), BLOCK);
    }

    #[test]
    fn push_below_width_overflows_without_moving_sp(sp in 0u64..8) {
        let mut memory = Memory::new(BLOCK);
        let mut regs = RegisterFile::default();
        regs.set_special(SpecialRegister::StackPointer, sp);
        let result = push(&mut memory, &mut regs, Width::W64, 1);
        prop_assert_eq!(result, Err(MachineError::StackOverflow { sp, size: 8 }));
        prop_assert_eq!(regs.special(SpecialRegister::StackPointer), sp);
    }
}
