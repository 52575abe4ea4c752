//! Operand resolution against registers and memory.

use crate::isa::{AddressTerm, MemoryOperand, Operand};
use crate::memory::Bus;
use crate::{MachineError, RegisterFile};

const fn term_value(regs: &RegisterFile, term: AddressTerm) -> u64 {
    match term {
        AddressTerm::Register { width, id } => regs.load(width, id),
        AddressTerm::Constant(value) => value,
    }
}

/// `(base + index + displacement) * ratio`, wrapping. Memory operands are
/// flat: `DB` plays no part, so this is also the address they touch.
#[must_use]
pub const fn effective_address(regs: &RegisterFile, memory: &MemoryOperand) -> u64 {
    term_value(regs, memory.base)
        .wrapping_add(term_value(regs, memory.index))
        .wrapping_add(term_value(regs, memory.displacement))
        .wrapping_mul(memory.ratio.factor())
}

/// Reads an operand at its own width.
///
/// # Errors
///
/// Returns [`MachineError::IllegalMemoryAccess`] for memory operands outside
/// the address space.
pub fn read_operand(
    regs: &RegisterFile,
    bus: &impl Bus,
    operand: &Operand,
) -> Result<u64, MachineError> {
    match operand {
        Operand::Register { width, id } => Ok(regs.load(*width, *id)),
        Operand::Constant(value) => Ok(*value),
        Operand::Memory(memory) => bus.read_word(effective_address(regs, memory), memory.width),
    }
}

/// Writes an operand at its own width.
///
/// # Errors
///
/// Returns [`MachineError::IllegalInstruction`] for a constant destination and
/// [`MachineError::IllegalMemoryAccess`] for memory outside the address space.
pub fn write_operand(
    regs: &mut RegisterFile,
    bus: &mut impl Bus,
    operand: &Operand,
    value: u64,
) -> Result<(), MachineError> {
    match operand {
        Operand::Register { width, id } => {
            regs.store(*width, *id, value);
            Ok(())
        }
        Operand::Constant(_) => Err(MachineError::IllegalInstruction(format!(
            "write to constant operand <{operand}>"
        ))),
        Operand::Memory(memory) => {
            let address = effective_address(regs, memory);
            bus.write_word(address, memory.width, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{effective_address, read_operand, write_operand};
    use crate::isa::parse_operand;
    use crate::{Memory, MemoryOperand, Operand, RegisterFile, RegisterId, SpecialRegister, Width};

    fn memory_operand(text: &str) -> MemoryOperand {
        match parse_operand(text).unwrap() {
            Operand::Memory(memory) => memory,
            other => panic!("not a memory operand: {other}"),
        }
    }

    #[test]
    fn effective_address_scales_the_sum() {
        let mut regs = RegisterFile::default();
        regs.store(Width::W64, RegisterId::General(1), 3);
        regs.set_special(SpecialRegister::DataBase, 0x1000);
        let memory = memory_operand("*4&64(%FER1, $(2), $(5))");
        assert_eq!(effective_address(&regs, &memory), 40);
    }

    #[test]
    fn narrow_register_terms_use_their_view() {
        let mut regs = RegisterFile::default();
        regs.store(Width::W64, RegisterId::General(2), 0xFFFF_0010);
        let memory = memory_operand("*1&8(%R2, $(0), $(0))");
        assert_eq!(effective_address(&regs, &memory), 0x10);
    }

    #[test]
    fn memory_operands_ignore_data_base() {
        let mut regs = RegisterFile::default();
        regs.set_special(SpecialRegister::DataBase, 0x200);
        let mut memory = Memory::new(0x1000);
        let target = parse_operand("*1&16($(0x10), $(0), $(0))").unwrap();

        write_operand(&mut regs, &mut memory, &target, 0xABCD_1234).unwrap();
        assert_eq!(memory.read_value(0x10, Width::W16).unwrap(), 0x1234);
        assert_eq!(memory.read_value(0x210, Width::W16).unwrap(), 0);
        assert_eq!(read_operand(&regs, &memory, &target).unwrap(), 0x1234);
    }

    #[test]
    fn constant_destination_is_illegal() {
        let mut regs = RegisterFile::default();
        let mut memory = Memory::new(0x1000);
        assert!(write_operand(&mut regs, &mut memory, &Operand::Constant(1), 2).is_err());
    }
}
