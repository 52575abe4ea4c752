//! Static per-opcode operand checks run at encode time.

use thiserror::Error;

use crate::isa::opcode::Opcode;
use crate::isa::operand::{Instruction, Operand};

/// An operand combination the machine can never execute meaningfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanityViolation {
    /// A written operand is an immediate.
    #[error("{mnemonic}: operand {position} is written and cannot be a constant")]
    ConstantDestination {
        /// Instruction mnemonic.
        mnemonic: &'static str,
        /// Zero-based operand position.
        position: usize,
    },
    /// A control-transfer or address operand is narrower than 64 bits.
    #[error("{mnemonic}: operand {position} cannot hold a 64-bit address")]
    NarrowAddress {
        /// Instruction mnemonic.
        mnemonic: &'static str,
        /// Zero-based operand position.
        position: usize,
    },
    /// `LEA` with a non-memory source.
    #[error("LEA: second operand must be a memory reference")]
    LeaSourceNotMemory,
    /// An operand width disagrees with the instruction width.
    #[error("{mnemonic}: operand {position} is {found}-bit but the instruction is {expected}-bit")]
    WidthMismatch {
        /// Instruction mnemonic.
        mnemonic: &'static str,
        /// Zero-based operand position.
        position: usize,
        /// Operand width in bits.
        found: u32,
        /// Instruction width in bits.
        expected: u32,
    },
}

/// Operand positions an opcode writes.
#[must_use]
pub const fn written_operands(opcode: Opcode) -> &'static [usize] {
    match opcode {
        Opcode::Xchg => &[0, 1],
        Opcode::In => &[1],
        Opcode::Mov
        | Opcode::Pop
        | Opcode::Lea
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Not
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Rol
        | Opcode::Ror
        | Opcode::Rcl
        | Opcode::Rcr
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Adc
        | Opcode::Sbb
        | Opcode::Neg
        | Opcode::Inc
        | Opcode::Dec => &[0],
        _ => &[],
    }
}

/// Checks one parsed instruction.
///
/// # Errors
///
/// Returns the first [`SanityViolation`] found, scanning operands in order.
pub fn check(instruction: &Instruction) -> Result<(), SanityViolation> {
    let opcode = instruction.opcode;
    let mnemonic = opcode.mnemonic();
    let operands = &instruction.operands;

    for &position in written_operands(opcode) {
        if operands.get(position).is_some_and(Operand::is_constant) {
            return Err(SanityViolation::ConstantDestination { mnemonic, position });
        }
    }

    if opcode.is_jump() {
        if let Some(position) = operands.iter().position(|op| !op.is_64bit_capable()) {
            return Err(SanityViolation::NarrowAddress { mnemonic, position });
        }
    }

    if opcode == Opcode::Lea {
        if !operands.get(1).is_some_and(Operand::is_memory) {
            return Err(SanityViolation::LeaSourceNotMemory);
        }
        if !operands.first().is_some_and(Operand::is_64bit_capable) {
            return Err(SanityViolation::NarrowAddress {
                mnemonic,
                position: 0,
            });
        }
    }

    if let Some(width) = instruction.width {
        for (position, operand) in operands.iter().enumerate() {
            let exempt = operand.is_constant() || (opcode == Opcode::Lea && position == 1);
            if !exempt && operand.width() != width {
                return Err(SanityViolation::WidthMismatch {
                    mnemonic,
                    position,
                    found: operand.width().bits(),
                    expected: width.bits(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{check, SanityViolation};
    use crate::isa::opcode::Opcode;
    use crate::isa::operand::{AddressTerm, Instruction, MemoryOperand, Operand, Ratio};
    use crate::{RegisterId, Width};

    fn reg(width: Width, index: u8) -> Operand {
        Operand::Register {
            width,
            id: RegisterId::General(index),
        }
    }

    fn mem(width: Width) -> Operand {
        Operand::Memory(MemoryOperand {
            width,
            ratio: Ratio::X1,
            base: AddressTerm::Constant(0),
            index: AddressTerm::Constant(0),
            displacement: AddressTerm::Constant(0x40),
        })
    }

    fn instruction(opcode: Opcode, width: Option<Width>, operands: Vec<Operand>) -> Instruction {
        Instruction {
            opcode,
            width,
            operands,
        }
    }

    #[test]
    fn constant_destinations_are_rejected() {
        let mov = instruction(
            Opcode::Mov,
            Some(Width::W64),
            vec![Operand::Constant(1), reg(Width::W64, 0)],
        );
        assert_eq!(
            check(&mov),
            Err(SanityViolation::ConstantDestination {
                mnemonic: "MOV",
                position: 0
            })
        );

        let xchg = instruction(
            Opcode::Xchg,
            Some(Width::W64),
            vec![reg(Width::W64, 0), Operand::Constant(1)],
        );
        assert!(matches!(
            check(&xchg),
            Err(SanityViolation::ConstantDestination { position: 1, .. })
        ));

        let input = instruction(
            Opcode::In,
            Some(Width::W64),
            vec![Operand::Constant(0x70), Operand::Constant(0)],
        );
        assert!(check(&input).is_err());
    }

    #[test]
    fn jump_targets_must_be_64bit_capable() {
        let narrow = instruction(
            Opcode::Jmp,
            None,
            vec![Operand::Constant(0), reg(Width::W32, 1)],
        );
        assert_eq!(
            check(&narrow),
            Err(SanityViolation::NarrowAddress {
                mnemonic: "JMP",
                position: 1
            })
        );
        let wide = instruction(
            Opcode::Call,
            None,
            vec![mem(Width::W64), reg(Width::W64, 1)],
        );
        assert_eq!(check(&wide), Ok(()));
    }

    #[test]
    fn lea_needs_memory_source_and_wide_destination() {
        let bad_source = instruction(
            Opcode::Lea,
            Some(Width::W64),
            vec![reg(Width::W64, 0), reg(Width::W64, 1)],
        );
        assert_eq!(check(&bad_source), Err(SanityViolation::LeaSourceNotMemory));

        let ok = instruction(
            Opcode::Lea,
            Some(Width::W64),
            vec![reg(Width::W64, 0), mem(Width::W8)],
        );
        assert_eq!(check(&ok), Ok(()));
    }

    #[test]
    fn operand_widths_must_match_instruction_width() {
        let mixed = instruction(
            Opcode::Add,
            Some(Width::W32),
            vec![reg(Width::W32, 0), reg(Width::W8, 1)],
        );
        assert_eq!(
            check(&mixed),
            Err(SanityViolation::WidthMismatch {
                mnemonic: "ADD",
                position: 1,
                found: 8,
                expected: 32
            })
        );
    }
}
