//! Operand and instruction model shared by the encoder, decoder and engine.

use std::fmt;

use crate::isa::opcode::Opcode;
use crate::{RegisterId, Width};

/// Operand kind tag: register.
pub const REGISTER_PREFIX: u8 = 0x01;
/// Operand kind tag: constant.
pub const CONSTANT_PREFIX: u8 = 0x02;
/// Operand kind tag: memory reference.
pub const MEMORY_PREFIX: u8 = 0x03;

/// Scale applied to a memory operand's summed address terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ratio {
    /// ×1
    X1,
    /// ×2
    X2,
    /// ×4
    X4,
    /// ×8
    X8,
    /// ×16
    X16,
}

impl Ratio {
    /// Encoded ratio byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::X1 => 0x01,
            Self::X2 => 0x02,
            Self::X4 => 0x04,
            Self::X8 => 0x08,
            Self::X16 => 0x16,
        }
    }

    /// Decodes a ratio byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::X1),
            0x02 => Some(Self::X2),
            0x04 => Some(Self::X4),
            0x08 => Some(Self::X8),
            0x16 => Some(Self::X16),
            _ => None,
        }
    }

    /// Multiplier.
    #[must_use]
    pub const fn factor(self) -> u64 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
        }
    }

    /// Parses the multiplier as written in assembly.
    #[must_use]
    pub const fn from_factor(factor: u64) -> Option<Self> {
        match factor {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            4 => Some(Self::X4),
            8 => Some(Self::X8),
            16 => Some(Self::X16),
            _ => None,
        }
    }
}

/// Register or constant term inside a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressTerm {
    /// Register read at its own width.
    Register {
        /// View width.
        width: Width,
        /// Register.
        id: RegisterId,
    },
    /// Immediate 64-bit value.
    Constant(u64),
}

/// `*ratio&width(base, index, displacement)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryOperand {
    /// Access width.
    pub width: Width,
    /// Scale applied to the summed terms.
    pub ratio: Ratio,
    /// First term.
    pub base: AddressTerm,
    /// Second term.
    pub index: AddressTerm,
    /// Third term.
    pub displacement: AddressTerm,
}

/// One decoded instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Register view.
    Register {
        /// View width.
        width: Width,
        /// Register.
        id: RegisterId,
    },
    /// Immediate 64-bit value.
    Constant(u64),
    /// Memory reference relative to `DB`.
    Memory(MemoryOperand),
}

impl Operand {
    /// Returns `true` for immediates.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns `true` for memory references.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Width the operand naturally carries; constants are 64-bit.
    #[must_use]
    pub const fn width(&self) -> Width {
        match self {
            Self::Register { width, .. } => *width,
            Self::Constant(_) => Width::W64,
            Self::Memory(memory) => memory.width,
        }
    }

    /// Whether the operand can hold a full 64-bit address: a 64-bit register,
    /// a 64-bit memory reference or a constant.
    #[must_use]
    pub const fn is_64bit_capable(&self) -> bool {
        matches!(self.width(), Width::W64)
    }
}

impl From<AddressTerm> for Operand {
    fn from(term: AddressTerm) -> Self {
        match term {
            AddressTerm::Register { width, id } => Self::Register { width, id },
            AddressTerm::Constant(value) => Self::Constant(value),
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Opcode.
    pub opcode: Opcode,
    /// Operation width, present exactly when the opcode takes one.
    pub width: Option<Width>,
    /// Operands in source order.
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Operation width, defaulting to 64 bits for width-less opcodes.
    #[must_use]
    pub fn width_or_64(&self) -> Width {
        self.width.unwrap_or(Width::W64)
    }
}

fn write_register(f: &mut fmt::Formatter<'_>, width: Width, id: RegisterId) -> fmt::Result {
    match id {
        RegisterId::General(index) => write!(f, "%{}{index}", width.register_prefix()),
        RegisterId::Special(special) => write!(f, "%{}", special.name()),
    }
}

impl fmt::Display for AddressTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Register { width, id } => write_register(f, width, id),
            Self::Constant(value) => write!(f, "$({value:#X})"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register { width, id } => write_register(f, *width, *id),
            Self::Constant(value) => write!(f, "$({value:#X})"),
            Self::Memory(memory) => write!(
                f,
                "*{}&{}({}, {}, {})",
                memory.ratio.factor(),
                memory.width.bits(),
                memory.base,
                memory.index,
                memory.displacement
            ),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        if let Some(width) = self.width {
            write!(f, " {}", width.suffix())?;
        }
        for (position, operand) in self.operands.iter().enumerate() {
            let separator = if position == 0 { " " } else { ", " };
            write!(f, "{separator}<{operand}>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressTerm, Instruction, MemoryOperand, Operand, Ratio};
    use crate::isa::opcode::Opcode;
    use crate::{RegisterId, SpecialRegister, Width};

    #[test]
    fn ratio_tags_roundtrip() {
        for ratio in [Ratio::X1, Ratio::X2, Ratio::X4, Ratio::X8, Ratio::X16] {
            assert_eq!(Ratio::from_tag(ratio.tag()), Some(ratio));
            assert_eq!(Ratio::from_factor(ratio.factor()), Some(ratio));
        }
        assert_eq!(Ratio::from_tag(0x10), None);
        assert_eq!(Ratio::from_factor(3), None);
    }

    #[test]
    fn instruction_text_is_canonical() {
        let instruction = Instruction {
            opcode: Opcode::Mov,
            width: Some(Width::W64),
            operands: vec![
                Operand::Memory(MemoryOperand {
                    width: Width::W64,
                    ratio: Ratio::X8,
                    base: AddressTerm::Register {
                        width: Width::W64,
                        id: RegisterId::Special(SpecialRegister::DataPointer),
                    },
                    index: AddressTerm::Register {
                        width: Width::W64,
                        id: RegisterId::General(2),
                    },
                    displacement: AddressTerm::Constant(0x10),
                }),
                Operand::Constant(5),
            ],
        };
        assert_eq!(
            instruction.to_string(),
            "MOV .64bit <*8&64(%DP, %FER2, $(0x10))>, <$(0x5)>"
        );
    }

    #[test]
    fn capability_for_addresses_follows_width() {
        let narrow = Operand::Register {
            width: Width::W32,
            id: RegisterId::General(0),
        };
        assert!(!narrow.is_64bit_capable());
        assert!(Operand::Constant(1).is_64bit_capable());
    }
}
