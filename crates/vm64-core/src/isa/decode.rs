//! Instruction bytes to [`Instruction`].

use thiserror::Error;

use crate::isa::opcode::Opcode;
use crate::isa::operand::{
    AddressTerm, Instruction, MemoryOperand, Operand, Ratio, CONSTANT_PREFIX, MEMORY_PREFIX,
    REGISTER_PREFIX,
};
use crate::{RegisterId, Width};

/// Longest possible encoding: opcode, width tag and two memory operands.
pub const MAX_INSTRUCTION_BYTES: usize = 2 + 2 * MEMORY_OPERAND_BYTES;

const CONSTANT_OPERAND_BYTES: usize = 10;
const MEMORY_OPERAND_BYTES: usize = 2 + 3 * CONSTANT_OPERAND_BYTES + 1;

/// Malformed instruction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended inside an instruction.
    #[error("instruction truncated at byte {offset}")]
    Truncated {
        /// Offset of the missing byte.
        offset: usize,
    },
    /// Opcode byte not in the table.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// Width tag other than `0x08/0x16/0x32/0x64`, or a constant not tagged 64-bit.
    #[error("invalid width tag {tag:#04x} at byte {offset}")]
    BadWidth {
        /// Tag byte.
        tag: u8,
        /// Offset of the tag.
        offset: usize,
    },
    /// Operand kind other than register, constant or memory (memory is not
    /// allowed inside memory).
    #[error("invalid operand kind {kind:#04x} at byte {offset}")]
    BadOperandKind {
        /// Kind byte.
        kind: u8,
        /// Offset of the kind byte.
        offset: usize,
    },
    /// Register index outside the general and special ranges, or a special
    /// register at a narrow width.
    #[error("invalid register index {index:#04x} at byte {offset}")]
    BadRegister {
        /// Index byte.
        index: u8,
        /// Offset of the index byte.
        offset: usize,
    },
    /// Ratio byte other than `0x01/0x02/0x04/0x08/0x16`.
    #[error("invalid ratio {ratio:#04x} at byte {offset}")]
    BadRatio {
        /// Ratio byte.
        ratio: u8,
        /// Offset of the ratio byte.
        offset: usize,
    },
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn width(&mut self) -> Result<Width, DecodeError> {
        let offset = self.pos;
        let tag = self.byte()?;
        Width::from_tag(tag).ok_or(DecodeError::BadWidth { tag, offset })
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let end = self.pos + 8;
        let raw: [u8; 8] = self
            .bytes
            .get(self.pos..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(DecodeError::Truncated {
                offset: self.bytes.len(),
            })?;
        self.pos = end;
        Ok(u64::from_le_bytes(raw))
    }

    fn term(&mut self) -> Result<AddressTerm, DecodeError> {
        let offset = self.pos;
        match self.byte()? {
            REGISTER_PREFIX => {
                let width = self.width()?;
                let index_offset = self.pos;
                let index = self.byte()?;
                let id = RegisterId::from_index(index)
                    .filter(|id| matches!(id, RegisterId::General(_)) || width == Width::W64)
                    .ok_or(DecodeError::BadRegister {
                        index,
                        offset: index_offset,
                    })?;
                Ok(AddressTerm::Register { width, id })
            }
            CONSTANT_PREFIX => {
                let tag_offset = self.pos;
                let tag = self.byte()?;
                if tag != Width::W64.tag() {
                    return Err(DecodeError::BadWidth {
                        tag,
                        offset: tag_offset,
                    });
                }
                Ok(AddressTerm::Constant(self.u64()?))
            }
            kind => Err(DecodeError::BadOperandKind { kind, offset }),
        }
    }

    fn operand(&mut self) -> Result<Operand, DecodeError> {
        if self.bytes.get(self.pos) != Some(&MEMORY_PREFIX) {
            return self.term().map(Operand::from);
        }
        self.pos += 1;
        let width = self.width()?;
        let base = self.term()?;
        let index = self.term()?;
        let displacement = self.term()?;
        let ratio_offset = self.pos;
        let ratio_byte = self.byte()?;
        let ratio = Ratio::from_tag(ratio_byte).ok_or(DecodeError::BadRatio {
            ratio: ratio_byte,
            offset: ratio_offset,
        })?;
        Ok(Operand::Memory(MemoryOperand {
            width,
            ratio,
            base,
            index,
            displacement,
        }))
    }
}

/// Decodes the instruction at the start of `bytes`.
///
/// Returns the instruction and the number of bytes it occupies.
///
/// # Errors
///
/// Returns a [`DecodeError`] locating the first malformed byte.
pub fn decode_instruction(bytes: &[u8]) -> Result<(Instruction, usize), DecodeError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let opcode_byte = cursor.byte()?;
    let opcode = Opcode::from_u8(opcode_byte).ok_or(DecodeError::UnknownOpcode(opcode_byte))?;
    let info = opcode.info();
    let width = if info.takes_width {
        Some(cursor.width()?)
    } else {
        None
    };
    let operands = (0..info.operand_count)
        .map(|_| cursor.operand())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((
        Instruction {
            opcode,
            width,
            operands,
        },
        cursor.pos,
    ))
}

#[cfg(test)]
mod tests {
    use super::{decode_instruction, DecodeError, MAX_INSTRUCTION_BYTES};
    use crate::isa::encode::encode_instruction;
    use proptest::prelude::*;
    use rstest::rstest;

    fn encoded(text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_instruction(text, &mut out).unwrap();
        out
    }

    #[rstest]
    #[case("mov .64bit <%fer0>, <$(5)>", "MOV .64bit <%FER0>, <$(0x5)>")]
    #[case("ADD .8bit <%R1>, <%R2>", "ADD .8bit <%R1>, <%R2>")]
    #[case("push .64bit <%sb>", "PUSH .64bit <%SB>")]
    #[case(
        "lea .64bit <%FER3>, <*2&16(%EXR1, $(3), %DP)>",
        "LEA .64bit <%FER3>, <*2&16(%EXR1, $(0x3), %DP)>"
    )]
    #[case("jmp <$(0xC1800)>, <$(16 * 2)>", "JMP <$(0xC1800)>, <$(0x20)>")]
    #[case("iret", "IRET")]
    #[case("outs <$(0x136)>", "OUTS <$(0x136)>")]
    fn decoded_text_is_normalized(#[case] source: &str, #[case] expected: &str) {
        let bytes = encoded(source);
        let (instruction, length) = decode_instruction(&bytes).unwrap();
        assert_eq!(length, bytes.len());
        assert_eq!(instruction.to_string(), expected);
        assert_eq!(encoded(&instruction.to_string()), bytes);
    }

    #[test]
    fn longest_form_fits_the_declared_maximum() {
        let bytes = encoded(
            "XCHG .64bit <*1&64($(1), $(2), $(3))>, <*1&64($(4), $(5), $(6))>",
        );
        assert_eq!(bytes.len(), MAX_INSTRUCTION_BYTES);
    }

    #[test]
    fn malformed_bytes_locate_the_fault() {
        assert_eq!(decode_instruction(&[]), Err(DecodeError::Truncated { offset: 0 }));
        assert_eq!(
            decode_instruction(&[0xFF]),
            Err(DecodeError::UnknownOpcode(0xFF))
        );
        assert_eq!(
            decode_instruction(&[0x20, 0x24]),
            Err(DecodeError::BadWidth {
                tag: 0x24,
                offset: 1
            })
        );
        assert_eq!(
            decode_instruction(&[0x22, 0x64, 0x07]),
            Err(DecodeError::BadOperandKind {
                kind: 0x07,
                offset: 2
            })
        );
        assert_eq!(
            decode_instruction(&[0x22, 0x08, 0x01, 0x08, 0xA0]),
            Err(DecodeError::BadRegister {
                index: 0xA0,
                offset: 4
            })
        );
        assert!(matches!(
            decode_instruction(&[0x22, 0x64, 0x02, 0x64, 1, 2]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_overrun(bytes in proptest::collection::vec(any::<u8>(), 0..80)) {
            if let Ok((_, length)) = decode_instruction(&bytes) {
                prop_assert!(length <= bytes.len());
                prop_assert!(length <= MAX_INSTRUCTION_BYTES);
            }
        }
    }
}
