//! Instruction set: opcode table, operand model, text and binary codecs.

/// Bytes to instructions.
pub mod decode;
/// Linear disassembly listings.
pub mod disasm;
/// Text to bytes.
pub mod encode;
/// `$(...)` expression evaluator.
pub mod expr;
/// Opcode table.
pub mod opcode;
/// Operand and instruction model.
pub mod operand;
/// Encode-time operand checks.
pub mod sanity;

pub use decode::{decode_instruction, DecodeError, MAX_INSTRUCTION_BYTES};
pub use disasm::{disassemble, disassemble_memory, disassemble_one, DisassemblyRow};
pub use encode::{encode, encode_instruction, parse_instruction, parse_operand, EncodeError};
pub use expr::{evaluate, evaluate_with, ExpressionError};
pub use opcode::{Opcode, OpcodeInfo, OPCODE_TABLE};
pub use operand::{AddressTerm, Instruction, MemoryOperand, Operand, Ratio};
pub use sanity::SanityViolation;
