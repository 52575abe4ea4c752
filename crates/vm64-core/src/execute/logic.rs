//! Bitwise logic, shifts and rotates.

use super::{operand, unsupported, ExecuteState, FlagsUpdate};
use crate::isa::{Instruction, Opcode};
use crate::{MachineError, Width, FLAG_CARRY};

/// `AND OR XOR NOT`; Carry and Overflow are cleared.
pub(super) fn bitwise(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let destination = operand(instruction, 0)?;
    let a = state.read(destination)?;
    let result = match instruction.opcode {
        Opcode::Not => !a,
        Opcode::And => a & state.read(operand(instruction, 1)?)?,
        Opcode::Or => a | state.read(operand(instruction, 1)?)?,
        Opcode::Xor => a ^ state.read(operand(instruction, 1)?)?,
        _ => return Err(unsupported(instruction)),
    } & width.mask();
    state.write(destination, result)?;
    FlagsUpdate::CarryOverflow {
        carry: false,
        overflow: false,
    }
    .apply(&mut state.regs);
    Ok(())
}

/// Shifts `value` by `count` (already reduced modulo the width, non-zero).
///
/// Returns the result and the last bit shifted out.
pub(super) fn shift(opcode: Opcode, width: Width, value: u64, count: u32, carry: bool) -> Option<(u64, bool)> {
    let mask = width.mask();
    let bits = width.bits();
    let value = value & mask;
    Some(match opcode {
        Opcode::Shl => (
            (value << count) & mask,
            (value >> (bits - count)) & 1 != 0,
        ),
        Opcode::Shr => (value >> count, (value >> (count - 1)) & 1 != 0),
        Opcode::Rol => {
            let result = ((value << count) | (value >> (bits - count))) & mask;
            (result, result & 1 != 0)
        }
        Opcode::Ror => {
            let result = ((value >> count) | (value << (bits - count))) & mask;
            (result, result & width.sign_bit() != 0)
        }
        Opcode::Rcl => {
            let (mut result, mut carry) = (value, carry);
            for _ in 0..count {
                let out = result & width.sign_bit() != 0;
                result = ((result << 1) | u64::from(carry)) & mask;
                carry = out;
            }
            (result, carry)
        }
        Opcode::Rcr => {
            let (mut result, mut carry) = (value, carry);
            for _ in 0..count {
                let out = result & 1 != 0;
                result = (result >> 1) | (u64::from(carry) << (bits - 1));
                carry = out;
            }
            (result, carry)
        }
        _ => return None,
    })
}

/// `SHL SHR ROL ROR RCL RCR`; a zero count leaves operand and flags alone.
pub(super) fn shift_rotate(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let destination = operand(instruction, 0)?;
    let value = state.read(destination)?;
    let count = (state.read(operand(instruction, 1)?)? % u64::from(width.bits())) as u32;
    if count == 0 {
        return Ok(());
    }
    let carry_in = state.regs.flag_is_set(FLAG_CARRY);
    let (result, carry) = shift(instruction.opcode, width, value, count, carry_in)
        .ok_or_else(|| unsupported(instruction))?;
    state.write(destination, result)?;
    FlagsUpdate::ShiftOut(carry).apply(&mut state.regs);
    Ok(())
}
