//! Integer arithmetic: add/subtract family, compare, multiply and divide.

use super::{operand, unsupported, ExecuteState, FlagsUpdate};
use crate::isa::{Instruction, Opcode};
use crate::{MachineError, RegisterId, Width, FLAG_CARRY};

const ACCUMULATOR: RegisterId = RegisterId::General(0);
const HIGH_HALF: RegisterId = RegisterId::General(1);

/// `a + b + carry_in` at `width`.
pub(super) fn add(width: Width, a: u64, b: u64, carry_in: bool) -> (u64, FlagsUpdate) {
    let mask = width.mask();
    let (a, b) = (a & mask, b & mask);
    let wide = u128::from(a) + u128::from(b) + u128::from(carry_in);
    let result = (wide as u64) & mask;
    let carry = wide > u128::from(mask);
    let overflow = (a ^ result) & (b ^ result) & width.sign_bit() != 0;
    (result, FlagsUpdate::CarryOverflow { carry, overflow })
}

/// `a - b - borrow_in` at `width`.
pub(super) fn sub(width: Width, a: u64, b: u64, borrow_in: bool) -> (u64, FlagsUpdate) {
    let mask = width.mask();
    let (a, b) = (a & mask, b & mask);
    let result = a.wrapping_sub(b).wrapping_sub(u64::from(borrow_in)) & mask;
    let carry = u128::from(a) < u128::from(b) + u128::from(borrow_in);
    let overflow = (a ^ b) & (a ^ result) & width.sign_bit() != 0;
    (result, FlagsUpdate::CarryOverflow { carry, overflow })
}

/// Unsigned ordering of `a` and `b`, plus the flags of `a - b`.
pub(super) fn compare(width: Width, a: u64, b: u64) -> FlagsUpdate {
    let (a, b) = (a & width.mask(), b & width.mask());
    let FlagsUpdate::CarryOverflow { carry, overflow } = sub(width, a, b, false).1 else {
        return FlagsUpdate::None;
    };
    FlagsUpdate::Compare {
        carry,
        overflow,
        equal: a == b,
        larger: a > b,
        less: a < b,
    }
}

/// `ADD ADC SUB SBB CMP`.
pub(super) fn binary(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let destination = operand(instruction, 0)?;
    let a = state.read(destination)?;
    let b = state.read(operand(instruction, 1)?)?;
    let carry = state.regs.flag_is_set(FLAG_CARRY);

    let (result, flags) = match instruction.opcode {
        Opcode::Add => add(width, a, b, false),
        Opcode::Adc => add(width, a, b, carry),
        Opcode::Sub => sub(width, a, b, false),
        Opcode::Sbb => sub(width, a, b, carry),
        Opcode::Cmp => {
            compare(width, a, b).apply(&mut state.regs);
            return Ok(());
        }
        _ => return Err(unsupported(instruction)),
    };
    state.write(destination, result)?;
    flags.apply(&mut state.regs);
    Ok(())
}

/// `NEG INC DEC`.
pub(super) fn unary(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let target = operand(instruction, 0)?;
    let value = state.read(target)?;
    let (result, flags) = match instruction.opcode {
        Opcode::Neg => sub(width, 0, value, false),
        Opcode::Inc => add(width, value, 1, false),
        Opcode::Dec => sub(width, value, 1, false),
        _ => return Err(unsupported(instruction)),
    };
    state.write(target, result)?;
    flags.apply(&mut state.regs);
    Ok(())
}

/// `MUL IMUL DIV IDIV` on the `FER0`/`FER1` pair at `width`.
pub(super) fn multiply_divide(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let mask = width.mask();
    let bits = width.bits();
    let a = state.regs.load(width, ACCUMULATOR);
    let b = state.read(operand(instruction, 0)?)? & mask;

    let (low, high, flags) = match instruction.opcode {
        Opcode::Mul => {
            let product = u128::from(a) * u128::from(b);
            let high = (product >> bits) as u64 & mask;
            let significant = high != 0;
            (
                product as u64 & mask,
                high,
                FlagsUpdate::CarryOverflow {
                    carry: significant,
                    overflow: significant,
                },
            )
        }
        Opcode::Imul => {
            let product = i128::from(width.sign_extend(a)) * i128::from(width.sign_extend(b));
            let low = product as u64 & mask;
            let significant = product != i128::from(width.sign_extend(low));
            (
                low,
                (product >> bits) as u64 & mask,
                FlagsUpdate::CarryOverflow {
                    carry: significant,
                    overflow: significant,
                },
            )
        }
        Opcode::Div => {
            if b == 0 {
                return Err(MachineError::DivisionByZero);
            }
            (a / b, a % b, FlagsUpdate::None)
        }
        Opcode::Idiv => {
            if b == 0 {
                return Err(MachineError::DivisionByZero);
            }
            let (sa, sb) = (width.sign_extend(a), width.sign_extend(b));
            (
                sa.wrapping_div(sb) as u64 & mask,
                sa.wrapping_rem(sb) as u64 & mask,
                FlagsUpdate::None,
            )
        }
        _ => return Err(unsupported(instruction)),
    };

    state.regs.store(width, ACCUMULATOR, low);
    state.regs.store(width, HIGH_HALF, high);
    flags.apply(&mut state.regs);
    Ok(())
}
