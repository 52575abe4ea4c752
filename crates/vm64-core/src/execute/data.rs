//! Data movement and stack frames. None of these touch FLAGS.

use super::{operand, unsupported, ExecuteState};
use crate::execute::operands::effective_address;
use crate::isa::{Instruction, Opcode, Operand};
use crate::memory::Bus;
use crate::{MachineError, SpecialRegister, Width, GENERAL_REGISTER_COUNT};

/// `MOV XCHG LEA`.
pub(super) fn transfer(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let first = operand(instruction, 0)?;
    let second = operand(instruction, 1)?;
    match instruction.opcode {
        Opcode::Mov => {
            let value = state.read(second)? & width.mask();
            state.write(first, value)
        }
        Opcode::Xchg => {
            let a = state.read(first)? & width.mask();
            let b = state.read(second)? & width.mask();
            state.write(first, b)?;
            state.write(second, a)
        }
        Opcode::Lea => {
            let Operand::Memory(memory) = second else {
                return Err(MachineError::IllegalInstruction(
                    "LEA source is not a memory operand".into(),
                ));
            };
            let address = effective_address(&state.regs, memory);
            state.write(first, address)
        }
        _ => Err(unsupported(instruction)),
    }
}

/// `PUSH POP PUSHALL POPALL ENTER LEAVE`.
pub(super) fn stack(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    match instruction.opcode {
        Opcode::Push => {
            let value = state.read(operand(instruction, 0)?)?;
            state.push(width, value)
        }
        Opcode::Pop => {
            let value = state.pop(width)?;
            state.write(operand(instruction, 0)?, value)
        }
        Opcode::PushAll => (0..GENERAL_REGISTER_COUNT).try_for_each(|index| {
            let value = state.regs.general(index);
            state.push(Width::W64, value)
        }),
        Opcode::PopAll => (0..GENERAL_REGISTER_COUNT).rev().try_for_each(|index| {
            let value = state.pop(Width::W64)?;
            state.regs.set_general(index, value);
            Ok(())
        }),
        Opcode::Enter => {
            let size = state.read(operand(instruction, 0)?)? & width.mask();
            enter(state, size)
        }
        Opcode::Leave => leave(state),
        _ => Err(unsupported(instruction)),
    }
}

/// Reserves `size` bytes of locals below `SP` and records the size in `CPS`.
/// `SB` stays put, so later pushes land below the locals.
fn enter(state: &mut ExecuteState<'_>, size: u64) -> Result<(), MachineError> {
    let sp = state.regs.special(SpecialRegister::StackPointer);
    let below = sp
        .checked_sub(size)
        .ok_or(MachineError::StackOverflow { sp, size })?;
    state.regs.set_special(SpecialRegister::StackPointer, below);
    state
        .regs
        .set_special(SpecialRegister::ProcedureFrameSize, size);
    Ok(())
}

/// Releases the locals reserved by `ENTER` and clears `CPS`.
fn leave(state: &mut ExecuteState<'_>) -> Result<(), MachineError> {
    let sp = state.regs.special(SpecialRegister::StackPointer);
    let cps = state.regs.special(SpecialRegister::ProcedureFrameSize);
    state
        .regs
        .set_special(SpecialRegister::StackPointer, sp.wrapping_add(cps));
    state
        .regs
        .set_special(SpecialRegister::ProcedureFrameSize, 0);
    Ok(())
}

/// `MOVS`: copies `FER0` bytes from `EB + EP` to `DB + DP`.
pub(super) fn block_copy(state: &mut ExecuteState<'_>) -> Result<(), MachineError> {
    let regs = &state.regs;
    let length = regs.general(0);
    let source = regs
        .special(SpecialRegister::ExtendedBase)
        .wrapping_add(regs.special(SpecialRegister::ExtendedPointer));
    let destination = regs
        .special(SpecialRegister::DataBase)
        .wrapping_add(regs.special(SpecialRegister::DataPointer));
    let bytes = state.memory.read_range(source, length)?;
    state.memory.write_bytes(destination, &bytes)
}
