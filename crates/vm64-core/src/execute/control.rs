//! Control transfers. Targets are `(code base, ip)` operand pairs and the
//! pair is always replaced as one unit.

use super::{operand, unsupported, ExecuteOutcome, ExecuteState};
use crate::isa::{Instruction, Opcode};
use crate::{
    MachineError, RegisterFile, SpecialRegister, Width, FLAG_CARRY, FLAG_EQUAL, FLAG_LARGER_THAN,
    FLAG_LESS_THAN, FLAG_OVERFLOW, FRAME_WORDS,
};

/// Whether a conditional jump is taken under the current FLAGS.
#[must_use]
pub fn condition_holds(opcode: Opcode, regs: &RegisterFile) -> Option<bool> {
    let set = |flag| regs.flag_is_set(flag);
    Some(match opcode {
        Opcode::Je => set(FLAG_EQUAL),
        Opcode::Jne => !set(FLAG_EQUAL),
        Opcode::Jb => set(FLAG_LARGER_THAN),
        Opcode::Jl => set(FLAG_LESS_THAN),
        Opcode::Jbe => set(FLAG_EQUAL) || set(FLAG_LARGER_THAN),
        Opcode::Jle => set(FLAG_EQUAL) || set(FLAG_LESS_THAN),
        Opcode::Jc => set(FLAG_CARRY),
        Opcode::Jnc => !set(FLAG_CARRY),
        Opcode::Jo => set(FLAG_OVERFLOW),
        Opcode::Jno => !set(FLAG_OVERFLOW),
        _ => return None,
    })
}

fn target(
    state: &ExecuteState<'_>,
    instruction: &Instruction,
) -> Result<(u64, u64), MachineError> {
    Ok((
        state.read(operand(instruction, 0)?)?,
        state.read(operand(instruction, 1)?)?,
    ))
}

/// `JMP CALL RET LOOP` and the conditional jumps.
pub(super) fn transfer(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
) -> Result<(), MachineError> {
    match instruction.opcode {
        Opcode::Jmp => {
            let (cb, ip) = target(state, instruction)?;
            state.regs.set_code_location(cb, ip);
        }
        Opcode::Call => {
            let (cb, ip) = target(state, instruction)?;
            let (return_cb, return_ip) = state.regs.code_location();
            state.push(Width::W64, return_cb)?;
            state.push(Width::W64, return_ip)?;
            state.regs.set_code_location(cb, ip);
        }
        Opcode::Ret => {
            let ip = state.pop(Width::W64)?;
            let cb = state.pop(Width::W64)?;
            state.regs.set_code_location(cb, ip);
        }
        Opcode::Loop => {
            let (cb, ip) = target(state, instruction)?;
            let remaining = state.regs.general(0).wrapping_sub(1);
            state.regs.set_general(0, remaining);
            if remaining != 0 {
                state.regs.set_code_location(cb, ip);
            }
        }
        opcode => {
            let taken =
                condition_holds(opcode, &state.regs).ok_or_else(|| unsupported(instruction))?;
            if taken {
                let (cb, ip) = target(state, instruction)?;
                state.regs.set_code_location(cb, ip);
            }
        }
    }
    Ok(())
}

/// `INT n`: the vector is delivered by the machine after commit.
pub(super) fn software_interrupt(
    state: &ExecuteState<'_>,
    instruction: &Instruction,
) -> Result<ExecuteOutcome, MachineError> {
    let vector = state.read(operand(instruction, 0)?)?;
    Ok(ExecuteOutcome::Interrupt { vector })
}

/// `IRET`: pops the frame pushed at interrupt entry and restores every
/// register from it, `FLAGS` (and with it the interrupt mask) included.
pub(super) fn interrupt_return(state: &mut ExecuteState<'_>) -> Result<(), MachineError> {
    let mut frame = [0u64; FRAME_WORDS];
    for slot in frame.iter_mut().rev() {
        *slot = state.pop(Width::W64)?;
    }
    let restored = RegisterFile::from_frame(&frame);
    log::trace!(
        "iret to {:#x}:{:#x}, sp={:#x}",
        restored.special(SpecialRegister::CodeBase),
        restored.ip(),
        restored.special(SpecialRegister::StackPointer)
    );
    state.regs = restored;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::condition_holds;
    use crate::isa::Opcode;
    use crate::{RegisterFile, FLAG_CARRY, FLAG_EQUAL, FLAG_LESS_THAN};

    #[test]
    fn conditional_jump_table() {
        let mut regs = RegisterFile::default();
        regs.set_flag(FLAG_LESS_THAN, true);
        assert_eq!(condition_holds(Opcode::Jl, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Jle, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Jb, &regs), Some(false));
        assert_eq!(condition_holds(Opcode::Jbe, &regs), Some(false));
        assert_eq!(condition_holds(Opcode::Jne, &regs), Some(true));

        regs.set_flag(FLAG_EQUAL, true);
        regs.set_flag(FLAG_CARRY, true);
        assert_eq!(condition_holds(Opcode::Je, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Jbe, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Jc, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Jnc, &regs), Some(false));
        assert_eq!(condition_holds(Opcode::Jno, &regs), Some(true));
        assert_eq!(condition_holds(Opcode::Mov, &regs), None);
    }
}
