//! Instruction execution pipeline.
//!
//! A handler runs against an [`ExecuteState`]: a working copy of the
//! register file plus a [`StagedMemory`]. Nothing becomes visible until
//! [`commit_execution`]:
//! 1. Read source operands
//! 2. Compute result, effective address or control target
//! 3. Stage memory writes (range-checked as they are staged)
//! 4. Write destination registers and FLAGS in the working copy
//! 5. Commit memory, then registers
//!
//! A handler error drops the state, so faulting instructions produce no
//! partial register or memory effects. Port requests are the exception:
//! devices see them as they happen.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

mod arith;
mod control;
mod data;
mod flags;
mod logic;
mod operands;
mod ports;

pub use control::condition_holds;
pub use flags::FlagsUpdate;
pub use operands::{effective_address, read_operand, write_operand};

use crate::isa::{Instruction, Opcode, Operand};
use crate::memory::{self, StagedMemory};
use crate::{IoHub, MachineError, Memory, RegisterFile, Width, FLAG_INTERRUPTION_MASK};

/// Outcome of executing a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Instruction retired; continue with the next one.
    Retired,
    /// `HLT` retired.
    Halted,
    /// `INT n` retired; the vector must be delivered.
    Interrupt {
        /// Requested vector.
        vector: u64,
    },
    /// `INT3` retired.
    DebugTrap,
    /// `IRET` retired; the interrupted context is back in place.
    InterruptReturn,
}

/// Side effects accumulated while one instruction executes.
#[derive(Debug)]
pub struct ExecuteState<'a> {
    /// Working copy of the register file.
    pub regs: RegisterFile,
    /// Staged memory writes.
    pub memory: StagedMemory<'a>,
    /// Port bus.
    pub io: &'a IoHub,
    /// Highest value `SP` may reach by popping.
    pub stack_size: u64,
}

impl<'a> ExecuteState<'a> {
    /// Starts executing on top of `regs` with a stack of `stack_size` bytes.
    #[must_use]
    pub const fn new(
        regs: RegisterFile,
        memory: &'a Memory,
        io: &'a IoHub,
        stack_size: u64,
    ) -> Self {
        Self {
            regs,
            memory: StagedMemory::new(memory),
            io,
            stack_size,
        }
    }

    fn read(&self, operand: &Operand) -> Result<u64, MachineError> {
        read_operand(&self.regs, &self.memory, operand)
    }

    fn write(&mut self, operand: &Operand, value: u64) -> Result<(), MachineError> {
        write_operand(&mut self.regs, &mut self.memory, operand, value)
    }

    fn push(&mut self, width: Width, value: u64) -> Result<(), MachineError> {
        memory::push(&mut self.memory, &mut self.regs, width, value)
    }

    fn pop(&mut self, width: Width) -> Result<u64, MachineError> {
        memory::pop(&self.memory, &mut self.regs, width, self.stack_size)
    }
}

fn operand(instruction: &Instruction, position: usize) -> Result<&Operand, MachineError> {
    instruction.operands.get(position).ok_or_else(|| {
        MachineError::IllegalInstruction(format!(
            "{} is missing operand {position}",
            instruction.opcode.mnemonic()
        ))
    })
}

fn unsupported(instruction: &Instruction) -> MachineError {
    MachineError::IllegalInstruction(format!("no handler for {}", instruction.opcode.mnemonic()))
}

/// Executes one decoded instruction against `state`.
///
/// `state.regs` must already hold the instruction pointer of the *next*
/// instruction, which is what `CALL` saves.
///
/// # Errors
///
/// Returns the [`MachineError`] the instruction raised; `state` must then be
/// dropped without committing.
pub fn execute_instruction(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
) -> Result<ExecuteOutcome, MachineError> {
    let width = instruction.width_or_64();
    match instruction.opcode {
        Opcode::Nop => {}
        Opcode::Add | Opcode::Adc | Opcode::Sub | Opcode::Sbb | Opcode::Cmp => {
            arith::binary(state, instruction, width)?;
        }
        Opcode::Neg | Opcode::Inc | Opcode::Dec => arith::unary(state, instruction, width)?,
        Opcode::Mul | Opcode::Imul | Opcode::Div | Opcode::Idiv => {
            arith::multiply_divide(state, instruction, width)?;
        }
        Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Not => {
            logic::bitwise(state, instruction, width)?;
        }
        Opcode::Shl | Opcode::Shr | Opcode::Rol | Opcode::Ror | Opcode::Rcl | Opcode::Rcr => {
            logic::shift_rotate(state, instruction, width)?;
        }
        Opcode::Mov | Opcode::Xchg | Opcode::Lea => data::transfer(state, instruction, width)?,
        Opcode::Push
        | Opcode::Pop
        | Opcode::PushAll
        | Opcode::PopAll
        | Opcode::Enter
        | Opcode::Leave => data::stack(state, instruction, width)?,
        Opcode::Movs => data::block_copy(state)?,
        Opcode::Jmp
        | Opcode::Call
        | Opcode::Ret
        | Opcode::Loop
        | Opcode::Je
        | Opcode::Jne
        | Opcode::Jb
        | Opcode::Jl
        | Opcode::Jbe
        | Opcode::Jle
        | Opcode::Jc
        | Opcode::Jnc
        | Opcode::Jo
        | Opcode::Jno => control::transfer(state, instruction)?,
        Opcode::Int => return control::software_interrupt(state, instruction),
        Opcode::Int3 => return Ok(ExecuteOutcome::DebugTrap),
        Opcode::Iret => {
            control::interrupt_return(state)?;
            return Ok(ExecuteOutcome::InterruptReturn);
        }
        Opcode::Hlt => return Ok(ExecuteOutcome::Halted),
        Opcode::Igni => state.regs.set_flag(FLAG_INTERRUPTION_MASK, true),
        Opcode::Alwi => state.regs.set_flag(FLAG_INTERRUPTION_MASK, false),
        Opcode::In | Opcode::Out | Opcode::Ins | Opcode::Outs => {
            ports::transfer(state, instruction, width)?;
        }
    }
    Ok(ExecuteOutcome::Retired)
}

/// Makes the accumulated effects visible: memory first, then registers.
///
/// # Errors
///
/// Returns [`MachineError::IllegalMemoryAccess`] if a staged write no longer
/// fits; registers are left untouched in that case.
pub fn commit_execution(state: ExecuteState<'_>, regs: &mut RegisterFile) -> Result<(), MachineError> {
    let ExecuteState {
        regs: updated,
        memory,
        ..
    } = state;
    memory.commit()?;
    *regs = updated;
    Ok(())
}
