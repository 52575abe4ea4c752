//! Port I/O. Devices observe requests immediately; only register and
//! memory results are staged.

use super::{operand, unsupported, ExecuteState};
use crate::isa::{Instruction, Opcode};
use crate::memory::Bus;
use crate::{MachineError, SpecialRegister, Width};

fn block_address(state: &ExecuteState<'_>) -> u64 {
    state
        .regs
        .special(SpecialRegister::DataBase)
        .wrapping_add(state.regs.special(SpecialRegister::DataPointer))
}

/// `IN OUT INS OUTS`.
pub(super) fn transfer(
    state: &mut ExecuteState<'_>,
    instruction: &Instruction,
    width: Width,
) -> Result<(), MachineError> {
    let port = state.read(operand(instruction, 0)?)?;
    match instruction.opcode {
        Opcode::In => {
            let value = state.io.input_u64(port)?;
            state.write(operand(instruction, 1)?, value & width.mask())
        }
        Opcode::Out => {
            let value = state.read(operand(instruction, 1)?)? & width.mask();
            state.io.output_u64(port, value)
        }
        Opcode::Ins => {
            let data = state.io.ins(port)?;
            let expected = state.regs.general(0);
            if data.len() as u64 != expected {
                return Err(MachineError::DeviceIo {
                    port,
                    reason: format!("expected {expected} bytes, device produced {}", data.len()),
                });
            }
            let address = block_address(state);
            state.memory.write_bytes(address, &data)
        }
        Opcode::Outs => {
            let data = state
                .memory
                .read_range(block_address(state), state.regs.general(0))?;
            state.io.outs(port, &data)
        }
        _ => Err(unsupported(instruction)),
    }
}
