//! Point-in-time machine snapshot for debuggers and fatal dumps.

use std::fmt;

use crate::diag::TraceEntry;
use crate::{
    RegisterFile, RunState, SpecialRegister, FLAG_CARRY, FLAG_EQUAL, FLAG_INTERRUPTION_MASK,
    FLAG_LARGER_THAN, FLAG_LESS_THAN, FLAG_OVERFLOW, GENERAL_REGISTER_COUNT,
};

const FLAG_NAMES: [(u64, char); 6] = [
    (FLAG_CARRY, 'C'),
    (FLAG_OVERFLOW, 'O'),
    (FLAG_EQUAL, 'E'),
    (FLAG_LARGER_THAN, 'B'),
    (FLAG_LESS_THAN, 'L'),
    (FLAG_INTERRUPTION_MASK, 'I'),
];

/// Registers, a memory window and recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Register file.
    pub registers: RegisterFile,
    /// Boot-loop state.
    pub run_state: RunState,
    /// First address of `window`.
    pub window_start: u64,
    /// Memory bytes from `window_start`; shorter when the window ran past
    /// the end of memory.
    pub window: Vec<u8>,
    /// Recently executed instructions, oldest first.
    pub recent: Vec<TraceEntry>,
}

impl Context {
    /// Flag letters, `-` for clear ones.
    #[must_use]
    pub fn flag_string(&self) -> String {
        FLAG_NAMES
            .iter()
            .map(|&(flag, name)| {
                if self.registers.flag_is_set(flag) {
                    name
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = &self.registers;
        writeln!(f, "state: {:?}", self.run_state)?;
        for row in (0..GENERAL_REGISTER_COUNT).step_by(4) {
            for index in row..row + 4 {
                write!(f, "FER{index:<2} = {:#018x}  ", regs.general(index))?;
            }
            writeln!(f)?;
        }
        for (i, reg) in SpecialRegister::ALL.iter().enumerate() {
            write!(f, "{:<3} = {:#018x}  ", reg.name(), regs.special(*reg))?;
            if i % 4 == 3 {
                writeln!(f)?;
            }
        }
        writeln!(
            f,
            "IP  = {:#018x}  FLAGS = {:#x} [{}]",
            regs.ip(),
            regs.flags(),
            self.flag_string()
        )?;

        let mut address = self.window_start;
        for line in self.window.chunks(16) {
            write!(f, "{address:#012x}:")?;
            for byte in line {
                write!(f, " {byte:02x}")?;
            }
            writeln!(f)?;
            address = address.wrapping_add(16);
        }

        if !self.recent.is_empty() {
            writeln!(f, "recent instructions:")?;
            for entry in &self.recent {
                writeln!(f, "  {entry}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::diag::TraceEntry;
    use crate::{RegisterFile, RunState, FLAG_CARRY, FLAG_INTERRUPTION_MASK};

    #[test]
    fn dump_lists_registers_window_and_history() {
        let mut registers = RegisterFile::default();
        registers.set_general(3, 0xBEEF);
        registers.set_flag(FLAG_CARRY, true);
        registers.set_flag(FLAG_INTERRUPTION_MASK, true);
        let context = Context {
            registers,
            run_state: RunState::Running,
            window_start: 0x100,
            window: vec![0xAA; 20],
            recent: vec![TraceEntry {
                code_base: 0,
                ip: 4,
                text: "HLT".into(),
            }],
        };

        assert_eq!(context.flag_string(), "C----I");
        let dump = context.to_string();
        assert!(dump.contains("FER3  = 0x000000000000beef"));
        assert!(dump.contains("CPS = "));
        assert!(dump.contains("0x0000000110: aa aa aa aa"));
        assert!(dump.contains("0x0:0x4  HLT"));
    }
}
