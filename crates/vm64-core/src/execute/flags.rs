//! FLAGS update behaviors for different instruction classes.

use crate::{
    RegisterFile, FLAG_CARRY, FLAG_EQUAL, FLAG_LARGER_THAN, FLAG_LESS_THAN, FLAG_OVERFLOW,
};

/// Describes how FLAGS should be updated after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change to FLAGS.
    #[default]
    None,
    /// Arithmetic and logic result flags.
    CarryOverflow {
        /// Unsigned carry or borrow out of the width.
        carry: bool,
        /// Signed overflow at the width.
        overflow: bool,
    },
    /// `CMP`: subtraction flags plus the three ordering flags.
    Compare {
        /// Borrow of `a - b`.
        carry: bool,
        /// Signed overflow of `a - b`.
        overflow: bool,
        /// `a == b`.
        equal: bool,
        /// `a > b` unsigned.
        larger: bool,
        /// `a < b` unsigned.
        less: bool,
    },
    /// Shift or rotate: last bit out into Carry, Overflow cleared.
    ShiftOut(bool),
}

impl FlagsUpdate {
    /// Writes the update into `regs`, leaving unrelated bits alone.
    pub const fn apply(self, regs: &mut RegisterFile) {
        match self {
            Self::None => {}
            Self::CarryOverflow { carry, overflow } => {
                regs.set_flag(FLAG_CARRY, carry);
                regs.set_flag(FLAG_OVERFLOW, overflow);
            }
            Self::Compare {
                carry,
                overflow,
                equal,
                larger,
                less,
            } => {
                regs.set_flag(FLAG_CARRY, carry);
                regs.set_flag(FLAG_OVERFLOW, overflow);
                regs.set_flag(FLAG_EQUAL, equal);
                regs.set_flag(FLAG_LARGER_THAN, larger);
                regs.set_flag(FLAG_LESS_THAN, less);
            }
            Self::ShiftOut(carry) => {
                regs.set_flag(FLAG_CARRY, carry);
                regs.set_flag(FLAG_OVERFLOW, false);
            }
        }
    }
}
