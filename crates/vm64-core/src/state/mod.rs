//! Architectural CPU state model primitives.

/// Register file, width views and flag bits.
pub mod registers;
/// Boot-loop execution state.
pub mod run_state;

pub use registers::{
    RegisterFile, RegisterId, SpecialRegister, Width, FLAGS_ACTIVE_MASK, FLAG_CARRY, FLAG_EQUAL,
    FLAG_INTERRUPTION_MASK, FLAG_LARGER_THAN, FLAG_LESS_THAN, FLAG_OVERFLOW, FRAME_WORDS,
    GENERAL_REGISTER_COUNT, SPECIAL_REGISTER_COUNT,
};
pub use run_state::RunState;
