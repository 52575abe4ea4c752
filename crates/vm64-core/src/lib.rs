//! Core machine model for the vm64 64-bit CPU emulator.

/// Fault taxonomy and runtime errors.
pub mod fault;
pub use fault::{FaultClass, FaultCode, MachineError};

/// Architectural CPU state model primitives.
pub mod state;
pub use state::{
    RegisterFile, RegisterId, RunState, SpecialRegister, Width, FLAGS_ACTIVE_MASK, FLAG_CARRY,
    FLAG_EQUAL, FLAG_INTERRUPTION_MASK, FLAG_LARGER_THAN, FLAG_LESS_THAN, FLAG_OVERFLOW,
    FRAME_WORDS, GENERAL_REGISTER_COUNT, SPECIAL_REGISTER_COUNT,
};

/// Physical memory, region map and stack helpers.
pub mod memory;
pub use memory::{
    decode_memory_region, ivt_entry_address, Bus, Memory, MemoryRegion, StagedMemory,
    BIOS_START, BLOCK_SIZE, DEFAULT_TOTAL_MEMORY, DISPLAY_START, IVT_START,
};

/// Port-mapped I/O hub and interrupt queue.
pub mod io;
pub use io::{Device, InterruptQueue, IoHub, PortBuffer, PortSet};

/// Instruction set codec.
pub mod isa;
pub use isa::{
    decode_instruction, disassemble, encode_instruction, parse_instruction, DecodeError,
    EncodeError, Instruction, MemoryOperand, Opcode, Operand,
};

/// Instruction execution pipeline.
pub mod execute;
pub use execute::{commit_execution, execute_instruction, ExecuteOutcome, ExecuteState};

/// Breakpoints, watchpoints and the debugger freeze.
pub mod debug;
pub use debug::{BreakHandler, BreakInfo, BreakReason, Condition, ConditionError, DebugController};

/// Boot loop, interrupt funnel and firmware services.
pub mod machine;
pub use machine::{Console, Context, Keyboard, Machine, NullConsole};

/// Layered machine configuration.
pub mod config;
pub use config::{sample_config, ConfigError, ConfigSources, MachineConfig, LOCAL_CONFIG_FILE};

/// Fault counters and instruction history.
pub mod diag;
pub use diag::{Diagnostics, TraceEntry};

/// Real-time clock and disk devices.
pub mod peripherals;
pub use peripherals::{DeviceError, Disk, DiskKind, RealTimeClock};

#[cfg(test)]
use tempfile as _;
