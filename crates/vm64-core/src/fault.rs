//! CPU exception vectors and the runtime error taxonomy that feeds them.

use thiserror::Error;

/// Fault classes used for diagnostics aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// Unrecoverable machine condition.
    Fatal,
    /// Arithmetic unit fault.
    Arithmetic,
    /// Port-mapped device fault.
    Device,
    /// Debug trap.
    Debug,
    /// Interrupt dispatch path violation.
    Dispatch,
    /// Memory or stack violation.
    Memory,
    /// Instruction stream could not be decoded or executed.
    Decode,
}

/// The eight architectural exception vectors (`0x00..=0x07`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum FaultCode {
    /// Unrecoverable condition; the machine stops.
    #[error("fatal")]
    Fatal = 0x00,
    /// Integer division by zero.
    #[error("division by zero")]
    DivisionByZero = 0x01,
    /// Device rejected a request or no device owns the port.
    #[error("i/o error")]
    IoError = 0x02,
    /// Debug trap raised by `INT3`.
    #[error("debug")]
    Debug = 0x03,
    /// Interrupt number or vector entry unusable.
    #[error("bad interruption")]
    BadInterruption = 0x04,
    /// Memory access outside the address space.
    #[error("abort")]
    Abort = 0x05,
    /// Unknown opcode or malformed operand encoding.
    #[error("illegal instruction")]
    IllegalInstruction = 0x06,
    /// Push below the stack base or pop past the stack top.
    #[error("stack overflow")]
    StackOverflow = 0x07,
}

impl FaultCode {
    /// Interrupt vector number for this fault.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts an interrupt vector number back into an exception.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Fatal),
            0x01 => Some(Self::DivisionByZero),
            0x02 => Some(Self::IoError),
            0x03 => Some(Self::Debug),
            0x04 => Some(Self::BadInterruption),
            0x05 => Some(Self::Abort),
            0x06 => Some(Self::IllegalInstruction),
            0x07 => Some(Self::StackOverflow),
            _ => None,
        }
    }

    /// Returns the diagnostics fault class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::Fatal => FaultClass::Fatal,
            Self::DivisionByZero => FaultClass::Arithmetic,
            Self::IoError => FaultClass::Device,
            Self::Debug => FaultClass::Debug,
            Self::BadInterruption => FaultClass::Dispatch,
            Self::Abort | Self::StackOverflow => FaultClass::Memory,
            Self::IllegalInstruction => FaultClass::Decode,
        }
    }

    /// Faults that stop the machine instead of entering a handler.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Runtime error raised while executing one instruction or delivering a trap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// Access range falls outside `0..TotalMemory`.
    #[error("illegal memory access at {address:#x} (+{length})")]
    IllegalMemoryAccess {
        /// First byte of the rejected access.
        address: u64,
        /// Length of the rejected access.
        length: u64,
    },
    /// Push below the stack base or pop beyond the stack region.
    #[error("stack overflow (sp={sp:#x}, size={size})")]
    StackOverflow {
        /// Stack pointer at the time of the access.
        sp: u64,
        /// Width of the value in bytes.
        size: u64,
    },
    /// Device refused a port request.
    #[error("device i/o error on port {port:#x}: {reason}")]
    DeviceIo {
        /// Port involved.
        port: u64,
        /// Short description.
        reason: String,
    },
    /// No registered device owns the port.
    #[error("no device on port {port:#x}")]
    NoSuchDevice {
        /// Port involved.
        port: u64,
    },
    /// Interrupt number cannot be used.
    #[error("bad interruption {vector:#x}")]
    BadInterruption {
        /// Requested vector.
        vector: u64,
    },
    /// Vector table entry lies beyond the reserved table.
    #[error("interruption {vector:#x} out of vector table range")]
    InterruptionOutOfRange {
        /// Requested vector.
        vector: u64,
    },
    /// Opcode or operand cannot be executed.
    #[error("illegal instruction: {0}")]
    IllegalInstruction(String),
    /// Integer division by zero.
    #[error("division by zero")]
    DivisionByZero,
}

impl MachineError {
    /// Exception vector delivered to the emulated program for this error.
    #[must_use]
    pub const fn fault_code(&self) -> FaultCode {
        match self {
            Self::IllegalMemoryAccess { .. } => FaultCode::Abort,
            Self::StackOverflow { .. } => FaultCode::StackOverflow,
            Self::DeviceIo { .. } | Self::NoSuchDevice { .. } => FaultCode::IoError,
            Self::BadInterruption { .. } | Self::InterruptionOutOfRange { .. } => {
                FaultCode::BadInterruption
            }
            Self::IllegalInstruction(_) => FaultCode::IllegalInstruction,
            Self::DivisionByZero => FaultCode::DivisionByZero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FaultClass, FaultCode, MachineError};

    #[test]
    fn vector_roundtrip_is_bijective_for_defined_values() {
        for code in 0x00u8..=0x07 {
            let fault = FaultCode::from_u8(code).expect("defined vector");
            assert_eq!(fault.as_u8(), code);
        }
    }

    #[test]
    fn firmware_service_vectors_are_not_exceptions() {
        assert!(FaultCode::from_u8(0x08).is_none());
        assert!(FaultCode::from_u8(0x10).is_none());
        assert!(FaultCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn only_fatal_is_terminal() {
        assert!(FaultCode::Fatal.is_terminal());
        assert!(!FaultCode::StackOverflow.is_terminal());
        assert!(!FaultCode::IllegalInstruction.is_terminal());
    }

    #[test]
    fn runtime_errors_map_to_their_vectors() {
        let cases = [
            (
                MachineError::IllegalMemoryAccess {
                    address: 0,
                    length: 1,
                },
                FaultCode::Abort,
            ),
            (
                MachineError::StackOverflow { sp: 0, size: 8 },
                FaultCode::StackOverflow,
            ),
            (MachineError::NoSuchDevice { port: 7 }, FaultCode::IoError),
            (
                MachineError::DeviceIo {
                    port: 7,
                    reason: "rejected".into(),
                },
                FaultCode::IoError,
            ),
            (
                MachineError::InterruptionOutOfRange { vector: 0x1FF },
                FaultCode::BadInterruption,
            ),
            (
                MachineError::IllegalInstruction("(bad)".into()),
                FaultCode::IllegalInstruction,
            ),
            (MachineError::DivisionByZero, FaultCode::DivisionByZero),
        ];
        for (error, expected) in cases {
            assert_eq!(error.fault_code(), expected, "{error}");
        }
    }

    #[test]
    fn class_mapping_groups_memory_faults() {
        assert_eq!(FaultCode::Abort.class(), FaultClass::Memory);
        assert_eq!(FaultCode::StackOverflow.class(), FaultClass::Memory);
        assert_eq!(FaultCode::IoError.class(), FaultClass::Device);
        assert_eq!(FaultCode::IllegalInstruction.class(), FaultClass::Decode);
    }
}
