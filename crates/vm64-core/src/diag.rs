//! Execution diagnostics: per-class fault counters and a ring of recently
//! executed instructions used by context dumps.

use std::collections::VecDeque;

use crate::{FaultClass, FaultCode};

/// Number of executed instructions kept for context dumps.
pub const RECENT_INSTRUCTION_CAPACITY: usize = 32;

/// One executed instruction as recorded by the boot loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Code base at fetch time.
    pub code_base: u64,
    /// Instruction pointer at fetch time.
    pub ip: u64,
    /// Disassembled text.
    pub text: String,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}:{:#x}  {}", self.code_base, self.ip, self.text)
    }
}

/// Counters and history owned by the execution thread.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Most recent fault raised by an instruction or a delivery.
    pub last_fault: Option<FaultCode>,
    /// Fetch address of the instruction that raised `last_fault`.
    pub last_fault_address: u64,
    /// Saturating counter for arithmetic faults.
    pub fault_count_arithmetic: u32,
    /// Saturating counter for device faults.
    pub fault_count_device: u32,
    /// Saturating counter for debug traps.
    pub fault_count_debug: u32,
    /// Saturating counter for interrupt dispatch faults.
    pub fault_count_dispatch: u32,
    /// Saturating counter for memory and stack faults.
    pub fault_count_memory: u32,
    /// Saturating counter for decode faults.
    pub fault_count_decode: u32,
    /// Saturating counter for fatal faults.
    pub fault_count_fatal: u32,
    /// Retired instruction count.
    pub instruction_count: u64,
    /// Interrupts dropped because the mask was set.
    pub dropped_interrupts: u64,
    recent: VecDeque<TraceEntry>,
}

impl Diagnostics {
    /// Creates empty diagnostics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fault, bumping the counter of its class.
    pub fn record_fault(&mut self, code: FaultCode, address: u64) {
        self.last_fault = Some(code);
        self.last_fault_address = address;
        let counter = match code.class() {
            FaultClass::Arithmetic => &mut self.fault_count_arithmetic,
            FaultClass::Device => &mut self.fault_count_device,
            FaultClass::Debug => &mut self.fault_count_debug,
            FaultClass::Dispatch => &mut self.fault_count_dispatch,
            FaultClass::Memory => &mut self.fault_count_memory,
            FaultClass::Decode => &mut self.fault_count_decode,
            FaultClass::Fatal => &mut self.fault_count_fatal,
        };
        *counter = counter.saturating_add(1);
    }

    /// Appends an executed instruction, evicting the oldest past capacity.
    pub fn record_instruction(&mut self, entry: TraceEntry) {
        if self.recent.len() == RECENT_INSTRUCTION_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
        self.instruction_count = self.instruction_count.saturating_add(1);
    }

    /// Records a maskable interrupt dropped while masked.
    pub const fn record_dropped_interrupt(&mut self) {
        self.dropped_interrupts = self.dropped_interrupts.saturating_add(1);
    }

    /// Recent instructions, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &TraceEntry> {
        self.recent.iter()
    }

    /// Clears counters and history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{Diagnostics, TraceEntry, RECENT_INSTRUCTION_CAPACITY};
    use crate::FaultCode;

    fn entry(ip: u64) -> TraceEntry {
        TraceEntry {
            code_base: 0,
            ip,
            text: "NOP".into(),
        }
    }

    #[test]
    fn faults_count_per_class() {
        let mut diag = Diagnostics::new();
        diag.record_fault(FaultCode::Abort, 0x10);
        diag.record_fault(FaultCode::StackOverflow, 0x20);
        diag.record_fault(FaultCode::DivisionByZero, 0x30);

        assert_eq!(diag.fault_count_memory, 2);
        assert_eq!(diag.fault_count_arithmetic, 1);
        assert_eq!(diag.last_fault, Some(FaultCode::DivisionByZero));
        assert_eq!(diag.last_fault_address, 0x30);
    }

    #[test]
    fn recent_ring_keeps_newest_entries() {
        let mut diag = Diagnostics::new();
        for ip in 0..(RECENT_INSTRUCTION_CAPACITY as u64 + 5) {
            diag.record_instruction(entry(ip));
        }
        let ips: Vec<u64> = diag.recent().map(|e| e.ip).collect();
        assert_eq!(ips.len(), RECENT_INSTRUCTION_CAPACITY);
        assert_eq!(ips.first(), Some(&5));
        assert_eq!(diag.instruction_count, RECENT_INSTRUCTION_CAPACITY as u64 + 5);

        diag.reset();
        assert_eq!(diag.recent().count(), 0);
    }

    #[test]
    fn trace_entry_display_shows_location_and_text() {
        assert_eq!(entry(0x1f).to_string(), "0x0:0x1f  NOP");
    }
}
