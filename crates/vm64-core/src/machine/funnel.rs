//! Interrupt funnel: every exception, software interrupt and device request
//! enters the program through here.
//!
//! Firmware vectors run natively. Everything else pushes a full register
//! frame and jumps through the vector table. A failed delivery is retried
//! as a stack-overflow trap; a failure of that retry stops the machine.

use super::firmware::{run_service, Service, ServiceContext};
use super::Machine;
use crate::memory::{self, ivt_entry_address, StagedMemory};
use crate::{
    FaultCode, MachineError, RegisterFile, RunState, Width, FLAG_INTERRUPTION_MASK,
};

/// First vector the interruption mask applies to.
const FIRST_MASKABLE_VECTOR: u64 = 0x20;

/// Bytes shown around the faulting address in a fatal dump.
const FATAL_DUMP_BYTES: u64 = 64;

impl Machine {
    /// Delivers `vector`, escalating a failed delivery.
    pub(super) fn interrupt(&self, regs: &mut RegisterFile, vector: u64) {
        if let Err(err) = self.deliver(regs, vector) {
            self.escalate(regs, vector, &err);
        }
    }

    /// Turns an instruction failure into its exception.
    pub(super) fn fault(&self, regs: &mut RegisterFile, err: &MachineError, address: u64) {
        let code = err.fault_code();
        log::debug!("fault {code:?} at {address:#x}: {err}");
        self.diag_lock().record_fault(code, address);

        let handling = self.control_lock().handlers.last().copied();
        if code == FaultCode::StackOverflow
            && handling == Some(FaultCode::StackOverflow.as_u8())
        {
            self.fatal(regs, &format!("{err} while handling a stack overflow"), address);
        } else if code.is_terminal() {
            self.fatal(regs, &err.to_string(), address);
        } else {
            self.interrupt(regs, u64::from(code.as_u8()));
        }
    }

    fn deliver(&self, regs: &mut RegisterFile, vector: u64) -> Result<(), MachineError> {
        if let Some(service) = Service::from_vector(vector) {
            let ctx = ServiceContext {
                memory: &self.memory,
                console: &*self.console,
                display: &self.display,
                keyboard: &self.keyboard,
                shutdown: &self.shutdown,
            };
            return run_service(service, regs, &ctx);
        }

        if vector >= FIRST_MASKABLE_VECTOR && regs.flag_is_set(FLAG_INTERRUPTION_MASK) {
            log::warn!("interruption {vector:#x} dropped: interrupts are masked");
            self.diag_lock().record_dropped_interrupt();
            return Ok(());
        }

        let entry = ivt_entry_address(vector)
            .ok_or(MachineError::InterruptionOutOfRange { vector })?;
        let handler_vector =
            u8::try_from(vector).map_err(|_| MachineError::InterruptionOutOfRange { vector })?;
        let code_base = self.memory.read_value(entry, Width::W64)?;
        let ip = self.memory.read_value(entry + 8, Width::W64)?;

        let frame = regs.to_frame();
        let mut next = regs.clone();
        let mut staged = StagedMemory::new(&self.memory);
        for word in frame {
            memory::push(&mut staged, &mut next, Width::W64, word)?;
        }
        next.set_flag(FLAG_INTERRUPTION_MASK, true);
        next.set_code_location(code_base, ip);
        staged.commit()?;
        *regs = next;

        self.control_lock().handlers.push(handler_vector);
        log::debug!("interruption {vector:#x} -> {code_base:#x}:{ip:#x}");
        Ok(())
    }

    fn escalate(&self, regs: &mut RegisterFile, vector: u64, err: &MachineError) {
        let (_, ip) = regs.code_location();
        log::warn!("delivery of interruption {vector:#x} failed: {err}");
        self.diag_lock().record_fault(err.fault_code(), regs.fetch_address());

        let overflow = u64::from(FaultCode::StackOverflow.as_u8());
        if vector == overflow {
            self.fatal(regs, &format!("cannot deliver stack overflow trap: {err}"), ip);
            return;
        }
        if let Err(second) = self.deliver(regs, overflow) {
            self.fatal(
                regs,
                &format!("cannot deliver stack overflow trap after {err}: {second}"),
                ip,
            );
        }
    }

    fn fatal(&self, regs: &RegisterFile, reason: &str, address: u64) {
        self.set_registers(regs.clone());
        let start = address.saturating_sub(FATAL_DUMP_BYTES / 2);
        let context = self.context(start, FATAL_DUMP_BYTES);
        log::error!("fatal: {reason}\n{context}");
        self.stop(RunState::Terminated);
    }
}
