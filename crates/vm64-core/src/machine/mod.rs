//! The machine: register file, memory, devices and the boot loop.
//!
//! One thread drives [`Machine::step`]; every other method may be called
//! from other threads (device workers, the host UI, a debugger session).
//! The register lock is never held across an instruction or a debugger
//! freeze, so a frozen machine still answers [`Machine::registers`] and
//! [`Machine::context`].

/// Context snapshots.
pub mod context;
/// Firmware services, keyboard queue and text display.
pub mod firmware;
mod funnel;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::debug::{BreakInfo, DebugController};
use crate::diag::{Diagnostics, TraceEntry};
use crate::execute::{commit_execution, execute_instruction, ExecuteOutcome, ExecuteState};
use crate::io::{InterruptQueue, IoHub};
use crate::isa::{decode_instruction, MAX_INSTRUCTION_BYTES};
use crate::memory::{Memory, BIOS_END, BIOS_START, DEFAULT_TOTAL_MEMORY};
use crate::peripherals::{DeviceError, Disk, RealTimeClock};
use crate::{MachineConfig, MachineError, RegisterFile, RunState, SpecialRegister};

pub use context::Context;
pub use firmware::{
    run_service, Console, Keyboard, NullConsole, Service, ServiceContext, KEYBOARD_CAPACITY,
};

#[derive(Debug, Default)]
struct Control {
    stopped: Option<RunState>,
    handlers: Vec<u8>,
}

/// A configured machine ready to boot.
pub struct Machine {
    config: MachineConfig,
    regs: Mutex<RegisterFile>,
    memory: Memory,
    io: IoHub,
    interrupts: InterruptQueue,
    debug: DebugController,
    console: Arc<dyn Console>,
    display: firmware::Display,
    keyboard: Keyboard,
    control: Mutex<Control>,
    diag: Mutex<Diagnostics>,
    shutdown: AtomicBool,
    timestamp: AtomicU64,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("run_state", &self.run_state())
            .field("memory", &self.memory.total())
            .field("io", &self.io)
            .field("timestamp", &self.timestamp())
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Builds a machine with no console output.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_console(config, Arc::new(NullConsole))
    }

    /// Builds a machine whose firmware output goes to `console`.
    ///
    /// Execution starts at the firmware entry (`CB = 0xC1800`, `IP = 0`)
    /// with the configured stack.
    #[must_use]
    pub fn with_console(config: &MachineConfig, console: Arc<dyn Console>) -> Self {
        let total = config
            .total_memory_bytes()
            .unwrap_or(DEFAULT_TOTAL_MEMORY);
        let mut regs = RegisterFile::default();
        regs.set_code_location(BIOS_START, 0);
        regs.set_special(SpecialRegister::StackBase, config.boot.stack_base);
        regs.set_special(SpecialRegister::StackPointer, config.boot.stack_size);
        log::debug!("machine: {total} bytes of memory, stack at {:#x}", config.boot.stack_base);

        Self {
            config: config.clone(),
            regs: Mutex::new(regs),
            memory: Memory::new(total),
            io: IoHub::default(),
            interrupts: InterruptQueue::default(),
            debug: DebugController::new(config.debug.break_at_firmware_entry),
            console,
            display: firmware::Display::default(),
            keyboard: Keyboard::default(),
            control: Mutex::new(Control::default()),
            diag: Mutex::new(Diagnostics::new()),
            shutdown: AtomicBool::new(false),
            timestamp: AtomicU64::new(0),
        }
    }

    /// Configuration the machine was built from.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Physical memory.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Device registry.
    #[must_use]
    pub const fn io(&self) -> &IoHub {
        &self.io
    }

    /// Queue devices raise interrupts into.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptQueue {
        &self.interrupts
    }

    /// Breakpoints, watchpoints and freeze control.
    #[must_use]
    pub const fn debug(&self) -> &DebugController {
        &self.debug
    }

    /// Copy of the register file.
    #[must_use]
    pub fn registers(&self) -> RegisterFile {
        self.regs_lock().clone()
    }

    /// Replaces the register file.
    pub fn set_registers(&self, regs: RegisterFile) {
        *self.regs_lock() = regs;
    }

    /// Boot-loop iterations so far.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Copy of the diagnostics counters and history.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diag_lock().clone()
    }

    /// Attaches the clock and every configured disk image.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Open`] when a disk image cannot be opened.
    pub fn attach_configured_devices(&self) -> Result<(), DeviceError> {
        if self.config.rtc.enabled {
            self.io
                .attach(Arc::new(RealTimeClock::new(self.interrupts.clone())));
        }
        for (kind, path) in self.config.disk_images() {
            let disk = Disk::open(kind, path)?;
            log::info!(
                "{}: {} ({} sectors)",
                kind.name(),
                path.display(),
                disk.sectors()
            );
            self.io.attach(Arc::new(disk));
        }
        Ok(())
    }

    /// Copies a firmware image to the start of the firmware region.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when the image does not
    /// fit the region.
    pub fn load_firmware(&self, image: &[u8]) -> Result<(), MachineError> {
        let length = image.len() as u64;
        if length > BIOS_END - BIOS_START + 1 {
            return Err(MachineError::IllegalMemoryAccess {
                address: BIOS_START,
                length,
            });
        }
        self.memory.write(BIOS_START, image)?;
        log::info!("loaded {length} bytes of firmware at {BIOS_START:#x}");
        Ok(())
    }

    /// Copies `bytes` to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalMemoryAccess`] when the range is
    /// outside memory.
    pub fn load_image(&self, address: u64, bytes: &[u8]) -> Result<(), MachineError> {
        self.memory.write(address, bytes)
    }

    /// Current boot-loop state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        let control = self.control_lock();
        control
            .stopped
            .or_else(|| {
                control
                    .handlers
                    .last()
                    .map(|&vector| RunState::TrapHandling { vector })
            })
            .unwrap_or(RunState::Running)
    }

    /// `true` once the machine stopped, cleanly or not.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.run_state().is_stopped()
    }

    /// Runs one boot-loop iteration: pending interrupts, then one
    /// instruction.
    pub fn step(&self) -> RunState {
        if self.control_lock().stopped.is_some() {
            return self.run_state();
        }
        if self.shutdown.load(Ordering::SeqCst) {
            self.stop(RunState::HaltRequested);
            return self.run_state();
        }

        let pending = self.interrupts.drain();
        if !pending.is_empty() {
            let mut regs = self.registers();
            for vector in pending {
                self.interrupt(&mut regs, vector);
                if self.control_lock().stopped.is_some() {
                    break;
                }
            }
            self.set_registers(regs);
        }

        if self.control_lock().stopped.is_none() {
            self.execute_one();
        }
        self.timestamp.fetch_add(1, Ordering::Relaxed);
        self.run_state()
    }

    /// Steps until the machine stops; returns the final state.
    pub fn run(&self) -> RunState {
        loop {
            let state = self.step();
            if state.is_stopped() {
                return state;
            }
        }
    }

    /// Asks the boot loop to stop at the next instruction boundary and
    /// releases anything it may be blocked on.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.keyboard.wake_all();
        self.debug.release();
    }

    /// Queues a key for `ReadKey`; `false` when the buffer is full.
    pub fn try_add_keyboard_input(&self, key: u16) -> bool {
        self.keyboard.try_push(key)
    }

    /// Registers, a memory window clipped to memory, and recent
    /// instructions.
    #[must_use]
    pub fn context(&self, window_start: u64, window_len: u64) -> Context {
        let end = window_start
            .saturating_add(window_len)
            .min(self.memory.total());
        let window = if window_start < end {
            self.memory
                .read_vec(window_start, end - window_start)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Context {
            registers: self.registers(),
            run_state: self.run_state(),
            window_start,
            window,
            recent: self.diag_lock().recent().cloned().collect(),
        }
    }

    /// Stops device workers.
    pub fn power_off(&self) {
        self.io.shutdown();
    }

    fn execute_one(&self) {
        let regs = self.registers();
        let (code_base, ip) = regs.code_location();
        let fetch = regs.fetch_address();

        let window = MAX_INSTRUCTION_BYTES.min(
            usize::try_from(self.memory.total().saturating_sub(fetch)).unwrap_or(usize::MAX),
        );
        let decoded = self
            .memory
            .read_vec(fetch, window as u64)
            .and_then(|bytes| {
                decode_instruction(&bytes)
                    .map_err(|err| MachineError::IllegalInstruction(err.to_string()))
            });

        if let Some(reason) = self.debug.check(code_base, ip, &regs, &self.memory) {
            let instruction = decoded.as_ref().map_or_else(
                |_| "<undecodable>".to_string(),
                |(instruction, _)| instruction.to_string(),
            );
            self.debug.freeze(&BreakInfo {
                code_base,
                ip,
                instruction,
                reason,
            });
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
        }

        // The debugger may have edited registers while frozen.
        let mut regs = self.registers();
        let (instruction, length) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                if matches!(err, MachineError::IllegalInstruction(_)) {
                    regs.set_ip(ip.wrapping_add(1));
                }
                self.fault(&mut regs, &err, fetch);
                self.set_registers(regs);
                return;
            }
        };

        log::trace!("{code_base:#x}:{ip:#x}  {instruction}");
        self.diag_lock().record_instruction(TraceEntry {
            code_base,
            ip,
            text: instruction.to_string(),
        });
        regs.set_ip(ip.wrapping_add(length as u64));

        let mut state = ExecuteState::new(
            regs.clone(),
            &self.memory,
            &self.io,
            self.config.boot.stack_size,
        );
        let result = execute_instruction(&mut state, &instruction)
            .and_then(|outcome| commit_execution(state, &mut regs).map(|()| outcome));

        match result {
            Ok(ExecuteOutcome::Retired) => {}
            Ok(ExecuteOutcome::Halted) => {
                log::info!("halted at {code_base:#x}:{ip:#x}");
                self.stop(RunState::HaltRequested);
            }
            Ok(ExecuteOutcome::Interrupt { vector }) => self.interrupt(&mut regs, vector),
            Ok(ExecuteOutcome::DebugTrap) => {
                self.debug.single_step();
                self.interrupt(&mut regs, 0x03);
            }
            Ok(ExecuteOutcome::InterruptReturn) => {
                self.control_lock().handlers.pop();
            }
            Err(err) => self.fault(&mut regs, &err, fetch),
        }
        self.set_registers(regs);
    }

    fn stop(&self, state: RunState) {
        let mut control = self.control_lock();
        if control.stopped.is_none() {
            control.stopped = Some(state);
        }
    }

    fn regs_lock(&self) -> MutexGuard<'_, RegisterFile> {
        self.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control_lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn diag_lock(&self) -> MutexGuard<'_, Diagnostics> {
        self.diag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.power_off();
    }
}

#[cfg(test)]
mod tests {
    use super::Machine;
    use crate::isa::encode_instruction;
    use crate::memory::{ivt_entry_address, BIOS_START};
    use crate::{FaultCode, MachineConfig, RunState, FLAG_INTERRUPTION_MASK};

    fn machine() -> Machine {
        let mut config = MachineConfig::default();
        config.memory.size_mib = 2;
        config.rtc.enabled = false;
        Machine::new(&config)
    }

    fn assemble(source: &str) -> Vec<u8> {
        let mut image = Vec::new();
        for line in source.lines() {
            encode_instruction(line, &mut image).unwrap();
        }
        image
    }

    #[test]
    fn configured_disks_are_attached() {
        let image = tempfile::NamedTempFile::new().unwrap();
        image.as_file().set_len(4 * 512).unwrap();
        let mut config = MachineConfig::default();
        config.memory.size_mib = 2;
        config.rtc.enabled = false;
        config.disks.hard_disk = Some(image.path().to_path_buf());
        let machine = Machine::new(&config);

        machine.attach_configured_devices().unwrap();

        assert_eq!(machine.io().device_count(), 1);
        assert_eq!(machine.io().input_u64(0x136).unwrap(), 4);
    }

    #[test]
    fn shutdown_before_a_freeze_lets_the_step_finish() {
        let mut config = MachineConfig::default();
        config.memory.size_mib = 2;
        config.rtc.enabled = false;
        config.debug.break_at_firmware_entry = true;
        let machine = std::sync::Arc::new(Machine::new(&config));
        boot(&machine, "nop\nhlt");

        // `execute_one` skips the shutdown check in `step`, as a request
        // arriving between that check and the firmware-entry freeze would.
        machine.request_shutdown();
        let (done, finished) = std::sync::mpsc::channel();
        let stepping = std::sync::Arc::clone(&machine);
        std::thread::spawn(move || {
            stepping.execute_one();
            done.send(stepping.step()).unwrap();
        });

        assert_eq!(
            finished.recv_timeout(std::time::Duration::from_secs(5)),
            Ok(RunState::HaltRequested)
        );
    }

    fn boot(machine: &Machine, source: &str) {
        machine.load_firmware(&assemble(source)).unwrap();
    }

    fn set_vector(machine: &Machine, vector: u64, code_base: u64, ip: u64) {
        let entry = ivt_entry_address(vector).unwrap();
        machine
            .memory()
            .write(entry, &code_base.to_le_bytes())
            .unwrap();
        machine
            .memory()
            .write(entry + 8, &ip.to_le_bytes())
            .unwrap();
    }

    #[test]
    fn runs_to_halt() {
        let machine = machine();
        boot(
            &machine,
            "mov .64bit <%FER0>, <$(5)>\nadd .64bit <%FER0>, <$(3)>\nhlt",
        );
        assert_eq!(machine.run(), RunState::HaltRequested);
        assert_eq!(machine.registers().general(0), 8);
        assert!(machine.is_halted());
        assert_eq!(machine.timestamp(), 3);
        assert_eq!(machine.diagnostics().instruction_count, 3);
    }

    #[test]
    fn software_interrupt_enters_and_leaves_handler() {
        let machine = machine();
        boot(&machine, "int <$(0x20)>\nhlt");
        let handler = assemble("mov .64bit <%FER1>, <$(9)>\niret");
        machine.load_image(0x2000, &handler).unwrap();
        set_vector(&machine, 0x20, 0x2000, 0);

        assert_eq!(machine.step(), RunState::TrapHandling { vector: 0x20 });
        assert!(machine.registers().flag_is_set(FLAG_INTERRUPTION_MASK));
        machine.step();
        assert_eq!(machine.step(), RunState::Running);
        let regs = machine.registers();
        assert_eq!(regs.general(1), 0, "iret restores the caller's registers");
        assert_eq!(regs.code_location().0, BIOS_START);
        assert!(!regs.flag_is_set(FLAG_INTERRUPTION_MASK));
        assert_eq!(machine.run(), RunState::HaltRequested);
    }

    #[test]
    fn masked_device_interrupt_is_dropped() {
        let machine = machine();
        boot(&machine, "igni\nnop\nhlt");
        set_vector(&machine, 0x30, 0x2000, 0);
        machine.step();
        machine.interrupts().raise(0x30);
        assert_eq!(machine.step(), RunState::Running);
        assert_eq!(machine.registers().code_location().0, BIOS_START);
        assert_eq!(machine.diagnostics().dropped_interrupts, 1);
    }

    #[test]
    fn division_by_zero_enters_its_vector() {
        let machine = machine();
        boot(&machine, "div .64bit <$(0)>");
        set_vector(&machine, 0x01, 0x3000, 0x10);
        assert_eq!(machine.step(), RunState::TrapHandling { vector: 0x01 });
        assert_eq!(machine.registers().code_location(), (0x3000, 0x10));
        let diag = machine.diagnostics();
        assert_eq!(diag.last_fault, Some(FaultCode::DivisionByZero));
        assert_eq!(diag.fault_count_arithmetic, 1);
    }

    #[test]
    fn firmware_service_runs_without_frame() {
        let machine = machine();
        boot(&machine, "int <$(0x16)>\nhlt");
        let sp_before = machine.registers().special(crate::SpecialRegister::StackPointer);
        assert_eq!(machine.step(), RunState::Running);
        let regs = machine.registers();
        assert_eq!(regs.general(0), machine.memory().total());
        assert_eq!(regs.special(crate::SpecialRegister::StackPointer), sp_before);
    }

    #[test]
    fn shutdown_request_stops_cleanly() {
        let machine = machine();
        boot(&machine, "nop\nnop");
        machine.request_shutdown();
        assert_eq!(machine.run(), RunState::HaltRequested);
        assert_eq!(machine.timestamp(), 0);
    }

    #[test]
    fn context_window_is_clipped_to_memory() {
        let machine = machine();
        let total = machine.memory().total();
        let context = machine.context(total - 4, 16);
        assert_eq!(context.window.len(), 4);
        assert!(machine.context(total + 10, 4).window.is_empty());
    }

    #[test]
    fn oversized_firmware_is_rejected() {
        let machine = machine();
        let image = vec![0u8; 0x40_0000];
        assert!(machine.load_firmware(&image).is_err());
    }
}
