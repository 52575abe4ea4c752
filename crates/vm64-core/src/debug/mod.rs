//! Breakpoints, watchpoints and the execution freeze.
//!
//! The boot loop calls [`DebugController::check`] once per instruction,
//! after decode and before execution. When a stop is due it calls
//! [`DebugController::freeze`], which runs the installed handler and then
//! blocks the execution thread until another thread calls
//! [`DebugController::resume`]. Register and memory reads from the
//! debugger thread keep working while frozen. [`DebugController::release`]
//! is the sticky form used at shutdown: no later freeze blocks.

/// Breakpoint condition language.
pub mod condition;

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub use condition::{Condition, ConditionError};

use crate::isa::Operand;
use crate::{Memory, RegisterFile};

/// Why execution stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReason {
    /// Single step requested.
    Step,
    /// Pause requested.
    ManualStop,
    /// First instruction of the firmware.
    FirmwareEntry,
    /// A breakpoint matched and its condition held.
    Breakpoint,
    /// A watched value changed.
    Watchpoint {
        /// Watched operand text.
        operand: String,
        /// Value at the previous check.
        old: u64,
        /// Value now.
        new: u64,
    },
}

/// Passed to the break handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakInfo {
    /// Code base of the instruction about to run.
    pub code_base: u64,
    /// Instruction pointer of the instruction about to run.
    pub ip: u64,
    /// Disassembly of that instruction.
    pub instruction: String,
    /// Why the machine stopped.
    pub reason: BreakReason,
}

impl std::fmt::Display for BreakInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} at {:#x}:{:#x}  {}",
            self.reason, self.code_base, self.ip, self.instruction
        )
    }
}

/// Callback run on the execution thread when it freezes.
pub type BreakHandler = Box<dyn Fn(&BreakInfo) + Send + Sync>;

#[derive(Debug)]
struct Watchpoint {
    text: String,
    operand: Operand,
    last: Option<u64>,
}

#[derive(Debug, Default)]
struct Points {
    breakpoints: BTreeMap<(u64, u64), Condition>,
    watchpoints: Vec<Watchpoint>,
    step: bool,
    manual_stop: bool,
    firmware_entry: bool,
}

#[derive(Debug, Default)]
struct Freeze {
    frozen: bool,
    released: bool,
}

/// Debugger state shared between the execution thread and a debug session.
pub struct DebugController {
    points: Mutex<Points>,
    freeze: Mutex<Freeze>,
    resumed: Condvar,
    handler: Mutex<Option<BreakHandler>>,
}

impl std::fmt::Debug for DebugController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugController")
            .field("points", &*self.points())
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}

impl Default for DebugController {
    fn default() -> Self {
        Self::new(false)
    }
}

impl DebugController {
    /// Creates a controller; `break_at_entry` stops before the first
    /// instruction.
    #[must_use]
    pub fn new(break_at_entry: bool) -> Self {
        Self {
            points: Mutex::new(Points {
                firmware_entry: break_at_entry,
                ..Points::default()
            }),
            freeze: Mutex::new(Freeze::default()),
            resumed: Condvar::new(),
            handler: Mutex::new(None),
        }
    }

    /// Installs the callback run on every freeze.
    pub fn set_handler(&self, handler: BreakHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Adds or replaces the breakpoint at `(code_base, ip)`.
    pub fn add_breakpoint(&self, code_base: u64, ip: u64, condition: Condition) {
        log::debug!("breakpoint at {code_base:#x}:{ip:#x} if {condition:?}");
        self.points().breakpoints.insert((code_base, ip), condition);
    }

    /// Removes a breakpoint; returns whether one existed.
    pub fn remove_breakpoint(&self, code_base: u64, ip: u64) -> bool {
        self.points().breakpoints.remove(&(code_base, ip)).is_some()
    }

    /// Installed breakpoint locations, ordered.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<(u64, u64)> {
        self.points().breakpoints.keys().copied().collect()
    }

    /// Watches an operand; the first check only records its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::Operand`] for unparsable operand text.
    pub fn add_watchpoint(&self, text: &str) -> Result<(), ConditionError> {
        let operand = condition::operand(text)?;
        self.points().watchpoints.push(Watchpoint {
            text: text.trim().to_string(),
            operand,
            last: None,
        });
        Ok(())
    }

    /// Removes every watchpoint with this text; returns whether any existed.
    pub fn remove_watchpoint(&self, text: &str) -> bool {
        let mut points = self.points();
        let before = points.watchpoints.len();
        points.watchpoints.retain(|w| w.text != text.trim());
        points.watchpoints.len() != before
    }

    /// Stops before the next instruction.
    pub fn single_step(&self) {
        self.points().step = true;
    }

    /// Pauses at the next instruction boundary.
    pub fn pause(&self) {
        self.points().manual_stop = true;
    }

    /// Releases a frozen execution thread.
    pub fn resume(&self) {
        self.freeze_state().frozen = false;
        self.resumed.notify_all();
    }

    /// Releases the execution thread now and turns every later
    /// [`Self::freeze`] into a no-op.
    pub fn release(&self) {
        let mut state = self.freeze_state();
        state.released = true;
        state.frozen = false;
        drop(state);
        self.resumed.notify_all();
    }

    /// Whether the execution thread is frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.freeze_state().frozen
    }

    /// Decides whether to stop before the instruction at `(code_base, ip)`.
    ///
    /// One-shot requests are consumed. Watchpoints are sampled on every call
    /// so a change is reported exactly once.
    pub fn check(
        &self,
        code_base: u64,
        ip: u64,
        regs: &RegisterFile,
        memory: &Memory,
    ) -> Option<BreakReason> {
        let mut points = self.points();
        let changed = sample_watchpoints(&mut points.watchpoints, regs, memory);

        if std::mem::take(&mut points.step) {
            return Some(BreakReason::Step);
        }
        if std::mem::take(&mut points.manual_stop) {
            return Some(BreakReason::ManualStop);
        }
        if std::mem::take(&mut points.firmware_entry) {
            return Some(BreakReason::FirmwareEntry);
        }
        let fetch = code_base.wrapping_add(ip);
        let hit = points
            .breakpoints
            .iter()
            .any(|(&(cb, bip), condition)| {
                cb.wrapping_add(bip) == fetch && condition.evaluate(regs, memory)
            });
        if hit {
            return Some(BreakReason::Breakpoint);
        }
        changed
    }

    /// Runs the handler, then blocks until [`Self::resume`]. Returns at once
    /// after [`Self::release`].
    pub fn freeze(&self, info: &BreakInfo) {
        {
            let mut state = self.freeze_state();
            if state.released {
                return;
            }
            state.frozen = true;
        }
        log::debug!("break: {info}");
        if let Some(handler) = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handler(info);
        }
        let mut state = self.freeze_state();
        while state.frozen && !state.released {
            state = self
                .resumed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn points(&self) -> MutexGuard<'_, Points> {
        self.points.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn freeze_state(&self) -> MutexGuard<'_, Freeze> {
        self.freeze.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sample_watchpoints(
    watchpoints: &mut [Watchpoint],
    regs: &RegisterFile,
    memory: &Memory,
) -> Option<BreakReason> {
    let mut fired = None;
    for watch in watchpoints {
        let now = condition::observe(regs, memory, &watch.operand);
        if let (Some(old), Some(new)) = (watch.last, now) {
            if old != new && fired.is_none() {
                fired = Some(BreakReason::Watchpoint {
                    operand: watch.text.clone(),
                    old,
                    new,
                });
            }
        }
        watch.last = now;
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::{BreakInfo, BreakReason, Condition, DebugController};
    use crate::{Memory, RegisterFile};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn machine() -> (RegisterFile, Memory) {
        (RegisterFile::default(), Memory::new(0x1000))
    }

    #[test]
    fn false_condition_does_not_stop() {
        let (mut regs, memory) = machine();
        let debug = DebugController::default();
        debug.add_breakpoint(0x100, 0x4, Condition::parse("valequal(%FER0, $(9))").unwrap());
        assert_eq!(debug.check(0x100, 0x4, &regs, &memory), None);
        regs.set_general(0, 9);
        assert_eq!(
            debug.check(0x100, 0x4, &regs, &memory),
            Some(BreakReason::Breakpoint)
        );
    }

    #[test]
    fn unconditional_breakpoint_matches_linear_address() {
        let (regs, memory) = machine();
        let debug = DebugController::default();
        debug.add_breakpoint(0x100, 0x4, Condition::Always);
        assert_eq!(
            debug.check(0x0, 0x104, &regs, &memory),
            Some(BreakReason::Breakpoint)
        );
        assert_eq!(debug.check(0x100, 0x5, &regs, &memory), None);
        assert!(debug.remove_breakpoint(0x100, 0x4));
        assert!(debug.breakpoints().is_empty());
    }

    #[test]
    fn one_shot_requests_are_consumed_in_order() {
        let (regs, memory) = machine();
        let debug = DebugController::new(true);
        debug.single_step();
        debug.pause();
        assert_eq!(debug.check(0, 0, &regs, &memory), Some(BreakReason::Step));
        assert_eq!(
            debug.check(0, 0, &regs, &memory),
            Some(BreakReason::ManualStop)
        );
        assert_eq!(
            debug.check(0, 0, &regs, &memory),
            Some(BreakReason::FirmwareEntry)
        );
        assert_eq!(debug.check(0, 0, &regs, &memory), None);
    }

    #[test]
    fn watchpoint_fires_once_per_change() {
        let (regs, memory) = machine();
        let debug = DebugController::default();
        debug
            .add_watchpoint("<*1&8($(0x20), $(0), $(0))>")
            .unwrap();

        assert_eq!(debug.check(0, 0, &regs, &memory), None);
        memory.write(0x20, &[1]).unwrap();
        assert_eq!(
            debug.check(0, 0, &regs, &memory),
            Some(BreakReason::Watchpoint {
                operand: "<*1&8($(0x20), $(0), $(0))>".into(),
                old: 0,
                new: 1,
            })
        );
        assert_eq!(debug.check(0, 0, &regs, &memory), None);
        assert!(debug.remove_watchpoint("<*1&8($(0x20), $(0), $(0))>"));
    }

    #[test]
    fn watchpoints_rebase_even_when_a_step_wins() {
        let (regs, memory) = machine();
        let debug = DebugController::default();
        debug.add_watchpoint("*1&8($(0x20), $(0), $(0))").unwrap();
        debug.check(0, 0, &regs, &memory);

        memory.write(0x20, &[5]).unwrap();
        debug.single_step();
        assert_eq!(debug.check(0, 0, &regs, &memory), Some(BreakReason::Step));
        assert_eq!(debug.check(0, 0, &regs, &memory), None);
    }

    #[test]
    fn freeze_blocks_until_resumed() {
        let debug = Arc::new(DebugController::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        debug.set_handler(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let frozen = debug.clone();
        let worker = std::thread::spawn(move || {
            frozen.freeze(&BreakInfo {
                code_base: 0,
                ip: 0,
                instruction: "NOP".into(),
                reason: BreakReason::ManualStop,
            });
        });
        while !debug.is_frozen() {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_finished());
        debug.resume();
        worker.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_before_freeze_does_not_block() {
        let debug = Arc::new(DebugController::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        debug.set_handler(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        debug.release();

        let (done, finished) = std::sync::mpsc::channel();
        let frozen = debug.clone();
        std::thread::spawn(move || {
            frozen.freeze(&BreakInfo {
                code_base: 0,
                ip: 0,
                instruction: "NOP".into(),
                reason: BreakReason::Breakpoint,
            });
            done.send(()).unwrap();
        });
        assert!(finished.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(!debug.is_frozen());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
