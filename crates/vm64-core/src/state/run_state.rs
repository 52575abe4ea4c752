/// Execution state of the boot loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// Ready to execute the next instruction.
    #[default]
    Running,
    /// `HLT` retired; the boot loop exits after the current iteration.
    HaltRequested,
    /// Inside an interrupt handler entered through the vector table.
    TrapHandling {
        /// Vector being handled.
        vector: u8,
    },
    /// Fatal fault; no further instruction executes.
    Terminated,
}

impl RunState {
    /// Vector of the handler currently running, if any.
    #[must_use]
    pub const fn handling_vector(self) -> Option<u8> {
        match self {
            Self::TrapHandling { vector } => Some(vector),
            Self::Running | Self::HaltRequested | Self::Terminated => None,
        }
    }

    /// Returns `true` when the boot loop must not execute another instruction.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::HaltRequested | Self::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::RunState;

    #[test]
    fn run_state_default_is_running() {
        assert_eq!(RunState::default(), RunState::Running);
    }

    #[test]
    fn handling_vector_reports_only_trap_variant() {
        assert_eq!(RunState::Running.handling_vector(), None);
        assert_eq!(RunState::Terminated.handling_vector(), None);
        assert_eq!(
            RunState::TrapHandling { vector: 0x07 }.handling_vector(),
            Some(0x07)
        );
    }

    #[test]
    fn halted_and_terminated_stop_the_loop() {
        assert!(RunState::HaltRequested.is_stopped());
        assert!(RunState::Terminated.is_stopped());
        assert!(!RunState::TrapHandling { vector: 0x20 }.is_stopped());
    }
}
