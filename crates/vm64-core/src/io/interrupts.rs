//! Interrupt-request queue shared by devices and the boot loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pending interrupt numbers in arrival order.
///
/// Clones share the same queue, so each device keeps its own handle.
#[derive(Debug, Clone, Default)]
pub struct InterruptQueue {
    pending: Arc<Mutex<VecDeque<u64>>>,
}

impl InterruptQueue {
    /// Queues interrupt `vector` for delivery at the next loop iteration.
    pub fn raise(&self, vector: u64) {
        self.lock().push_back(vector);
    }

    /// Removes and returns every pending request.
    #[must_use]
    pub fn drain(&self) -> Vec<u64> {
        self.lock().drain(..).collect()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u64>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
