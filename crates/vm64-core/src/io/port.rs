//! Per-port byte queues.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// FIFO byte queue backing one device port.
#[derive(Debug, Default)]
pub struct PortBuffer {
    bytes: Mutex<VecDeque<u8>>,
}

impl PortBuffer {
    /// Appends raw bytes.
    pub fn push_bytes(&self, data: &[u8]) {
        self.lock().extend(data.iter().copied());
    }

    /// Appends a little-endian `u64`.
    pub fn push_u64(&self, value: u64) {
        self.push_bytes(&value.to_le_bytes());
    }

    /// Removes a little-endian `u64` from the front, if eight bytes are queued.
    #[must_use]
    pub fn pop_u64(&self) -> Option<u64> {
        let mut bytes = self.lock();
        if bytes.len() < 8 {
            return None;
        }
        let mut raw = [0u8; 8];
        for slot in &mut raw {
            *slot = bytes.pop_front()?;
        }
        Some(u64::from_le_bytes(raw))
    }

    /// Removes exactly `count` bytes from the front, if that many are queued.
    #[must_use]
    pub fn take(&self, count: usize) -> Option<Vec<u8>> {
        let mut bytes = self.lock();
        if bytes.len() < count {
            return None;
        }
        Some(bytes.drain(..count).collect())
    }

    /// Removes and returns everything queued.
    #[must_use]
    pub fn take_all(&self) -> Vec<u8> {
        self.lock().drain(..).collect()
    }

    /// Number of queued bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything queued.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of port numbers, each with its own buffer.
#[derive(Debug)]
pub struct PortSet {
    ports: Vec<(u64, PortBuffer)>,
}

impl PortSet {
    /// Creates empty buffers for every listed port.
    #[must_use]
    pub fn new(ports: &[u64]) -> Self {
        Self {
            ports: ports
                .iter()
                .map(|port| (*port, PortBuffer::default()))
                .collect(),
        }
    }

    /// Port numbers in declaration order.
    pub fn numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.ports.iter().map(|(port, _)| *port)
    }

    /// Buffer for `port`, if it belongs to this set.
    #[must_use]
    pub fn get(&self, port: u64) -> Option<&PortBuffer> {
        self.ports
            .iter()
            .find(|(number, _)| *number == port)
            .map(|(_, buffer)| buffer)
    }
}
