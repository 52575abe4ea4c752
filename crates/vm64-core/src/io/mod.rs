//! Port-mapped I/O hub.
//!
//! Devices own ports, each backed by a [`PortBuffer`]. The hub never knows a
//! concrete device type: `ins` asks the owning device to fill the buffer and
//! drains it, `outs` fills the buffer and asks the device to consume it.

/// Interrupt-request queue.
pub mod interrupts;
/// Port byte queues.
pub mod port;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::MachineError;

pub use interrupts::InterruptQueue;
pub use port::{PortBuffer, PortSet};

/// A port-mapped peripheral.
///
/// `request_read` runs before the hub drains a port and is expected to have
/// filled that port's buffer; `request_write` runs after the hub filled the
/// buffer and is expected to consume it. Returning `false` rejects the
/// request.
pub trait Device: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Ports and buffers owned by this device.
    fn ports(&self) -> &PortSet;

    /// Prepares the buffer of `port` for a read.
    fn request_read(&self, port: u64) -> bool;

    /// Consumes the buffer of `port` after a write.
    fn request_write(&self, port: u64) -> bool;

    /// Stops worker threads; called once when the hub detaches the device.
    fn shutdown(&self) {}
}

/// Registry of attached devices.
#[derive(Default)]
pub struct IoHub {
    devices: Mutex<Vec<Arc<dyn Device>>>,
}

impl std::fmt::Debug for IoHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .lock()
            .iter()
            .map(|device| device.name().to_string())
            .collect();
        f.debug_struct("IoHub").field("devices", &names).finish()
    }
}

impl IoHub {
    /// Attaches a device.
    pub fn attach(&self, device: Arc<dyn Device>) {
        log::info!(
            "attached device {} on ports {:x?}",
            device.name(),
            device.ports().numbers().collect::<Vec<_>>()
        );
        self.lock().push(device);
    }

    /// Shuts every device down and detaches it.
    pub fn shutdown(&self) {
        let devices: Vec<_> = self.lock().drain(..).collect();
        for device in devices {
            log::info!("detaching device {}", device.name());
            device.shutdown();
        }
    }

    /// Number of attached devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.lock().len()
    }

    /// Reads everything the owning device produces for `port`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NoSuchDevice`] when no device owns `port`, or
    /// [`MachineError::DeviceIo`] when the device rejects the read.
    pub fn ins(&self, port: u64) -> Result<Vec<u8>, MachineError> {
        let device = self.owner(port)?;
        if !device.request_read(port) {
            log::warn!("{} rejected read on port {port:#x}", device.name());
            return Err(MachineError::DeviceIo {
                port,
                reason: format!("{} rejected read", device.name()),
            });
        }
        let data = device
            .ports()
            .get(port)
            .map(PortBuffer::take_all)
            .unwrap_or_default();
        log::debug!("ins {port:#x} -> {} bytes", data.len());
        Ok(data)
    }

    /// Hands `data` to the owning device of `port`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NoSuchDevice`] when no device owns `port`, or
    /// [`MachineError::DeviceIo`] when the device rejects the write.
    pub fn outs(&self, port: u64, data: &[u8]) -> Result<(), MachineError> {
        let device = self.owner(port)?;
        if let Some(buffer) = device.ports().get(port) {
            buffer.push_bytes(data);
        }
        log::debug!("outs {port:#x} <- {} bytes", data.len());
        if device.request_write(port) {
            Ok(())
        } else {
            log::warn!("{} rejected write on port {port:#x}", device.name());
            if let Some(buffer) = device.ports().get(port) {
                buffer.clear();
            }
            Err(MachineError::DeviceIo {
                port,
                reason: format!("{} rejected write", device.name()),
            })
        }
    }

    /// Reads one little-endian `u64` from `port`.
    ///
    /// # Errors
    ///
    /// As [`Self::ins`], plus [`MachineError::DeviceIo`] when the device
    /// produced fewer than eight bytes.
    pub fn input_u64(&self, port: u64) -> Result<u64, MachineError> {
        let data = self.ins(port)?;
        let raw: [u8; 8] = data
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| MachineError::DeviceIo {
                port,
                reason: format!("expected 8 bytes, got {}", data.len()),
            })?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Writes one little-endian `u64` to `port`.
    ///
    /// # Errors
    ///
    /// As [`Self::outs`].
    pub fn output_u64(&self, port: u64, value: u64) -> Result<(), MachineError> {
        self.outs(port, &value.to_le_bytes())
    }

    fn owner(&self, port: u64) -> Result<Arc<dyn Device>, MachineError> {
        self.lock()
            .iter()
            .find(|device| device.ports().get(port).is_some())
            .cloned()
            .ok_or(MachineError::NoSuchDevice { port })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{Device, IoHub, PortSet};
    use crate::MachineError;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    /// Echoes writes on port 0x10 back on reads; rejects everything on 0x11.
    struct Echo {
        ports: PortSet,
        last: AtomicU64,
        shut: AtomicBool,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                ports: PortSet::new(&[0x10, 0x11]),
                last: AtomicU64::new(0),
                shut: AtomicBool::new(false),
            }
        }
    }

    impl Device for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn ports(&self) -> &PortSet {
            &self.ports
        }

        fn request_read(&self, port: u64) -> bool {
            if port != 0x10 {
                return false;
            }
            if let Some(buffer) = self.ports.get(port) {
                buffer.push_u64(self.last.load(Ordering::SeqCst));
            }
            true
        }

        fn request_write(&self, port: u64) -> bool {
            if port != 0x10 {
                return false;
            }
            match self.ports.get(port).and_then(super::PortBuffer::pop_u64) {
                Some(value) => {
                    self.last.store(value, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        }

        fn shutdown(&self) {
            self.shut.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn output_then_input_goes_through_owning_device() {
        let hub = IoHub::default();
        hub.attach(Arc::new(Echo::new()));
        hub.output_u64(0x10, 42).unwrap();
        assert_eq!(hub.input_u64(0x10).unwrap(), 42);
    }

    #[test]
    fn unowned_port_is_a_no_such_device_error() {
        let hub = IoHub::default();
        hub.attach(Arc::new(Echo::new()));
        assert_eq!(
            hub.ins(0x99),
            Err(MachineError::NoSuchDevice { port: 0x99 })
        );
    }

    #[test]
    fn rejected_request_is_a_device_io_error() {
        let hub = IoHub::default();
        hub.attach(Arc::new(Echo::new()));
        assert!(matches!(
            hub.outs(0x11, &[1, 2, 3]),
            Err(MachineError::DeviceIo { port: 0x11, .. })
        ));
        assert!(matches!(
            hub.ins(0x11),
            Err(MachineError::DeviceIo { port: 0x11, .. })
        ));
    }

    #[test]
    fn shutdown_detaches_and_notifies_devices() {
        let hub = IoHub::default();
        let echo = Arc::new(Echo::new());
        hub.attach(echo.clone());
        hub.shutdown();
        assert!(echo.shut.load(Ordering::SeqCst));
        assert_eq!(hub.device_count(), 0);
    }
}
