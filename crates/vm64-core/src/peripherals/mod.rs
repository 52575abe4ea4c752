//! Port-mapped peripherals: the real-time clock and block storage.

/// Sector-addressed disk images.
pub mod disk;
/// Wall clock and periodic interrupt timer.
pub mod rtc;

use thiserror::Error;

pub use disk::{Disk, DiskKind, SECTOR_SIZE};
pub use rtc::{RealTimeClock, RTC_CURRENT_TIME, RTC_SET_INTERRUPT, RTC_TICK};

/// Failures inside a device; the hub only sees a rejected request.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Backing image could not be opened.
    #[error("cannot open {path}: {source}")]
    Open {
        /// Image path.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Backing image read or write failed.
    #[error("image i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Sector range outside the image.
    #[error("sectors {start}+{count} outside image of {sectors} sectors")]
    OutOfRange {
        /// First sector requested.
        start: u64,
        /// Sector count requested.
        count: u64,
        /// Sectors in the image.
        sectors: u64,
    },
    /// Write payload does not match the latched sector count.
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Bytes implied by the sector count.
        expected: u64,
        /// Bytes queued on the port.
        actual: u64,
    },
    /// A register write carried fewer than eight bytes.
    #[error("no value queued on port {port:#x}")]
    MissingValue {
        /// Port written.
        port: u64,
    },
    /// Timer programming rejected.
    #[error("invalid timer setting {0:#x}")]
    InvalidTimer(u64),
    /// Port is not readable or not writable.
    #[error("unsupported request on port {port:#x}")]
    Unsupported {
        /// Port involved.
        port: u64,
    },
}
