//! Block storage backed by a host image file.
//!
//! Each disk owns five consecutive ports from its base:
//!
//! | Offset | Port | Access |
//! |---|---|---|
//! | +0 | `SIZE` | read: sector count |
//! | +1 | `START_SEC` | write: first sector |
//! | +2 | `SEC_COUNT` | write: sector count |
//! | +3 | `CMD_RD` | read: `SEC_COUNT * 512` bytes |
//! | +4 | `CMD_WR` | write: exactly `SEC_COUNT * 512` bytes |

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::DeviceError;
use crate::io::{Device, PortBuffer, PortSet};

/// Bytes per sector.
pub const SECTOR_SIZE: u64 = 512;

const SIZE: u64 = 0;
const START_SECTOR: u64 = 1;
const SECTOR_COUNT: u64 = 2;
const COMMAND_READ: u64 = 3;
const COMMAND_WRITE: u64 = 4;

/// The three drive slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskKind {
    /// First floppy drive, ports `0x116..=0x11A`.
    FloppyA,
    /// Second floppy drive, ports `0x126..=0x12A`.
    FloppyB,
    /// Hard disk, ports `0x136..=0x13A`.
    HardDisk,
}

impl DiskKind {
    /// First port of the drive.
    #[must_use]
    pub const fn base_port(self) -> u64 {
        match self {
            Self::FloppyA => 0x116,
            Self::FloppyB => 0x126,
            Self::HardDisk => 0x136,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FloppyA => "fda",
            Self::FloppyB => "fdb",
            Self::HardDisk => "hdd",
        }
    }
}

#[derive(Debug)]
struct DiskState {
    image: File,
    sectors: u64,
    start: u64,
    count: u64,
}

impl DiskState {
    fn checked_span(&self) -> Result<(u64, u64), DeviceError> {
        let out_of_range = || self.out_of_range();
        let end = self.start.checked_add(self.count).ok_or_else(out_of_range)?;
        if end > self.sectors {
            return Err(out_of_range());
        }
        let offset = self.start.checked_mul(SECTOR_SIZE).ok_or_else(out_of_range)?;
        let length = self.count.checked_mul(SECTOR_SIZE).ok_or_else(out_of_range)?;
        Ok((offset, length))
    }

    fn read(&mut self) -> Result<Vec<u8>, DeviceError> {
        let (offset, length) = self.checked_span()?;
        let mut data = vec![0; usize::try_from(length).map_err(|_| self.out_of_range())?];
        self.image.seek(SeekFrom::Start(offset))?;
        self.image.read_exact(&mut data)?;
        Ok(data)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let (offset, length) = self.checked_span()?;
        if data.len() as u64 != length {
            return Err(DeviceError::LengthMismatch {
                expected: length,
                actual: data.len() as u64,
            });
        }
        self.image.seek(SeekFrom::Start(offset))?;
        self.image.write_all(data)?;
        self.image.flush()?;
        Ok(())
    }

    const fn out_of_range(&self) -> DeviceError {
        DeviceError::OutOfRange {
            start: self.start,
            count: self.count,
            sectors: self.sectors,
        }
    }
}

/// A sector-addressed disk image.
#[derive(Debug)]
pub struct Disk {
    kind: DiskKind,
    ports: PortSet,
    state: Mutex<DiskState>,
}

impl Disk {
    /// Opens `path` read-write; trailing bytes short of a sector are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Open`] when the image cannot be opened.
    pub fn open(kind: DiskKind, path: &Path) -> Result<Self, DeviceError> {
        let open_error = |source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        };
        let image = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(open_error)?;
        let bytes = image.metadata().map_err(open_error)?.len();
        let base = kind.base_port();
        Ok(Self {
            kind,
            ports: PortSet::new(&[
                base + SIZE,
                base + START_SECTOR,
                base + SECTOR_COUNT,
                base + COMMAND_READ,
                base + COMMAND_WRITE,
            ]),
            state: Mutex::new(DiskState {
                image,
                sectors: bytes / SECTOR_SIZE,
                start: 0,
                count: 0,
            }),
        })
    }

    /// Drive slot.
    #[must_use]
    pub const fn kind(&self) -> DiskKind {
        self.kind
    }

    /// Sectors in the image.
    #[must_use]
    pub fn sectors(&self) -> u64 {
        self.lock().sectors
    }

    fn buffer(&self, port: u64) -> Result<&PortBuffer, DeviceError> {
        self.ports.get(port).ok_or(DeviceError::Unsupported { port })
    }

    fn read(&self, port: u64) -> Result<(), DeviceError> {
        let buffer = self.buffer(port)?;
        let mut state = self.lock();
        match port - self.kind.base_port() {
            SIZE => buffer.push_u64(state.sectors),
            COMMAND_READ => buffer.push_bytes(&state.read()?),
            _ => return Err(DeviceError::Unsupported { port }),
        }
        Ok(())
    }

    fn write(&self, port: u64) -> Result<(), DeviceError> {
        let buffer = self.buffer(port)?;
        let mut state = self.lock();
        match port - self.kind.base_port() {
            START_SECTOR => state.start = buffer.pop_u64().ok_or(DeviceError::MissingValue { port })?,
            SECTOR_COUNT => state.count = buffer.pop_u64().ok_or(DeviceError::MissingValue { port })?,
            COMMAND_WRITE => state.write(&buffer.take_all())?,
            _ => return Err(DeviceError::Unsupported { port }),
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Device for Disk {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn request_read(&self, port: u64) -> bool {
        self.read(port)
            .map_err(|err| log::warn!("{}: {err}", self.kind.name()))
            .is_ok()
    }

    fn request_write(&self, port: u64) -> bool {
        let result = self.write(port);
        if let Err(err) = &result {
            log::warn!("{}: {err}", self.kind.name());
            if let Some(buffer) = self.ports.get(port) {
                buffer.clear();
            }
        }
        result.is_ok()
    }
}
