//! Real-time clock.
//!
//! Port `0x70` reads the current epoch seconds and writes a new start time.
//! Port `0x71` programs a periodic interrupt: bits `[8:0]` are the vector
//! (must be above `0x1F`), bits `[38:9]` the period in [`RTC_TICK`] units.
//! A worker thread owns the timer and is driven over a channel.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::DeviceError;
use crate::io::{Device, InterruptQueue, PortSet};

/// Current-time port.
pub const RTC_CURRENT_TIME: u64 = 0x70;
/// Timer programming port.
pub const RTC_SET_INTERRUPT: u64 = 0x71;
/// Timer period unit.
pub const RTC_TICK: Duration = Duration::from_nanos(5000);

const VECTOR_MASK: u64 = 0x1FF;
const SCALE_SHIFT: u32 = 9;
const SCALE_MASK: u64 = 0x3FFF_FFFF;
const LAST_UNMASKABLE_VECTOR: u64 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    vector: u64,
    period: Duration,
}

impl Timer {
    fn decode(setting: u64) -> Result<Self, DeviceError> {
        let vector = setting & VECTOR_MASK;
        let scale = (setting >> SCALE_SHIFT) & SCALE_MASK;
        if vector <= LAST_UNMASKABLE_VECTOR || scale == 0 {
            return Err(DeviceError::InvalidTimer(setting));
        }
        Ok(Self {
            vector,
            period: RTC_TICK * u32::try_from(scale).map_err(|_| DeviceError::InvalidTimer(setting))?,
        })
    }
}

enum Command {
    Program(Timer),
    Stop,
}

#[derive(Debug)]
struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    start_seconds: u64,
    reference: Instant,
}

impl Clock {
    fn now(self) -> u64 {
        self.start_seconds
            .saturating_add(self.reference.elapsed().as_secs())
    }
}

/// Wall clock with a programmable periodic interrupt.
#[derive(Debug)]
pub struct RealTimeClock {
    ports: PortSet,
    clock: Mutex<Clock>,
    worker: Mutex<Option<Worker>>,
}

impl RealTimeClock {
    /// Starts a clock reading host time; timer interrupts go to `interrupts`.
    #[must_use]
    pub fn new(interrupts: InterruptQueue) -> Self {
        let host_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self::with_start(interrupts, host_seconds)
    }

    /// Starts a clock reading `start_seconds` now.
    #[must_use]
    pub fn with_start(interrupts: InterruptQueue, start_seconds: u64) -> Self {
        let (commands, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("rtc".into())
            .spawn(move || run_timer(&receiver, &interrupts))
            .map_err(|err| log::warn!("rtc timer thread unavailable: {err}"))
            .ok();
        Self {
            ports: PortSet::new(&[RTC_CURRENT_TIME, RTC_SET_INTERRUPT]),
            clock: Mutex::new(Clock {
                start_seconds,
                reference: Instant::now(),
            }),
            worker: Mutex::new(handle.map(|handle| Worker { commands, handle })),
        }
    }

    /// Current epoch seconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock().now()
    }

    fn set_time(&self, seconds: u64) {
        *self.clock() = Clock {
            start_seconds: seconds,
            reference: Instant::now(),
        };
    }

    fn program(&self, setting: u64) -> Result<(), DeviceError> {
        let timer = Timer::decode(setting)?;
        log::debug!(
            "rtc: vector {:#x} every {:?}",
            timer.vector,
            timer.period
        );
        if let Some(worker) = self.lock_worker().as_ref() {
            // A send only fails once the worker is gone, which shutdown handles.
            let _ = worker.commands.send(Command::Program(timer));
        }
        Ok(())
    }

    fn value(&self, port: u64) -> Result<u64, DeviceError> {
        self.ports
            .get(port)
            .and_then(crate::io::PortBuffer::pop_u64)
            .ok_or(DeviceError::MissingValue { port })
    }

    fn write(&self, port: u64) -> Result<(), DeviceError> {
        match port {
            RTC_CURRENT_TIME => {
                self.set_time(self.value(port)?);
                Ok(())
            }
            RTC_SET_INTERRUPT => self.program(self.value(port)?),
            _ => Err(DeviceError::Unsupported { port }),
        }
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_timer(commands: &Receiver<Command>, interrupts: &InterruptQueue) {
    let mut timer: Option<Timer> = None;
    let mut deadline = Instant::now();
    loop {
        let received = match timer {
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(active) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        interrupts.raise(active.vector);
                        deadline += active.period;
                        continue;
                    }
                    other => other,
                }
            }
        };
        match received {
            Ok(Command::Program(next)) => {
                deadline = Instant::now() + next.period;
                timer = Some(next);
            }
            Ok(Command::Stop) | Err(_) => return,
        }
    }
}

impl Device for RealTimeClock {
    fn name(&self) -> &str {
        "rtc"
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn request_read(&self, port: u64) -> bool {
        match (port, self.ports.get(port)) {
            (RTC_CURRENT_TIME, Some(buffer)) => {
                buffer.push_u64(self.now());
                true
            }
            _ => false,
        }
    }

    fn request_write(&self, port: u64) -> bool {
        self.write(port)
            .map_err(|err| log::warn!("rtc: {err}"))
            .is_ok()
    }

    fn shutdown(&self) {
        if let Some(worker) = self.lock_worker().take() {
            let _ = worker.commands.send(Command::Stop);
            if worker.handle.join().is_err() {
                log::warn!("rtc timer thread panicked");
            }
        }
    }
}
