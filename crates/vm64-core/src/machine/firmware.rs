//! Native firmware services (vectors `0x10..=0x18`), the text display window
//! and the keyboard buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::memory::{DISPLAY_COLUMNS, DISPLAY_ROWS, DISPLAY_START};
use crate::{MachineError, Memory, RegisterFile, RegisterId, Width};

/// Keys buffered before new input is refused.
pub const KEYBOARD_CAPACITY: usize = 256;

const DISPLAY_CELLS: u64 = DISPLAY_COLUMNS * DISPLAY_ROWS;
const KEYBOARD_POLL: Duration = Duration::from_millis(50);
#[allow(clippy::cast_possible_truncation)]
const BLANK_ROW: [u8; DISPLAY_COLUMNS as usize] = [b' '; DISPLAY_COLUMNS as usize];

/// Text output collaborator. Rendering is the implementor's business.
pub trait Console: Send + Sync {
    /// Writes one character at the cursor.
    fn write_char(&self, ch: u8);

    /// Moves the cursor to a linear cell index.
    fn set_cursor(&self, position: u64);

    /// Shows or hides the cursor.
    fn set_cursor_visible(&self, _visible: bool) {}

    /// Rings the bell.
    fn bell(&self) {}

    /// Redraws everything.
    fn refresh(&self) {}
}

/// Console that discards output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl Console for NullConsole {
    fn write_char(&self, _ch: u8) {}

    fn set_cursor(&self, _position: u64) {}
}

/// Firmware services, one per vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `0x10`: print `EXR0`.
    Teletype,
    /// `0x11`: cursor to linear `EXR0`.
    SetCursor,
    /// `0x12`: cursor visibility.
    CursorVisibility,
    /// `0x13`: line feed.
    NewLine,
    /// `0x14`: wait for a key into `EXR0`.
    ReadKey,
    /// `0x15`: cursor into `EXR0`.
    GetCursor,
    /// `0x16`: memory size into `FER0`.
    MemorySize,
    /// `0x17`: bell.
    Bell,
    /// `0x18`: refresh.
    Refresh,
}

impl Service {
    /// Service for `vector`, if it is one.
    #[must_use]
    pub const fn from_vector(vector: u64) -> Option<Self> {
        Some(match vector {
            0x10 => Self::Teletype,
            0x11 => Self::SetCursor,
            0x12 => Self::CursorVisibility,
            0x13 => Self::NewLine,
            0x14 => Self::ReadKey,
            0x15 => Self::GetCursor,
            0x16 => Self::MemorySize,
            0x17 => Self::Bell,
            0x18 => Self::Refresh,
            _ => return None,
        })
    }
}

/// Bounded key queue fed by the host and drained by `ReadKey`.
#[derive(Debug, Default)]
pub struct Keyboard {
    keys: Mutex<VecDeque<u16>>,
    available: Condvar,
}

impl Keyboard {
    /// Queues a key; returns `false` when the buffer is full.
    pub fn try_push(&self, key: u16) -> bool {
        let mut keys = self.lock();
        if keys.len() >= KEYBOARD_CAPACITY {
            return false;
        }
        keys.push_back(key);
        self.available.notify_one();
        true
    }

    /// Waits for a key; gives up with `None` once `cancel` is set.
    pub fn wait_key(&self, cancel: &AtomicBool) -> Option<u16> {
        let mut keys = self.lock();
        loop {
            if let Some(key) = keys.pop_front() {
                return Some(key);
            }
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            keys = self
                .available
                .wait_timeout(keys, KEYBOARD_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes every waiter so it re-checks its cancel flag.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    /// Number of queued keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when no key is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u16>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Text display state: the cursor over the `80x25` window at `0xB8000`.
#[derive(Debug, Default)]
pub struct Display {
    cursor: Mutex<u64>,
}

impl Display {
    /// Linear cursor position.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        *self.lock()
    }

    fn set_cursor(&self, position: u64) {
        *self.lock() = position.min(DISPLAY_CELLS - 1);
    }

    /// Stores `ch` at the cursor and advances, scrolling at the bottom.
    fn put(&self, memory: &Memory, ch: u8) -> Result<(), MachineError> {
        let mut cursor = self.lock();
        memory.write(DISPLAY_START + *cursor, &[ch])?;
        *cursor += 1;
        if *cursor >= DISPLAY_CELLS {
            *cursor = scroll(memory)?;
        }
        Ok(())
    }

    fn new_line(&self, memory: &Memory) -> Result<(), MachineError> {
        let mut cursor = self.lock();
        let next = (*cursor / DISPLAY_COLUMNS + 1) * DISPLAY_COLUMNS;
        *cursor = if next >= DISPLAY_CELLS {
            scroll(memory)?
        } else {
            next
        };
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Moves every row up by one and blanks the last; returns the new cursor.
fn scroll(memory: &Memory) -> Result<u64, MachineError> {
    let body = memory.read_vec(DISPLAY_START + DISPLAY_COLUMNS, DISPLAY_CELLS - DISPLAY_COLUMNS)?;
    memory.write(DISPLAY_START, &body)?;
    let last_row = DISPLAY_START + DISPLAY_CELLS - DISPLAY_COLUMNS;
    memory.write(last_row, &BLANK_ROW)?;
    Ok(DISPLAY_CELLS - DISPLAY_COLUMNS)
}

const EXR0: RegisterId = RegisterId::General(0);

/// Everything a service may touch besides registers.
pub struct ServiceContext<'a> {
    /// Machine memory.
    pub memory: &'a Memory,
    /// Output collaborator.
    pub console: &'a dyn Console,
    /// Cursor and window state.
    pub display: &'a Display,
    /// Key queue.
    pub keyboard: &'a Keyboard,
    /// Set when the machine is shutting down.
    pub shutdown: &'a AtomicBool,
}

impl std::fmt::Debug for ServiceContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("display", self.display)
            .field("keyboard", self.keyboard)
            .finish_non_exhaustive()
    }
}

/// Runs a firmware service against `regs`.
///
/// # Errors
///
/// Returns [`MachineError::IllegalMemoryAccess`] when the display window is
/// outside memory.
pub fn run_service(
    service: Service,
    regs: &mut RegisterFile,
    ctx: &ServiceContext<'_>,
) -> Result<(), MachineError> {
    log::trace!("firmware service {service:?}");
    match service {
        Service::Teletype => {
            let [ch, ..] = regs.load(Width::W16, EXR0).to_le_bytes();
            if ch == b'\n' {
                ctx.display.new_line(ctx.memory)?;
            } else {
                ctx.display.put(ctx.memory, ch)?;
            }
            ctx.console.write_char(ch);
        }
        Service::SetCursor => {
            ctx.display.set_cursor(regs.load(Width::W16, EXR0));
            ctx.console.set_cursor(ctx.display.cursor());
        }
        Service::CursorVisibility => ctx
            .console
            .set_cursor_visible(regs.load(Width::W16, EXR0) != 0),
        Service::NewLine => {
            ctx.display.new_line(ctx.memory)?;
            ctx.console.write_char(b'\n');
        }
        Service::ReadKey => {
            if let Some(key) = ctx.keyboard.wait_key(ctx.shutdown) {
                regs.store(Width::W16, EXR0, u64::from(key));
            }
        }
        Service::GetCursor => regs.store(Width::W16, EXR0, ctx.display.cursor()),
        Service::MemorySize => regs.store(Width::W64, EXR0, ctx.memory.total()),
        Service::Bell => ctx.console.bell(),
        Service::Refresh => ctx.console.refresh(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        run_service, Console, Display, Keyboard, NullConsole, Service, ServiceContext,
        DISPLAY_CELLS, KEYBOARD_CAPACITY,
    };
    use crate::memory::{DISPLAY_COLUMNS, DISPLAY_START};
    use crate::{Memory, RegisterFile, RegisterId, Width};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        text: Mutex<Vec<u8>>,
    }

    impl Console for Recording {
        fn write_char(&self, ch: u8) {
            self.text.lock().unwrap().push(ch);
        }

        fn set_cursor(&self, _position: u64) {}
    }

    struct Fixture {
        memory: Memory,
        display: Display,
        keyboard: Keyboard,
        shutdown: AtomicBool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                memory: Memory::new(0x10_0000),
                display: Display::default(),
                keyboard: Keyboard::default(),
                shutdown: AtomicBool::new(false),
            }
        }

        fn ctx<'a>(&'a self, console: &'a dyn Console) -> ServiceContext<'a> {
            ServiceContext {
                memory: &self.memory,
                console,
                display: &self.display,
                keyboard: &self.keyboard,
                shutdown: &self.shutdown,
            }
        }
    }

    fn exr0(regs: &RegisterFile) -> u64 {
        regs.load(Width::W16, RegisterId::General(0))
    }

    #[test]
    fn teletype_writes_console_and_window() {
        let fixture = Fixture::new();
        let console = Recording::default();
        let mut regs = RegisterFile::default();
        for ch in *b"hi" {
            regs.set_general(0, u64::from(ch));
            run_service(Service::Teletype, &mut regs, &fixture.ctx(&console)).unwrap();
        }
        assert_eq!(*console.text.lock().unwrap(), b"hi".to_vec());
        assert_eq!(fixture.memory.read_vec(DISPLAY_START, 2).unwrap(), b"hi".to_vec());
        run_service(Service::GetCursor, &mut regs, &fixture.ctx(&console)).unwrap();
        assert_eq!(exr0(&regs), 2);
    }

    #[test]
    fn writing_past_the_last_cell_scrolls() {
        let fixture = Fixture::new();
        let mut regs = RegisterFile::default();
        fixture.memory.write(DISPLAY_START + DISPLAY_COLUMNS, b"second").unwrap();
        regs.set_general(0, DISPLAY_CELLS - 1);
        run_service(Service::SetCursor, &mut regs, &fixture.ctx(&NullConsole)).unwrap();
        regs.set_general(0, u64::from(b'z'));
        run_service(Service::Teletype, &mut regs, &fixture.ctx(&NullConsole)).unwrap();

        assert_eq!(fixture.memory.read_vec(DISPLAY_START, 6).unwrap(), b"second".to_vec());
        assert_eq!(fixture.display.cursor(), DISPLAY_CELLS - DISPLAY_COLUMNS);
        assert_eq!(
            fixture
                .memory
                .read_vec(DISPLAY_START + DISPLAY_CELLS - DISPLAY_COLUMNS - 1, 1)
                .unwrap(),
            b"z".to_vec()
        );
    }

    #[test]
    fn newline_moves_to_next_row() {
        let fixture = Fixture::new();
        let mut regs = RegisterFile::default();
        regs.set_general(0, 5);
        run_service(Service::SetCursor, &mut regs, &fixture.ctx(&NullConsole)).unwrap();
        run_service(Service::NewLine, &mut regs, &fixture.ctx(&NullConsole)).unwrap();
        assert_eq!(fixture.display.cursor(), DISPLAY_COLUMNS);
    }

    #[test]
    fn read_key_and_memory_size() {
        let fixture = Fixture::new();
        let mut regs = RegisterFile::default();
        assert!(fixture.keyboard.try_push(u16::from(b'k')));
        run_service(Service::ReadKey, &mut regs, &fixture.ctx(&NullConsole)).unwrap();
        assert_eq!(exr0(&regs), u64::from(b'k'));

        run_service(Service::MemorySize, &mut regs, &fixture.ctx(&NullConsole)).unwrap();
        assert_eq!(regs.general(0), 0x10_0000);
    }

    #[test]
    fn keyboard_refuses_input_when_full_and_cancels_waits() {
        let keyboard = Keyboard::default();
        for key in 0..KEYBOARD_CAPACITY {
            assert!(keyboard.try_push(u16::try_from(key).unwrap()));
        }
        assert!(!keyboard.try_push(0));

        let empty = Keyboard::default();
        assert_eq!(empty.wait_key(&AtomicBool::new(true)), None);
    }

    #[test]
    fn service_vectors_cover_the_firmware_range() {
        assert_eq!(Service::from_vector(0x10), Some(Service::Teletype));
        assert_eq!(Service::from_vector(0x18), Some(Service::Refresh));
        assert_eq!(Service::from_vector(0x19), None);
        assert_eq!(Service::from_vector(0x0F), None);
    }
}
