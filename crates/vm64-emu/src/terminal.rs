//! Host terminal console and stdin keyboard feed.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use vm64_core::{Console, Machine};

const KEYBOARD_RETRY: Duration = Duration::from_millis(10);

/// Writes guest text straight to stdout.
#[derive(Debug, Default)]
pub struct TerminalConsole {
    cursor: AtomicU64,
}

impl Console for TerminalConsole {
    fn write_char(&self, ch: u8) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout.write_all(&[ch]).and_then(|()| stdout.flush()) {
            log::warn!("console write failed: {e}");
        }
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }

    fn set_cursor(&self, position: u64) {
        self.cursor.store(position, Ordering::Relaxed);
    }

    fn bell(&self) {
        self.write_char(0x07);
    }
}

/// Feeds stdin lines to the guest keyboard, one key per byte and a line
/// feed per line. Waits while the buffer is full.
pub fn feed_keyboard(machine: &Machine, input: impl BufRead) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        for key in line.bytes().chain(std::iter::once(b'\n')) {
            while !machine.try_add_keyboard_input(u16::from(key)) {
                if machine.run_state().is_stopped() {
                    return Ok(());
                }
                thread::sleep(KEYBOARD_RETRY);
            }
        }
    }
    log::debug!("keyboard input closed");
    Ok(())
}
