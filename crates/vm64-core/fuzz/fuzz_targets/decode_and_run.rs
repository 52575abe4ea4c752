#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use vm64_core::{disassemble, Machine, MachineConfig, BIOS_START};

const MAX_STEPS: usize = vm64_core::machine::KEYBOARD_CAPACITY;

fuzz_target!(|data: &[u8]| {
    let rows = disassemble(data, BIOS_START);
    let covered: usize = rows.iter().map(|row| row.bytes.len()).sum();
    assert_eq!(covered, data.len());

    let mut config = MachineConfig::default();
    config.memory.size_mib = 2;
    config.rtc.enabled = false;
    let machine = Arc::new(Machine::new(&config));
    let weak = Arc::downgrade(&machine);
    machine.debug().set_handler(Box::new(move |_| {
        if let Some(machine) = weak.upgrade() {
            machine.debug().resume();
        }
    }));
    if machine.load_firmware(data).is_err() {
        return;
    }
    // A full keyboard buffer keeps key reads from blocking.
    while machine.try_add_keyboard_input(u16::from(b'a')) {}
    for _ in 0..MAX_STEPS {
        if machine.step().is_stopped() {
            break;
        }
    }
});
