//! `vm64`: boots a firmware image on the vm64 machine.

mod args;
mod monitor;
mod terminal;

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context as _};
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use vm64_asm as _;
use vm64_core::{sample_config, ConfigSources, Machine, MachineConfig, RunState};

use crate::args::{parse_args, ParseResult, RunArgs, USAGE_TEXT};
use crate::terminal::TerminalConsole;

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ParseResult::SampleConfig) => {
            print!("{}", sample_config());
            Ok(ExitCode::SUCCESS)
        }
        Ok(ParseResult::Run(args)) => {
            let state = run(&args)?;
            Ok(ExitCode::from(exit_status(state)))
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            Ok(ExitCode::from(2))
        }
    }
}

/// 0 after `HLT`, 1 after a fatal stop.
fn exit_status(state: RunState) -> u8 {
    u8::from(state != RunState::HaltRequested)
}

fn run(args: &RunArgs) -> anyhow::Result<RunState> {
    let sources = ConfigSources::from_env(args.config.clone());
    let mut config = MachineConfig::load(&sources).context("loading configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let firmware_path = config
        .boot
        .firmware
        .clone()
        .context("no firmware image configured (use --firmware or [boot] firmware)")?;
    let firmware = fs::read(&firmware_path)
        .with_context(|| format!("reading firmware {}", firmware_path.display()))?;

    let machine = Arc::new(Machine::with_console(
        &config,
        Arc::new(TerminalConsole::default()),
    ));
    machine
        .attach_configured_devices()
        .context("attaching devices")?;
    machine
        .load_firmware(&firmware)
        .with_context(|| format!("loading firmware {}", firmware_path.display()))?;
    log::info!(
        "booting {} ({} bytes, {} MiB memory)",
        firmware_path.display(),
        firmware.len(),
        config.memory.size_mib
    );

    if args.debug {
        start_monitor(&machine)?;
    } else {
        let machine = Arc::clone(&machine);
        thread::Builder::new()
            .name("vm64-keyboard".into())
            .spawn(move || {
                if let Err(e) = terminal::feed_keyboard(&machine, io::stdin().lock()) {
                    log::warn!("keyboard input failed: {e}");
                }
            })
            .context("starting keyboard thread")?;
    }

    let runner = thread::Builder::new()
        .name("vm64-cpu".into())
        .spawn({
            let machine = Arc::clone(&machine);
            move || machine.run()
        })
        .context("starting execution thread")?;

    let state = runner
        .join()
        .map_err(|_| anyhow!("execution thread panicked"))?;
    let diagnostics = machine.diagnostics();
    if state == RunState::HaltRequested {
        log::info!(
            "halted after {} instruction(s)",
            diagnostics.instruction_count
        );
    } else {
        log::error!(
            "stopped in state {state:?} after {} instruction(s)",
            diagnostics.instruction_count
        );
    }
    machine.power_off();
    Ok(state)
}

fn start_monitor(machine: &Arc<Machine>) -> anyhow::Result<()> {
    machine.debug().set_handler(Box::new(|info| {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "\nbreak: {info}").and_then(|()| stdout.flush());
    }));
    let machine = Arc::clone(machine);
    thread::Builder::new()
        .name("vm64-monitor".into())
        .spawn(move || {
            let result = monitor::run(&machine, io::stdin().lock(), &mut io::stdout());
            if let Err(e) = result {
                log::warn!("monitor input failed: {e}");
            }
            machine.request_shutdown();
        })
        .context("starting monitor thread")?;
    Ok(())
}
