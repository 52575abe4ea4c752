//! End-to-end runs of the `vm64` binary on firmware built with vm64-asm.

use anyhow as _;
use env_logger as _;
use log as _;
use vm64_core as _;

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use vm64_asm::{assemble_file, link};

const CONFIG: &str = "[memory]\nsize_mib = 2\n\n[rtc]\nenabled = false\n";

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("vm64")
}

/// Assembles `source` into `dir/bios.bin` and writes a matching config.
fn prepare(dir: &Path, source: &str) -> PathBuf {
    let source_path = dir.join("bios.asm");
    fs::write(&source_path, source).unwrap();
    let object = assemble_file(&source_path, &[]).unwrap();
    let image = link(vec![object]).unwrap();
    let firmware = dir.join("bios.bin");
    fs::write(&firmware, image.bytes).unwrap();
    fs::write(dir.join("machine.toml"), CONFIG).unwrap();
    firmware
}

fn vm64(dir: &Path) -> Command {
    let mut command = Command::new(binary_path());
    command
        .current_dir(dir)
        .env_remove("HOME")
        .env_remove("VM64_MEMORY_MIB")
        .env_remove("VM64_FIRMWARE")
        .env_remove("VM64_HARD_DISK")
        .env("RUST_LOG", "warn")
        .args(["--config", "machine.toml"]);
    command
}

fn run_firmware(source: &str) -> Output {
    let temp_dir = tempfile::tempdir().unwrap();
    let firmware = prepare(temp_dir.path(), source);
    vm64(temp_dir.path())
        .arg("--firmware")
        .arg(firmware)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run vm64")
}

#[test]
fn teletype_output_and_clean_halt() {
    let output = run_firmware(
        "mov .16bit <%EXR0>, <$('o')>\n\
         int <$(0x10)>\n\
         mov .16bit <%EXR0>, <$('k')>\n\
         int <$(0x10)>\n\
         hlt\n",
    );

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("ok"));
}

#[test]
fn fatal_stop_exits_with_failure() {
    // The interrupt frame does not fit in eight bytes of stack, nor does the
    // stack-overflow frame that follows.
    let output = run_firmware("mov .64bit <%SP>, <$(8)>\nint <$(0x21)>\nhlt\n");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_firmware_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("machine.toml"), CONFIG).unwrap();

    let output = vm64(temp_dir.path())
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no firmware image configured"));
}

#[test]
fn sample_config_is_printed() {
    let output = Command::new(binary_path())
        .arg("--sample-config")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("[memory]"));
    assert!(text.contains("[boot]"));
}

#[test]
fn unknown_argument_fails_with_usage() {
    let output = Command::new(binary_path()).arg("--turbo").output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage: vm64"));
}

#[test]
fn debug_monitor_stops_at_entry_and_continues() {
    let temp_dir = tempfile::tempdir().unwrap();
    let firmware = prepare(temp_dir.path(), "mov .64bit <%FER0>, <$(9)>\nhlt\n");

    let mut child = vm64(temp_dir.path())
        .arg("--firmware")
        .arg(firmware)
        .arg("--debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let mut line = String::new();
    while !line.contains("break:") {
        line.clear();
        assert_ne!(stdout.read_line(&mut line).unwrap(), 0, "no break reported");
    }
    assert!(line.contains("FirmwareEntry"));

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"x 0 4\nc\n").unwrap();
    drop(stdin);

    let rest: Vec<String> = stdout.lines().map(Result::unwrap).collect();
    assert!(child.wait().unwrap().success());
    assert!(rest.iter().any(|row| row.starts_with("0x0000000000: ")));
}
