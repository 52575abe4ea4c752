//! CLI entry point for the vm64 assembler.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
use vm64_asm::{assemble_file, link, LinkedImage, ObjectModule};
use vm64_core::disassemble;

const USAGE_TEXT: &str = "\
Usage: vm64-asm <command> [options]

Commands:
  build <input>... [-o <output>] [-D NAME=VALUE] [--verbose]
                                           Assemble and link sources to a flat image
  disasm <image> [--org <address>]         List the instructions in an image

Options:
  -o, --output <file>    Output file path (default: first input stem + .bin)
  -D, --define <N=V>     Predefine a name, as %define N V
  -v, --verbose          Print the symbol map to stderr (build only)
      --org <address>    Address of the first byte (disasm only, default 0)
  -h, --help             Show this help message

Examples:
  vm64-asm build bios.asm
  vm64-asm build boot.asm lib.asm -o boot.bin
  vm64-asm disasm boot.bin --org 0xC1800
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Build(BuildArgs),
    Disasm(DisasmArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct BuildArgs {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    defines: Vec<(String, String)>,
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct DisasmArgs {
    input: PathBuf,
    origin: u64,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    match &*first.to_string_lossy() {
        "build" => parse_build_args(args)
            .map(Command::Build)
            .map(ParseResult::Command),
        "disasm" => parse_disasm_args(args)
            .map(Command::Disasm)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_build_args(mut args: impl Iterator<Item = OsString>) -> Result<BuildArgs, String> {
    let mut inputs = Vec::new();
    let mut output: Option<PathBuf> = None;
    let mut defines = Vec::new();
    let mut verbose = false;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--verbose" || arg == "-v" {
            verbose = true;
            continue;
        }

        if arg == "-o" || arg == "--output" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for -o".to_string())?;
            output = Some(PathBuf::from(value));
            continue;
        }

        if arg == "-D" || arg == "--define" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for -D".to_string())?;
            let value = value.to_string_lossy();
            let (name, text) = value.split_once('=').unwrap_or((&*value, ""));
            defines.push((name.to_string(), text.to_string()));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        inputs.push(PathBuf::from(arg));
    }

    if inputs.is_empty() {
        return Err("missing input path".to_string());
    }
    Ok(BuildArgs {
        inputs,
        output,
        defines,
        verbose,
    })
}

fn parse_disasm_args(mut args: impl Iterator<Item = OsString>) -> Result<DisasmArgs, String> {
    let mut input: Option<PathBuf> = None;
    let mut origin = 0;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--org" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --org".to_string())?;
            origin = parse_address(&value.to_string_lossy())?;
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if input.is_some() {
            return Err("multiple input paths provided".to_string());
        }
        input = Some(PathBuf::from(arg));
    }

    let input = input.ok_or_else(|| "missing input path".to_string())?;
    Ok(DisasmArgs { input, origin })
}

fn parse_address(text: &str) -> Result<u64, String> {
    let parsed = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(|| text.parse(), |hex| u64::from_str_radix(hex, 16));
    parsed.map_err(|_| format!("invalid address: {text}"))
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");

    let parent = input.parent().unwrap_or_else(|| Path::new(""));

    parent.join(format!("{stem}.bin"))
}

fn run_build(args: BuildArgs) -> Result<(), i32> {
    let mut objects: Vec<ObjectModule> = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        match assemble_file(input, &args.defines) {
            Ok(object) => objects.push(object),
            Err(e) => {
                eprintln!("{}", e.format_for_stderr());
                return Err(1);
            }
        }
    }

    let linked = match link(objects) {
        Ok(linked) => linked,
        Err(e) => {
            eprintln!("error: {e}");
            return Err(1);
        }
    };

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.inputs[0]));

    if let Err(e) = fs::write(&output_path, &linked.bytes) {
        eprintln!("error: failed to write output: {e}");
        return Err(1);
    }

    if args.verbose {
        print_symbols(&linked);
    }

    log::info!("wrote {}", output_path.display());
    println!(
        "Assembled {} file(s) ({} bytes) -> {}",
        args.inputs.len(),
        linked.bytes.len(),
        output_path.display()
    );

    Ok(())
}

fn print_symbols(linked: &LinkedImage) {
    for (name, address) in &linked.symbols {
        eprintln!("{address:#018X} {name}");
    }
}

fn run_disasm(args: &DisasmArgs) -> Result<(), i32> {
    let bytes = match fs::read(&args.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", args.input.display());
            return Err(1);
        }
    };

    for row in disassemble(&bytes, args.origin) {
        println!("{row}");
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Build(args))) => match run_build(args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Disasm(args))) => match run_disasm(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}
