//! Command-line parsing for `vm64`.

use std::ffi::OsString;
use std::path::PathBuf;

use vm64_core::MachineConfig;

pub const USAGE_TEXT: &str = "\
Usage: vm64 [options]

Options:
      --config <file>     Configuration file (must exist)
      --firmware <file>   Firmware image loaded at the BIOS region
      --memory <mib>      Total memory in MiB
      --hdd <file>        Hard disk image
      --fda <file>        Floppy A image
      --fdb <file>        Floppy B image
      --debug             Read monitor commands from stdin; stop before the first instruction
      --sample-config     Print a commented configuration file and exit
  -h, --help              Show this help message

Configuration is read from ~/.config/vm64/config.toml, ./vm64.toml, the
--config file and VM64_* environment variables, in that order; options
given here win over all of them.
";

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub firmware: Option<PathBuf>,
    pub memory_mib: Option<u64>,
    pub hard_disk: Option<PathBuf>,
    pub floppy_a: Option<PathBuf>,
    pub floppy_b: Option<PathBuf>,
    pub debug: bool,
}

impl RunArgs {
    /// Applies the command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut MachineConfig) {
        if let Some(path) = &self.firmware {
            config.boot.firmware = Some(path.clone());
        }
        if let Some(size) = self.memory_mib {
            config.memory.size_mib = size;
        }
        if let Some(path) = &self.hard_disk {
            config.disks.hard_disk = Some(path.clone());
        }
        if let Some(path) = &self.floppy_a {
            config.disks.floppy_a = Some(path.clone());
        }
        if let Some(path) = &self.floppy_b {
            config.disks.floppy_b = Some(path.clone());
        }
        if self.debug {
            config.debug.break_at_firmware_entry = true;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    Run(RunArgs),
    SampleConfig,
    Help,
}

pub fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut run = RunArgs::default();

    while let Some(arg) = args.next() {
        let flag = arg.to_string_lossy().into_owned();
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {name}"))
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseResult::Help),
            "--sample-config" => return Ok(ParseResult::SampleConfig),
            "--debug" => run.debug = true,
            "--config" => run.config = Some(value(&flag)?.into()),
            "--firmware" => run.firmware = Some(value(&flag)?.into()),
            "--hdd" => run.hard_disk = Some(value(&flag)?.into()),
            "--fda" => run.floppy_a = Some(value(&flag)?.into()),
            "--fdb" => run.floppy_b = Some(value(&flag)?.into()),
            "--memory" => {
                let text = value(&flag)?;
                let text = text.to_string_lossy();
                run.memory_mib = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| format!("invalid memory size: {text}"))?,
                );
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(ParseResult::Run(run))
}

#[cfg(test)]
mod tests {
    use super::{parse_args, ParseResult, RunArgs};
    use std::ffi::OsString;
    use std::path::PathBuf;
    use vm64_core::MachineConfig;

    fn parse(args: &[&str]) -> Result<ParseResult, String> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn parses_every_option() {
        let parsed = parse(&[
            "--config", "a.toml", "--firmware", "bios.bin", "--memory", "64", "--hdd", "hd.img",
            "--fda", "a.img", "--fdb", "b.img", "--debug",
        ])
        .unwrap();
        assert_eq!(
            parsed,
            ParseResult::Run(RunArgs {
                config: Some(PathBuf::from("a.toml")),
                firmware: Some(PathBuf::from("bios.bin")),
                memory_mib: Some(64),
                hard_disk: Some(PathBuf::from("hd.img")),
                floppy_a: Some(PathBuf::from("a.img")),
                floppy_b: Some(PathBuf::from("b.img")),
                debug: true,
            })
        );
    }

    #[test]
    fn sample_config_and_help_short_circuit() {
        assert_eq!(parse(&["--sample-config", "--bogus"]), Ok(ParseResult::SampleConfig));
        assert_eq!(parse(&["-h"]), Ok(ParseResult::Help));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--memory", "lots"]).unwrap_err().contains("invalid memory size"));
        assert!(parse(&["--firmware"]).unwrap_err().contains("missing value"));
        assert!(parse(&["bios.bin"]).unwrap_err().contains("unknown argument"));
    }

    #[test]
    fn overrides_win_over_loaded_config() {
        let mut config = MachineConfig::default();
        config.memory.size_mib = 8;
        let args = RunArgs {
            memory_mib: Some(4),
            hard_disk: Some(PathBuf::from("hd.img")),
            debug: true,
            ..RunArgs::default()
        };
        args.apply(&mut config);
        assert_eq!(config.memory.size_mib, 4);
        assert_eq!(config.disks.hard_disk, Some(PathBuf::from("hd.img")));
        assert_eq!(config.disks.floppy_a, None);
        assert!(config.debug.break_at_firmware_entry);
    }
}
