//! Machine configuration.
//!
//! Sources are layered, later ones winning key by key:
//! 1. Built-in defaults
//! 2. User config file (`$HOME/.config/vm64/config.toml`)
//! 3. Project-local config file (`./vm64.toml`)
//! 4. An explicit path given by the host
//! 5. Environment variables (`VM64_MEMORY_MIB`, `VM64_FIRMWARE`, `VM64_HARD_DISK`)
//!
//! Files are merged as TOML tables before deserializing, so a file that only
//! sets `[rtc] enabled = false` leaves every other key at its earlier value.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::memory::EXTENDED_START;
use crate::peripherals::DiskKind;

/// Project-local config file name.
pub const LOCAL_CONFIG_FILE: &str = "vm64.toml";

const MIB: u64 = 1024 * 1024;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A config file is not valid TOML or has mistyped keys.
    #[error("invalid config {origin}: {source}")]
    Parse {
        /// File name or `<string>`.
        origin: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// An environment override does not parse.
    #[error("invalid value {value:?} for {name}")]
    Environment {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// `memory.size_mib` is zero or overflows.
    #[error("memory size of {size_mib} MiB is unusable")]
    BadMemorySize {
        /// Configured size.
        size_mib: u64,
    },
    /// Memory cannot hold the reserved low megabyte.
    #[error("memory of {bytes:#x} bytes cannot hold the reserved region ending at {required:#x}")]
    MemoryTooSmall {
        /// Configured memory size.
        bytes: u64,
        /// Minimum size.
        required: u64,
    },
    /// `boot.stack_size` is zero.
    #[error("stack size must be non-zero")]
    ZeroStack,
    /// Stack region extends past the end of memory.
    #[error("stack {base:#x}+{size:#x} exceeds memory of {total:#x} bytes")]
    StackOutOfRange {
        /// Configured stack base.
        base: u64,
        /// Configured stack size.
        size: u64,
        /// Memory size.
        total: u64,
    },
}

/// `[memory]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Total memory in MiB.
    pub size_mib: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { size_mib: 32 }
    }
}

/// `[boot]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// Firmware image loaded at the BIOS region.
    pub firmware: Option<PathBuf>,
    /// Initial `SB`.
    pub stack_base: u64,
    /// Initial `SP` and `CPS`.
    pub stack_size: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            firmware: None,
            stack_base: 0x10_0000,
            stack_size: 0x1_0000,
        }
    }
}

/// `[rtc]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RtcConfig {
    /// Attach the real-time clock.
    pub enabled: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `[disks]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfig {
    /// Floppy A image.
    pub floppy_a: Option<PathBuf>,
    /// Floppy B image.
    pub floppy_b: Option<PathBuf>,
    /// Hard disk image.
    pub hard_disk: Option<PathBuf>,
}

/// `[debug]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    /// Stop before the first firmware instruction.
    pub break_at_firmware_entry: bool,
}

/// Complete machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Memory sizing.
    pub memory: MemoryConfig,
    /// Firmware and initial stack.
    pub boot: BootConfig,
    /// Real-time clock.
    pub rtc: RtcConfig,
    /// Block storage images.
    pub disks: DiskConfig,
    /// Debugger defaults.
    pub debug: DebugConfig,
}

/// Where configuration is looked up; [`ConfigSources::from_env`] reads the
/// real process environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// User config file, if a home directory is known.
    pub user_file: Option<PathBuf>,
    /// Project-local config file.
    pub local_file: Option<PathBuf>,
    /// Explicit file; unlike the others it must exist.
    pub explicit_file: Option<PathBuf>,
    /// Environment variable lookups as `(name, value)`.
    pub environment: Vec<(String, String)>,
}

impl ConfigSources {
    /// Sources for the running process.
    #[must_use]
    pub fn from_env(explicit_file: Option<PathBuf>) -> Self {
        let user_file = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config").join("vm64").join("config.toml"));
        let environment = ["VM64_MEMORY_MIB", "VM64_FIRMWARE", "VM64_HARD_DISK"]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        Self {
            user_file,
            local_file: Some(PathBuf::from(LOCAL_CONFIG_FILE)),
            explicit_file,
            environment,
        }
    }

    fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl MachineConfig {
    /// Loads and validates configuration from every source.
    ///
    /// Unreadable or malformed implicit files are skipped with a warning; an
    /// explicit file must load.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a bad explicit file, a bad environment
    /// override, or a configuration that fails [`Self::validate`].
    pub fn load(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let mut table = toml::Table::new();
        for path in [&sources.user_file, &sources.local_file].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match read_table(path) {
                Ok(layer) => {
                    log::info!("loaded config from {}", path.display());
                    merge(&mut table, layer);
                }
                Err(err) => log::warn!("ignoring config: {err}"),
            }
        }
        if let Some(path) = &sources.explicit_file {
            merge(&mut table, read_table(path)?);
            log::info!("loaded config from {}", path.display());
        }

        let mut config: Self =
            toml::Value::Table(table)
                .try_into()
                .map_err(|source| ConfigError::Parse {
                    origin: "merged configuration".into(),
                    source,
                })?;
        config.apply_env_overrides(sources)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a single TOML document over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "<string>".into(),
            source,
        })
    }

    fn apply_env_overrides(&mut self, sources: &ConfigSources) -> Result<(), ConfigError> {
        if let Some(value) = sources.env("VM64_MEMORY_MIB") {
            self.memory.size_mib =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Environment {
                        name: "VM64_MEMORY_MIB",
                        value: value.to_string(),
                    })?;
            log::info!("using VM64_MEMORY_MIB={value} from environment");
        }
        if let Some(value) = sources.env("VM64_FIRMWARE") {
            log::info!("using VM64_FIRMWARE={value} from environment");
            self.boot.firmware = Some(PathBuf::from(value));
        }
        if let Some(value) = sources.env("VM64_HARD_DISK") {
            log::info!("using VM64_HARD_DISK={value} from environment");
            self.disks.hard_disk = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Memory size in bytes, if representable.
    #[must_use]
    pub const fn total_memory_bytes(&self) -> Option<u64> {
        self.memory.size_mib.checked_mul(MIB)
    }

    /// Checks the configuration can build a machine.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = match self.total_memory_bytes() {
            Some(total) if total > 0 => total,
            _ => {
                return Err(ConfigError::BadMemorySize {
                    size_mib: self.memory.size_mib,
                })
            }
        };
        if total < EXTENDED_START {
            return Err(ConfigError::MemoryTooSmall {
                bytes: total,
                required: EXTENDED_START,
            });
        }
        let BootConfig {
            stack_base: base,
            stack_size: size,
            ..
        } = self.boot;
        if size == 0 {
            return Err(ConfigError::ZeroStack);
        }
        match base.checked_add(size) {
            Some(end) if end <= total => Ok(()),
            _ => Err(ConfigError::StackOutOfRange { base, size, total }),
        }
    }

    /// Configured disk images with their drive slots.
    pub fn disk_images(&self) -> impl Iterator<Item = (DiskKind, &Path)> {
        [
            (DiskKind::FloppyA, self.disks.floppy_a.as_deref()),
            (DiskKind::FloppyB, self.disks.floppy_b.as_deref()),
            (DiskKind::HardDisk, self.disks.hard_disk.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.map(|path| (kind, path)))
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<toml::Table>()
        .map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
}

fn merge(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Commented configuration file with every default spelled out.
#[must_use]
pub fn sample_config() -> String {
    let defaults = MachineConfig::default();
    format!(
        r#"# vm64 configuration
# Place this file at ~/.config/vm64/config.toml or ./{LOCAL_CONFIG_FILE}

[memory]
# Total memory in MiB; at least 1 for the reserved low region.
size_mib = {size}

[boot]
# Firmware image loaded at the BIOS region.
# firmware = "bios.bin"
stack_base = {base:#x}
stack_size = {stack:#x}

[rtc]
enabled = {rtc}

[disks]
# floppy_a = "a.img"
# floppy_b = "b.img"
# hard_disk = "hdd.img"

[debug]
break_at_firmware_entry = {brk}
"#,
        size = defaults.memory.size_mib,
        base = defaults.boot.stack_base,
        stack = defaults.boot.stack_size,
        rtc = defaults.rtc.enabled,
        brk = defaults.debug.break_at_firmware_entry,
    )
}

#[cfg(test)]
mod tests {
    use super::{sample_config, ConfigError, ConfigSources, MachineConfig};
    use std::path::PathBuf;

    #[test]
    fn defaults_validate() {
        let config = MachineConfig::default();
        assert_eq!(config.total_memory_bytes(), Some(32 * 1024 * 1024));
        assert!(config.rtc.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn sample_config_parses_back_to_defaults() {
        let parsed = MachineConfig::from_toml_str(&sample_config()).unwrap();
        assert_eq!(parsed, MachineConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = MachineConfig::from_toml_str("[rtc]\nenabled = false\n").unwrap();
        assert!(!config.rtc.enabled);
        assert_eq!(config.memory.size_mib, 32);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            MachineConfig::from_toml_str("[memory]\nsize = 4\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn later_files_override_earlier_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let local = dir.path().join("local.toml");
        std::fs::write(&user, "[memory]\nsize_mib = 8\n[rtc]\nenabled = false\n").unwrap();
        std::fs::write(&local, "[memory]\nsize_mib = 16\n").unwrap();

        let config = MachineConfig::load(&ConfigSources {
            user_file: Some(user),
            local_file: Some(local),
            ..ConfigSources::default()
        })
        .unwrap();
        assert_eq!(config.memory.size_mib, 16);
        assert!(!config.rtc.enabled);
    }

    #[test]
    fn environment_beats_files() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("vm.toml");
        std::fs::write(&explicit, "[memory]\nsize_mib = 8\n").unwrap();

        let config = MachineConfig::load(&ConfigSources {
            explicit_file: Some(explicit),
            environment: vec![
                ("VM64_MEMORY_MIB".into(), "4".into()),
                ("VM64_HARD_DISK".into(), "disk.img".into()),
            ],
            ..ConfigSources::default()
        })
        .unwrap();
        assert_eq!(config.memory.size_mib, 4);
        assert_eq!(config.disks.hard_disk, Some(PathBuf::from("disk.img")));
        assert_eq!(config.disk_images().count(), 1);
    }

    #[test]
    fn missing_explicit_file_is_an_error_but_missing_local_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let sources = ConfigSources {
            local_file: Some(dir.path().join("absent.toml")),
            ..ConfigSources::default()
        };
        assert!(MachineConfig::load(&sources).is_ok());

        let sources = ConfigSources {
            explicit_file: Some(dir.path().join("absent.toml")),
            ..ConfigSources::default()
        };
        assert!(matches!(
            MachineConfig::load(&sources),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn bad_environment_value_is_reported() {
        let sources = ConfigSources {
            environment: vec![("VM64_MEMORY_MIB".into(), "lots".into())],
            ..ConfigSources::default()
        };
        assert!(matches!(
            MachineConfig::load(&sources),
            Err(ConfigError::Environment {
                name: "VM64_MEMORY_MIB",
                ..
            })
        ));
    }

    #[test]
    fn validation_rejects_unusable_layouts() {
        let mut config = MachineConfig::default();
        config.memory.size_mib = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadMemorySize { size_mib: 0 })
        ));

        let mut config = MachineConfig::default();
        config.boot.stack_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroStack)));

        let mut config = MachineConfig::default();
        config.memory.size_mib = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StackOutOfRange { .. })
        ));
    }
}
