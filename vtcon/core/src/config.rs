//! Configuration.
//!
//! Sources, later wins: built-in defaults → TOML config file → `VTCON_*`
//! environment variables → command-line overrides (applied by the binary).
//! Malformed environment values are logged and ignored, keeping startup
//! robust; a malformed config *file* is an error, since the user asked for
//! it explicitly.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// How the VT session is backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VtMode {
    /// A real kernel VT in process switch mode.
    Kernel,
    /// The in-memory simulated VT.
    Simulated,
}

/// Resolved runtime configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// VT backing mode.
    pub vt_mode: VtMode,
    /// Fixed VT number for kernel mode; `None` asks the kernel for a free
    /// one.
    pub vt_number: Option<u16>,
    /// Display count for the headless video subsystem.
    pub displays: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Simulated by default: runnable anywhere, no VT capability
            // required.
            vt_mode: VtMode::Simulated,
            vt_number: None,
            displays: 1,
        }
    }
}

impl Config {
    /// Apply a parsed config file on top of this configuration.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(mode) = file.vt.mode {
            self.vt_mode = mode;
        }
        if let Some(number) = file.vt.number {
            self.vt_number = Some(number);
        }
        if let Some(displays) = file.video.displays {
            self.displays = displays;
        }
    }

    /// Apply `VTCON_*` environment variables on top of this configuration.
    ///
    /// `VTCON_VT_MODE` (`kernel`/`simulated`), `VTCON_VT` (number),
    /// `VTCON_DISPLAYS` (count). Unparsable values are logged and skipped.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("VTCON_VT_MODE") {
            match value.as_str() {
                "kernel" => self.vt_mode = VtMode::Kernel,
                "simulated" | "sim" => self.vt_mode = VtMode::Simulated,
                other => warn!(value = other, "ignoring unknown VTCON_VT_MODE"),
            }
        }
        if let Ok(value) = std::env::var("VTCON_VT") {
            match value.parse::<u16>() {
                Ok(number) => self.vt_number = Some(number),
                Err(_) => warn!(value = %value, "ignoring unparsable VTCON_VT"),
            }
        }
        if let Ok(value) = std::env::var("VTCON_DISPLAYS") {
            match value.parse::<u32>() {
                Ok(displays) => self.displays = displays,
                Err(_) => warn!(value = %value, "ignoring unparsable VTCON_DISPLAYS"),
            }
        }
    }
}

/// On-disk configuration schema.
///
/// ```toml
/// [vt]
/// mode = "kernel"
/// number = 8
///
/// [video]
/// displays = 2
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// VT session settings.
    #[serde(default)]
    pub vt: VtSection,
    /// Video subsystem settings.
    #[serde(default)]
    pub video: VideoSection,
}

/// `[vt]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VtSection {
    /// VT backing mode.
    pub mode: Option<VtMode>,
    /// Fixed VT number for kernel mode.
    pub number: Option<u16>,
}

/// `[video]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoSection {
    /// Display count for the headless video subsystem.
    pub displays: Option<u32>,
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_simulated_single_display() {
        let config = Config::default();
        assert_eq!(config.vt_mode, VtMode::Simulated);
        assert_eq!(config.vt_number, None);
        assert_eq!(config.displays, 1);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [vt]
            mode = "kernel"
            number = 8

            [video]
            displays = 2
            "#,
        )
        .expect("parse");

        let mut config = Config::default();
        config.apply_file(&file);

        assert_eq!(config.vt_mode, VtMode::Kernel);
        assert_eq!(config.vt_number, Some(8));
        assert_eq!(config.displays, 2);
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let file: ConfigFile = toml::from_str("[video]\ndisplays = 3\n").expect("parse");

        let mut config = Config::default();
        config.apply_file(&file);

        assert_eq!(config.vt_mode, VtMode::Simulated);
        assert_eq!(config.displays, 3);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("[vt]\nmoed = \"kernel\"\n");
        assert!(result.is_err(), "typoed keys must not pass silently");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "[vt]\nmode = \"simulated\"").expect("write");

        let parsed = load_config(file.path()).expect("load");
        assert_eq!(parsed.vt.mode, Some(VtMode::Simulated));
    }

    #[test]
    fn test_load_config_missing_file_is_a_read_error() {
        let err = load_config(Path::new("/nonexistent/vtcon.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_config_bad_toml_is_a_parse_error() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "vt = not toml").expect("write");

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
