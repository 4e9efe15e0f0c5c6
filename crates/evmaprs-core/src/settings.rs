// Evmaprs Settings Module
// Daemon-wide settings: where configurations live, how actions run

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::event::control::DEFAULT_SOCKET_PATH;
use crate::output::VIRTUAL_DEVICE_NAME;

/// Directory name under the user's configuration directory
const APP_DIR: &str = "evmaprs";

/// Shell used for exec actions unless configured otherwise
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Settings for the evmaprs daemon
///
/// Loaded from a TOML file (default: ~/.config/evmaprs/settings.toml).
/// Every key is optional:
///
/// ```toml
/// [paths]
/// config_dir = "/etc/evmaprs"
/// control_socket = "/run/user/1000/evmaprs.socket"
///
/// [output]
/// device_name = "evmaprs (virtual)"
///
/// [exec]
/// shell = "/bin/bash"
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding the per-device JSON configurations
    pub config_dir: PathBuf,
    pub control_socket: PathBuf,
    /// Name of the virtual keyboard; devices with this name are never
    /// attached
    pub device_name: String,
    pub shell: PathBuf,
    /// File the settings were read from
    source_path: Option<PathBuf>,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default)]
    paths: PathSettings,
    #[serde(default)]
    output: OutputSettings,
    #[serde(default)]
    exec: ExecSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathSettings {
    config_dir: Option<PathBuf>,
    control_socket: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSettings {
    device_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecSettings {
    shell: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            control_socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            device_name: VIRTUAL_DEVICE_NAME.to_string(),
            shell: PathBuf::from(DEFAULT_SHELL),
            source_path: None,
        }
    }
}

/// `~/.config/evmaprs`, or `./evmaprs` when no configuration directory is
/// known
fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let parsed: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::default();
        if let Some(dir) = parsed.paths.config_dir {
            settings.config_dir = dir;
        }
        if let Some(socket) = parsed.paths.control_socket {
            settings.control_socket = socket;
        }
        if let Some(name) = parsed.output.device_name {
            if name.trim().is_empty() {
                return Err(SettingsError::InvalidValue(
                    "output.device_name must not be empty".to_string(),
                ));
            }
            settings.device_name = name;
        }
        if let Some(shell) = parsed.exec.shell {
            settings.shell = shell;
        }
        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("settings.toml"))
    }

    /// Load from default location (~/.config/evmaprs/settings.toml)
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::default())
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.control_socket, PathBuf::from("/tmp/evmaprs.socket"));
        assert_eq!(settings.device_name, "evmaprs (virtual)");
        assert_eq!(settings.shell, PathBuf::from("/bin/sh"));
        assert!(settings.config_dir.ends_with("evmaprs"));
    }

    #[test]
    fn test_settings_from_toml() {
        let toml = r#"
[paths]
config_dir = "/etc/evmaprs"

[exec]
shell = "/bin/bash"
"#;
        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(settings.config_dir, PathBuf::from("/etc/evmaprs"));
        assert_eq!(settings.shell, PathBuf::from("/bin/bash"));
        assert_eq!(settings.control_socket, PathBuf::from("/tmp/evmaprs.socket"));
    }

    #[test]
    fn test_settings_rejects_unknown_and_invalid() {
        assert!(matches!(
            Settings::from_toml("[paths]\nconfig = \"/x\"\n"),
            Err(SettingsError::TomlParse(_))
        ));
        assert!(matches!(
            Settings::from_toml("[output]\ndevice_name = \"  \"\n"),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[paths]\ncontrol_socket = \"/run/evmaprs.socket\"\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.control_socket, PathBuf::from("/run/evmaprs.socket"));
        assert_eq!(settings.source_path(), Some(path.as_path()));

        let missing = Settings::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(SettingsError::Io { .. })));
    }
}
