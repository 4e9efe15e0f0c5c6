// Evmaprs Config Store
// Locates per-device configuration files inside the configuration directory

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::parser::{ConfigError, DeviceConfig};
use crate::Key;

/// Where device configurations come from.
///
/// `file` is `None` for the device's default configuration, or the name
/// of an alternative file requested through the control interface.
pub trait ConfigSource {
    fn load(&self, device_name: &str, file: Option<&str>) -> Result<DeviceConfig, ConfigError>;
}

/// File name of a device's default configuration: every character that is
/// not a word character is replaced by a dot.
pub fn config_file_name(device_name: &str) -> String {
    let stem: String = device_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '.' })
        .collect();
    format!("{}.json", stem)
}

/// JSON configuration files stored in one directory
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the default configuration for a device
    pub fn default_path(&self, device_name: &str) -> PathBuf {
        self.dir.join(config_file_name(device_name))
    }

    /// Path of a named configuration; only the base name is honoured so a
    /// request can never point outside the configuration directory.
    pub fn named_path(&self, name: &str) -> Option<PathBuf> {
        Path::new(name).file_name().map(|base| self.dir.join(base))
    }

    /// Union of key codes emitted by every readable configuration file.
    ///
    /// Invalid files are skipped; they are reported when a device tries to
    /// load them.
    pub fn all_key_targets(&self) -> BTreeSet<Key> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return BTreeSet::new();
        };
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| DeviceConfig::from_json_path(&path).ok())
            .flat_map(|config| config.key_targets().collect::<Vec<_>>())
            .collect()
    }
}

impl ConfigSource for ConfigStore {
    fn load(&self, device_name: &str, file: Option<&str>) -> Result<DeviceConfig, ConfigError> {
        let path = match file.filter(|name| !name.is_empty()) {
            Some(name) => self
                .named_path(name)
                .ok_or_else(|| ConfigError::NotFound(PathBuf::from(name)))?,
            None => self.default_path(device_name),
        };
        let config = DeviceConfig::from_json_path(&path)?;
        log::info!("{}: loaded {}", device_name, path.display());
        Ok(config)
    }
}
