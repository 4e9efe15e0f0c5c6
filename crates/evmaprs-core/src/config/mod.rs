// Evmaprs Config API
// Device configuration schema, validation and storage

pub mod parser;
pub mod store;

pub use parser::{ConfigError, DeviceConfig, DEFAULT_HOLD_SECS, MAX_HOLD_SECS};
pub use store::{config_file_name, ConfigSource, ConfigStore};
