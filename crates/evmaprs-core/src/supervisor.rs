// Evmaprs Supervisor
// Process-level orchestration: startup, initial scan, event loop, teardown

#![cfg(feature = "evdev-backend")]

use std::collections::BTreeSet;

use crate::config::ConfigStore;
use crate::event::{
    ControlChannel, ControlError, DeviceManager, EventMultiplexer, MultiplexError, SignalBridge,
};
use crate::input::EvdevBackend;
use crate::key::STANDARD_KEY_MAX;
use crate::output::{ActionExecutor, KeySink, ShellLauncher, VirtualDevice};
use crate::settings::Settings;
use crate::Key;

/// Errors that prevent the daemon from starting or keep it from running
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Multiplex(#[from] MultiplexError),

    #[error("cannot start command reaper: {0}")]
    Reaper(#[source] std::io::Error),
}

/// Keys the virtual keyboard must be able to emit: the standard keyboard
/// range plus every key named by a configuration in the store.
pub fn virtual_key_set(store: &ConfigStore) -> BTreeSet<Key> {
    (1..=STANDARD_KEY_MAX)
        .map(Key)
        .chain(store.all_key_targets())
        .collect()
}

/// Runs the daemon in the foreground.
pub struct Supervisor {
    settings: Settings,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Start everything, serve until SIGINT/SIGTERM or a shutdown request,
    /// then tear down in order: grabs, virtual keyboard, descriptors,
    /// control socket.
    pub fn run(self) -> Result<(), SupervisorError> {
        let settings = self.settings;
        let store = ConfigStore::new(&settings.config_dir);
        log::info!("configuration directory: {}", store.dir().display());

        let output: Option<Box<dyn KeySink>> =
            match VirtualDevice::new(&settings.device_name, virtual_key_set(&store)) {
                Ok(device) => Some(Box::new(device)),
                Err(e) => {
                    log::warn!("{}; key actions are disabled", e);
                    None
                }
            };
        let launcher = ShellLauncher::new(&settings.shell).map_err(SupervisorError::Reaper)?;
        let executor = ActionExecutor::new(output, Box::new(launcher));

        let control = ControlChannel::new()?.with_socket(&settings.control_socket)?;
        let signals = SignalBridge::spawn(control.handle())?;

        let backend = EvdevBackend::new(settings.device_name.clone());
        let mut manager = DeviceManager::new(backend, store);
        manager.rescan_all();
        if manager.is_empty() {
            log::info!("no configured device present yet, waiting for a rescan");
        }

        let result = EventMultiplexer::new(manager, executor, control).run();
        drop(signals);
        if let Err(e) = &result {
            log::error!("{}", e);
        }
        result.map_err(SupervisorError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_key_set_includes_config_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pad.json"),
            r#"{
                "buttons": [{"name": "A", "code": 304}],
                "actions": [{"trigger": "A", "type": "key", "target": "KEY_PLAYPAUSE"}]
            }"#,
        )
        .unwrap();
        let keys = virtual_key_set(&ConfigStore::new(dir.path()));
        assert!(keys.contains(&Key(30)));
        assert!(keys.contains(&Key(STANDARD_KEY_MAX)));
        assert!(!keys.contains(&Key(0)));
        assert!(keys.contains(&"KEY_PLAYPAUSE".parse::<Key>().unwrap()));
    }
}
