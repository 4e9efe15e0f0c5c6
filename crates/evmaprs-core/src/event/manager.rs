// Evmaprs Device Manager
// Owns attached devices, their grabs and their trigger engines

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;

use crate::action::FireRequest;
use crate::config::{ConfigError, ConfigSource, DeviceConfig};
use crate::engine::TriggerEngine;
use crate::input::{DeviceBackend, DeviceError, DeviceInfo, EdgeDetector, InputSource, RawEvent};

/// Errors raised while attaching or reconfiguring a device
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("{device}: {source}")]
    Config {
        device: String,
        #[source]
        source: ConfigError,
    },

    #[error("{0}: already attached")]
    AlreadyAttached(PathBuf),
}

impl ManagerError {
    /// Whether the device was skipped for a routine reason: it has no
    /// configuration file, or it is the daemon's own virtual keyboard.
    pub fn is_skip(&self) -> bool {
        match self {
            ManagerError::Device(DeviceError::Ignored(_)) => true,
            ManagerError::Config { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// One attached input device with its active configuration.
pub struct Device<S: InputSource> {
    path: PathBuf,
    source: S,
    grabbed: bool,
    config: Arc<DeviceConfig>,
    detector: EdgeDetector,
    engine: TriggerEngine,
}

impl<S: InputSource> Device<S> {
    fn new(path: PathBuf, source: S, config: DeviceConfig) -> Self {
        let config = Arc::new(config);
        Self {
            path,
            source,
            grabbed: false,
            detector: EdgeDetector::new(&config.elements),
            engine: TriggerEngine::new(config.clone()),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.source.raw_fd()
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    pub fn fetch_events(&mut self) -> Result<Vec<RawEvent>, DeviceError> {
        self.source.fetch_events()
    }

    /// Run one raw event through edge detection and the trigger engine
    pub fn handle(&mut self, event: &RawEvent, now: Instant) -> Vec<FireRequest> {
        if !event.is_monitorable() {
            return Vec::new();
        }
        let edges = self.detector.feed(&self.config.elements, event);
        let mut fired = Vec::new();
        for (trigger, edge) in edges {
            log::trace!(
                "{}: {} {}",
                self.name(),
                self.config.elements.describe(&trigger),
                edge
            );
            fired.extend(self.engine.on_event(trigger, edge, now));
        }
        fired
    }

    pub fn tick(&mut self, now: Instant) -> Vec<FireRequest> {
        self.engine.on_tick(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.engine.next_deadline()
    }

    /// Replace the configuration; all trigger state starts over
    fn install(&mut self, config: DeviceConfig) {
        let config = Arc::new(config);
        self.detector = EdgeDetector::new(&config.elements);
        self.engine = TriggerEngine::new(config.clone());
        self.config = config;
        self.sync_grab();
    }

    /// Grab or release the device to match its configuration
    fn sync_grab(&mut self) {
        let wanted = self.config.wants_grab();
        if wanted == self.grabbed {
            return;
        }
        let result = if wanted {
            self.source.grab()
        } else {
            self.source.ungrab()
        };
        match result {
            Ok(()) => {
                self.grabbed = wanted;
                log::info!(
                    "{} ({}): {}",
                    self.name(),
                    self.path.display(),
                    if wanted { "grabbed" } else { "released" }
                );
            }
            Err(e) => log::warn!("{} ({}): {}", self.name(), self.path.display(), e),
        }
    }

    /// Give up the grab, if held, keeping the device attached
    pub fn release_grab(&mut self) {
        if !self.grabbed {
            return;
        }
        match self.source.ungrab() {
            Ok(()) => log::info!("{} ({}): released", self.name(), self.path.display()),
            Err(e) => log::debug!("{}: ungrab failed: {}", self.path.display(), e),
        }
        self.grabbed = false;
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name().to_string(),
            path: self.path.clone(),
        }
    }
}

impl<S: InputSource> Drop for Device<S> {
    fn drop(&mut self) {
        // A grab left behind locks the physical device away from everyone else
        self.release_grab();
    }
}

/// Arena of attached devices keyed by device path.
///
/// Devices without a configuration are not attached at all. A device
/// switched to a named configuration file keeps it across rescans.
pub struct DeviceManager<B: DeviceBackend, C: ConfigSource> {
    backend: B,
    configs: C,
    devices: IndexMap<PathBuf, Device<B::Source>>,
    /// Configuration file chosen per device name
    overrides: HashMap<String, String>,
}

impl<B: DeviceBackend, C: ConfigSource> DeviceManager<B, C> {
    pub fn new(backend: B, configs: C) -> Self {
        Self {
            backend,
            configs,
            devices: IndexMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Open, configure and register the device at `path`.
    pub fn attach(&mut self, path: &Path) -> Result<&Device<B::Source>, ManagerError> {
        self.attach_with(path, None)
    }

    fn attach_with(
        &mut self,
        path: &Path,
        file: Option<&str>,
    ) -> Result<&Device<B::Source>, ManagerError> {
        if self.devices.contains_key(path) {
            return Err(ManagerError::AlreadyAttached(path.to_path_buf()));
        }
        let source = self.backend.open(path)?;
        let name = source.name().to_string();
        let file = file.or_else(|| self.overrides.get(&name).map(String::as_str));
        let config = self
            .configs
            .load(&name, file)
            .map_err(|err| ManagerError::Config {
                device: name.clone(),
                source: err,
            })?;

        let mut device = Device::new(path.to_path_buf(), source, config);
        device.sync_grab();
        log::info!(
            "{} ({}): attached, {} action(s)",
            name,
            path.display(),
            device.config.actions.len()
        );
        let index = self.devices.insert_full(path.to_path_buf(), device).0;
        Ok(&self.devices[index])
    }

    /// Drop the device at `path`, releasing its grab. Pending timers die
    /// with its engine.
    pub fn detach(&mut self, path: &Path) -> bool {
        match self.devices.shift_remove(path) {
            Some(device) => {
                log::info!("{} ({}): detached", device.name(), path.display());
                true
            }
            None => false,
        }
    }

    /// Bring the attached set in line with `discovered`.
    pub fn rescan(&mut self, discovered: &[PathBuf]) {
        let gone: Vec<PathBuf> = self
            .devices
            .keys()
            .filter(|path| !discovered.contains(path))
            .cloned()
            .collect();
        for path in gone {
            self.detach(&path);
        }

        for path in discovered {
            if self.devices.contains_key(path) {
                continue;
            }
            match self.attach(path) {
                Ok(_) => {}
                Err(e) if e.is_skip() => log::debug!("{}: skipped ({})", path.display(), e),
                Err(ManagerError::Config { device, source }) => {
                    log::error!("{} ({}): {}", device, path.display(), source)
                }
                Err(e) => log::warn!("{}", e),
            }
        }
    }

    /// Rescan everything the backend currently reports
    pub fn rescan_all(&mut self) {
        let discovered = self.backend.discover();
        self.rescan(&discovered);
    }

    /// Switch the device at `path` to another configuration file, or back
    /// to its default one when `file` is `None`.
    ///
    /// On failure the previous configuration stays active. A device that is
    /// not attached yet is attached with the requested configuration.
    pub fn switch_config(&mut self, path: &Path, file: Option<&str>) -> Result<(), ManagerError> {
        let file = file.filter(|name| !name.is_empty());
        let name = match self.devices.get_mut(path) {
            Some(device) => {
                let name = device.name().to_string();
                let config =
                    self.configs
                        .load(&name, file)
                        .map_err(|source| ManagerError::Config {
                            device: name.clone(),
                            source,
                        })?;
                device.install(config);
                log::info!(
                    "{} ({}): switched to {}",
                    name,
                    path.display(),
                    file.unwrap_or("default configuration")
                );
                name
            }
            None => self.attach_with(path, file)?.name().to_string(),
        };

        match file {
            Some(file) => self.overrides.insert(name, file.to_string()),
            None => self.overrides.remove(&name),
        };
        Ok(())
    }

    /// Release every grab without detaching anything
    pub fn release_grabs(&mut self) {
        for device in self.devices.values_mut() {
            device.release_grab();
        }
    }

    pub fn detach_all(&mut self) {
        let paths: Vec<PathBuf> = self.devices.keys().cloned().collect();
        for path in paths {
            self.detach(&path);
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Device<B::Source>> {
        self.devices.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Device<B::Source>> {
        self.devices.get_mut(path)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device<B::Source>> {
        self.devices.values_mut()
    }

    /// Descriptors to poll, in attach order
    pub fn poll_targets(&self) -> Vec<(PathBuf, RawFd)> {
        self.devices
            .values()
            .map(|device| (device.path.clone(), device.raw_fd()))
            .collect()
    }

    /// Earliest pending hold deadline across all devices
    pub fn next_deadline(&self) -> Option<Instant> {
        self.devices.values().filter_map(Device::next_deadline).min()
    }

    /// Handled devices, for listing
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.values().map(Device::info).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl<B: DeviceBackend, C: ConfigSource> Drop for DeviceManager<B, C> {
    fn drop(&mut self) {
        self.detach_all();
    }
}
