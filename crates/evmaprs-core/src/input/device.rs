// Evmaprs Input Layer - Devices
// Device discovery, opening, grabbing and reading

use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use super::event::RawEvent;

/// Errors raised while talking to an input device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{0}: device removed")]
    Gone(PathBuf),

    #[error("{path}: permission denied")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}: virtual device, not handled")]
    Ignored(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    /// Classify an I/O error raised for the device under `path`
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        if source.raw_os_error() == Some(libc::ENODEV) {
            return DeviceError::Gone(path.to_path_buf());
        }
        match source.kind() {
            io::ErrorKind::NotFound => DeviceError::Gone(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => DeviceError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, DeviceError::Gone(_))
    }
}

/// An opened input device the event loop can poll and read from.
pub trait InputSource {
    /// Device name as reported by the kernel
    fn name(&self) -> &str;

    /// Descriptor registered with poll(2)
    fn raw_fd(&self) -> RawFd;

    /// Read every pending event; only called once the descriptor is readable
    fn fetch_events(&mut self) -> Result<Vec<RawEvent>, DeviceError>;

    fn grab(&mut self) -> Result<(), DeviceError>;

    fn ungrab(&mut self) -> Result<(), DeviceError>;
}

/// Source of input devices: enumeration plus opening by path.
pub trait DeviceBackend {
    type Source: InputSource;

    /// Paths of every input device currently present
    fn discover(&self) -> Vec<PathBuf>;

    fn open(&self, path: &Path) -> Result<Self::Source, DeviceError>;
}

/// Device information for listing devices
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub path: PathBuf,
}

/// Check if a device is a virtual device based on its name.
///
/// The virtual keyboard created by the daemon shows up under /dev/input
/// like any other device and must never be attached.
pub fn is_virtual_device(device_name: &str, virt_prefix: &str) -> bool {
    !virt_prefix.is_empty() && device_name.starts_with(virt_prefix)
}

/// List `event*` nodes of an input directory in numeric order.
pub fn scan_event_nodes(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        log::warn!("cannot read {}", dir.display());
        return Vec::new();
    };
    let mut nodes: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("event")?.parse().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    nodes.sort();
    nodes.into_iter().map(|(_, path)| path).collect()
}

#[cfg(feature = "evdev-backend")]
pub use self::evdev_backend::{list_devices, EvdevBackend, EvdevSource};

#[cfg(feature = "evdev-backend")]
mod evdev_backend {
    use super::*;
    use std::os::unix::io::AsRawFd;

    /// Default location of evdev nodes
    pub const INPUT_DIR: &str = "/dev/input";

    /// evdev-backed input device
    pub struct EvdevSource {
        path: PathBuf,
        name: String,
        device: evdev::Device,
    }

    impl InputSource for EvdevSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn raw_fd(&self) -> RawFd {
            self.device.as_raw_fd()
        }

        fn fetch_events(&mut self) -> Result<Vec<RawEvent>, DeviceError> {
            match self.device.fetch_events() {
                Ok(events) => Ok(events.map(|event| RawEvent::from(&event)).collect()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
                Err(e) => Err(DeviceError::from_io(&self.path, e)),
            }
        }

        fn grab(&mut self) -> Result<(), DeviceError> {
            self.device
                .grab()
                .map_err(|e| DeviceError::from_io(&self.path, e))
        }

        fn ungrab(&mut self) -> Result<(), DeviceError> {
            self.device
                .ungrab()
                .map_err(|e| DeviceError::from_io(&self.path, e))
        }
    }

    /// Opens devices under /dev/input, skipping the daemon's own virtual
    /// keyboard.
    pub struct EvdevBackend {
        input_dir: PathBuf,
        virt_prefix: String,
    }

    impl EvdevBackend {
        pub fn new(virt_prefix: impl Into<String>) -> Self {
            Self {
                input_dir: PathBuf::from(INPUT_DIR),
                virt_prefix: virt_prefix.into(),
            }
        }
    }

    impl DeviceBackend for EvdevBackend {
        type Source = EvdevSource;

        fn discover(&self) -> Vec<PathBuf> {
            scan_event_nodes(&self.input_dir)
        }

        fn open(&self, path: &Path) -> Result<EvdevSource, DeviceError> {
            let device = evdev::Device::open(path).map_err(|e| DeviceError::from_io(path, e))?;
            let name = device.name().unwrap_or("Unknown").to_string();
            if is_virtual_device(&name, &self.virt_prefix) {
                return Err(DeviceError::Ignored(path.to_path_buf()));
            }
            Ok(EvdevSource {
                path: path.to_path_buf(),
                name,
                device,
            })
        }
    }

    /// List every input device that can be opened
    ///
    /// This is useful for the --list-devices CLI flag.
    pub fn list_devices() -> Vec<DeviceInfo> {
        evdev::enumerate()
            .map(|(path, device)| DeviceInfo {
                name: device.name().unwrap_or("Unknown").to_string(),
                path,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_virtual_device() {
        assert!(is_virtual_device("evmaprs (virtual)", "evmaprs (virtual)"));
        assert!(!is_virtual_device("Logitech Gamepad F310", "evmaprs (virtual)"));
        assert!(!is_virtual_device("anything", ""));
    }

    #[test]
    fn test_error_classification() {
        let path = Path::new("/dev/input/event3");
        let gone = DeviceError::from_io(path, io::Error::from_raw_os_error(libc::ENODEV));
        assert!(gone.is_gone());
        let denied = DeviceError::from_io(
            path,
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(denied, DeviceError::PermissionDenied { .. }));
        let other = DeviceError::from_io(path, io::Error::new(io::ErrorKind::Other, "x"));
        assert!(matches!(other, DeviceError::Io { .. }));
    }

    #[test]
    fn test_scan_event_nodes_orders_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["event10", "event2", "mouse0", "event0", "eventX"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let nodes = scan_event_nodes(dir.path());
        let names: Vec<_> = nodes
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["event0", "event2", "event10"]);
    }
}
