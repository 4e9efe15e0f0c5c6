// Evmaprs uinput Output Layer
// Virtual keyboard creation and key event emission

use crate::Key;

/// One event written to the virtual keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Press(Key),
    Release(Key),
    /// SYN_REPORT: consumers see everything before it as one report
    Sync,
}

/// Error types for uinput operations
#[derive(Debug, thiserror::Error)]
pub enum UInputError {
    #[error("Failed to create virtual device: {0}")]
    DeviceCreation(String),

    #[error("Failed to write event: {0}")]
    WriteError(String),
}

/// Destination of synthetic key events.
pub trait KeySink {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), UInputError>;
}

/// Default name of the virtual keyboard
pub const VIRTUAL_DEVICE_NAME: &str = "evmaprs (virtual)";

/// Virtual uinput keyboard
#[cfg(feature = "evdev-backend")]
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
    name: String,
}

#[cfg(feature = "evdev-backend")]
impl VirtualDevice {
    /// Register a virtual keyboard able to emit every key in `keys`
    pub fn new<I>(name: &str, keys: I) -> Result<Self, UInputError>
    where
        I: IntoIterator<Item = Key>,
    {
        use evdev::uinput::VirtualDeviceBuilder;
        use evdev::AttributeSet;

        let mut key_set = AttributeSet::<evdev::Key>::new();
        let mut count = 0usize;
        for key in keys {
            key_set.insert(evdev::Key::new(key.code()));
            count += 1;
        }

        let device = VirtualDeviceBuilder::new()
            .map_err(|e: std::io::Error| UInputError::DeviceCreation(e.to_string()))?
            .name(name)
            .with_keys(&key_set)
            .map_err(|e: std::io::Error| UInputError::DeviceCreation(e.to_string()))?
            .build()
            .map_err(|e: std::io::Error| UInputError::DeviceCreation(e.to_string()))?;

        log::info!("virtual keyboard '{}' created ({} keys)", name, count);
        Ok(Self {
            device,
            name: name.to_string(),
        })
    }
}

#[cfg(feature = "evdev-backend")]
impl KeySink for VirtualDevice {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), UInputError> {
        use evdev::{EventType, InputEvent};

        let raw: Vec<InputEvent> = events
            .iter()
            .map(|event| match event {
                OutputEvent::Press(key) => InputEvent::new(EventType::KEY, key.code(), 1),
                OutputEvent::Release(key) => InputEvent::new(EventType::KEY, key.code(), 0),
                OutputEvent::Sync => InputEvent::new(EventType::SYNCHRONIZATION, 0, 0),
            })
            .collect();
        self.device
            .emit(&raw)
            .map_err(|e: std::io::Error| UInputError::WriteError(e.to_string()))
    }
}

#[cfg(feature = "evdev-backend")]
impl Drop for VirtualDevice {
    fn drop(&mut self) {
        log::info!("virtual keyboard '{}' destroyed", self.name);
    }
}
