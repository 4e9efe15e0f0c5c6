// Evmaprs Core Library
// Maps input device events to key injection and command execution

pub mod action;
pub mod config;
pub mod engine;
pub mod event;
pub mod input;
pub mod key;
pub mod output;
pub mod settings;
pub mod trigger;

#[cfg(feature = "evdev-backend")]
pub mod supervisor;

pub use action::{ActionKind, ActionSpec, FireRequest, TriggerMode};
pub use config::{config_file_name, ConfigError, ConfigSource, ConfigStore, DeviceConfig};
pub use engine::TriggerEngine;
pub use event::{
    ControlChannel, ControlMessage, DebugSink, DeviceManager, EventMultiplexer, Flow, LogSink,
    ManagerError, MultiplexError, Request,
};
pub use input::{
    DeviceBackend, DeviceError, DeviceInfo, EdgeDetector, ElementId, ElementTable, InputElement,
    InputSource, RawEvent, RawKind,
};
pub use key::Key;
pub use output::{ActionExecutor, CommandLauncher, KeySink, OutputEvent, ShellLauncher, UInputError};
pub use settings::{Settings, SettingsError};
pub use trigger::{Edge, Polarity, TriggerRef};

#[cfg(feature = "evdev-backend")]
pub use input::{list_devices, EvdevBackend};
#[cfg(feature = "evdev-backend")]
pub use output::VirtualDevice;
#[cfg(feature = "evdev-backend")]
pub use supervisor::{Supervisor, SupervisorError};
