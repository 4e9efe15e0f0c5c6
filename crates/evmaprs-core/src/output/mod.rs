// Evmaprs Output Layer
// Key injection and command execution

pub mod executor;
pub mod reaper;
pub mod uinput;

pub use executor::{key_chord, ActionExecutor};
pub use reaper::{CommandLauncher, Reaper, ShellLauncher};
#[cfg(feature = "evdev-backend")]
pub use uinput::VirtualDevice;
pub use uinput::{KeySink, OutputEvent, UInputError, VIRTUAL_DEVICE_NAME};
