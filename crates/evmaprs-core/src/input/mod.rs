// Evmaprs Input Layer
// Device access, element catalogs and edge detection

mod device;
mod element;
mod event;

pub use device::{is_virtual_device, scan_event_nodes, DeviceBackend, DeviceError, DeviceInfo, InputSource};
pub use element::{EdgeDetector, Edges, ElementError, ElementId, ElementKind, ElementTable, InputElement};
pub use event::{RawEvent, RawKind, KEY_PRESS, KEY_RELEASE, KEY_REPEAT};

#[cfg(feature = "evdev-backend")]
pub use device::{list_devices, EvdevBackend, EvdevSource};
