// Evmaprs Event Handling
// Device arena, control channel and the event loop driving them

pub mod control;
pub mod manager;
pub mod r#loop;

pub use control::{
    query, send_request, ControlChannel, ControlError, ControlHandle, ControlMessage, ControlSocket,
    Request, SignalBridge, DEFAULT_SOCKET_PATH,
};
pub use manager::{Device, DeviceManager, ManagerError};
pub use r#loop::{
    poll_timeout, DebugSink, EventMultiplexer, Flow, LogSink, MultiplexError, MultiplexResult,
};
