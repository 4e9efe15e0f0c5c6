// Evmaprs Input Layer - Raw Events
// Backend-neutral view of kernel input events

/// Kernel event class of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    /// EV_KEY: buttons and keys
    Key,
    /// EV_ABS: absolute axes
    Absolute,
    /// Any other event type (SYN, MSC, REL, ...), carried for diagnostics
    Other(u16),
}

/// One event as read from a device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(kind: RawKind, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    pub fn key(code: u16, value: i32) -> Self {
        Self::new(RawKind::Key, code, value)
    }

    pub fn absolute(code: u16, value: i32) -> Self {
        Self::new(RawKind::Absolute, code, value)
    }

    /// Only key and absolute events can drive triggers
    pub fn is_monitorable(&self) -> bool {
        matches!(self.kind, RawKind::Key | RawKind::Absolute)
    }
}

/// Key event values reported by evdev.
pub const KEY_RELEASE: i32 = 0;
pub const KEY_PRESS: i32 = 1;
pub const KEY_REPEAT: i32 = 2;

#[cfg(feature = "evdev-backend")]
impl From<&evdev::InputEvent> for RawEvent {
    fn from(event: &evdev::InputEvent) -> Self {
        let kind = match event.event_type() {
            evdev::EventType::KEY => RawKind::Key,
            evdev::EventType::ABSOLUTE => RawKind::Absolute,
            other => RawKind::Other(other.0),
        };
        RawEvent::new(kind, event.code(), event.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitorable_kinds() {
        assert!(RawEvent::key(304, KEY_PRESS).is_monitorable());
        assert!(RawEvent::absolute(0, 128).is_monitorable());
        assert!(!RawEvent::new(RawKind::Other(0), 0, 0).is_monitorable());
    }
}
