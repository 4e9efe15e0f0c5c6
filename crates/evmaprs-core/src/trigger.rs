use std::fmt;

use crate::input::ElementId;

/// Which state of an element satisfies a trigger.
///
/// Buttons only have `Pressed`; axes must name the extreme they react to,
/// written as `name:min` or `name:max` in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Pressed,
    Min,
    Max,
}

impl Polarity {
    /// Configuration suffix for this polarity (empty for buttons)
    pub fn suffix(self) -> &'static str {
        match self {
            Polarity::Pressed => "",
            Polarity::Min => ":min",
            Polarity::Max => ":max",
        }
    }
}

/// Reference to one element of a device's element table plus the
/// polarity that activates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerRef {
    pub element: ElementId,
    pub polarity: Polarity,
}

impl TriggerRef {
    pub fn new(element: ElementId, polarity: Polarity) -> Self {
        Self { element, polarity }
    }

    pub fn button(element: ElementId) -> Self {
        Self::new(element, Polarity::Pressed)
    }
}

/// Transition of a trigger between satisfied and unsatisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Activate,
    Deactivate,
}

impl Edge {
    pub fn is_activate(self) -> bool {
        matches!(self, Edge::Activate)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Activate => write!(f, "activate"),
            Edge::Deactivate => write!(f, "deactivate"),
        }
    }
}
