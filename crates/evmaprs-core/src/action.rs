use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use strum_macros::{Display, EnumString};

use crate::trigger::TriggerRef;
use crate::Key;

/// How the triggers of an action combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Every trigger must be active at the same time
    #[default]
    All,
    /// Triggers must be activated in the listed order
    Sequence,
    /// Each trigger fires the action on its own
    Any,
}

/// What happens when an action fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Tap the listed keys on the virtual keyboard as one chord
    Key(Vec<Key>),
    /// Run the listed shell commands, detached from the daemon
    Exec(Vec<String>),
}

impl ActionKind {
    pub fn keys(&self) -> &[Key] {
        match self {
            ActionKind::Key(keys) => keys,
            ActionKind::Exec(_) => &[],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Key(keys) => {
                let names: Vec<&str> = keys.iter().map(|k| k.name()).collect();
                write!(f, "key {}", names.join("+"))
            }
            ActionKind::Exec(commands) => write!(f, "exec {:?}", commands),
        }
    }
}

/// A validated action of one device configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    /// Position of the action in its configuration
    pub id: usize,
    /// Human readable trigger list, as written in the configuration
    pub label: String,
    pub triggers: Vec<TriggerRef>,
    pub mode: TriggerMode,
    pub kind: ActionKind,
    pub hold: Duration,
    pub grab: bool,
}

impl ActionSpec {
    pub fn is_held(&self) -> bool {
        !self.hold.is_zero()
    }
}

/// Request produced by a trigger engine for the action executor.
#[derive(Debug, Clone)]
pub struct FireRequest {
    pub action: Arc<ActionSpec>,
    /// Trigger that fired an `Any` action; `None` for aggregate modes
    pub trigger: Option<TriggerRef>,
    pub at: Instant,
}

impl FireRequest {
    pub fn new(action: Arc<ActionSpec>, trigger: Option<TriggerRef>, at: Instant) -> Self {
        Self { action, trigger, at }
    }
}
