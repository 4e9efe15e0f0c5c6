// Evmaprs Config Parser - JSON with Serde
// Parses and validates per-device configuration files

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::action::{ActionKind, ActionSpec, TriggerMode};
use crate::input::{ElementError, ElementKind, ElementTable, InputElement};
use crate::trigger::{Polarity, TriggerRef};
use crate::Key;

/// Hold time used when a configuration says `"hold": true`
pub const DEFAULT_HOLD_SECS: f64 = 1.0;

/// Longest accepted hold time, one day
pub const MAX_HOLD_SECS: f64 = 86_400.0;

/// Configuration parser errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}: file not found")]
    NotFound(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("invalid JSON file: {0}")]
    Json(String),

    #[error(transparent)]
    Element(#[from] ElementError),

    #[error("axis '{0}' must define both 'min' and 'max'")]
    MissingRange(String),

    #[error("action {action}: empty trigger list")]
    EmptyTrigger { action: usize },

    #[error("action {action}: undefined element '{name}'")]
    UndefinedElement { action: usize, name: String },

    #[error("action {action}: invalid trigger suffix in '{trigger}'")]
    BadSuffix { action: usize, trigger: String },

    #[error("action {action}: duplicate trigger '{trigger}'")]
    DuplicateTrigger { action: usize, trigger: String },

    #[error("action {action}: a sequence needs at least two triggers")]
    ShortSequence { action: usize },

    #[error("action {action}: 'sequence' conflicts with mode '{mode}'")]
    ConflictingMode { action: usize, mode: TriggerMode },

    #[error("action {action}: invalid hold time {hold}")]
    InvalidHold { action: usize, hold: f64 },

    #[error("action {action}: 'hold' cannot be set for sequences")]
    HoldWithSequence { action: usize },

    #[error("action {action}: empty target")]
    EmptyTarget { action: usize },

    #[error("action {action}: unknown key '{key}'")]
    UnknownKey { action: usize, key: String },

    #[error("action {action}: duplicate key '{key}' in target")]
    DuplicateKey { action: usize, key: String },
}

impl ConfigError {
    /// Whether the error only means "this device has no configuration"
    pub fn is_not_found(&self) -> bool {
        match self {
            ConfigError::NotFound(_) => true,
            ConfigError::Load { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    fn in_file(self, path: &Path) -> Self {
        match self {
            ConfigError::NotFound(_) | ConfigError::Io { .. } | ConfigError::Load { .. } => self,
            other => ConfigError::Load {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}

/// Root object of a device configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigJson {
    #[serde(default)]
    grab: bool,

    #[serde(default)]
    axes: Vec<AxisJson>,

    #[serde(default)]
    buttons: Vec<ButtonJson>,

    #[serde(default)]
    actions: Vec<ActionJson>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ButtonJson {
    name: String,
    code: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AxisJson {
    name: String,
    code: u16,
    min: Option<i32>,
    max: Option<i32>,
}

/// A single string or a list of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Hold time in seconds, or `true` for the default hold
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HoldJson {
    Flag(bool),
    Seconds(f64),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ActionType {
    Key,
    Exec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionJson {
    trigger: OneOrMany,

    #[serde(default)]
    mode: Option<TriggerMode>,

    /// Older spelling of `"mode": "sequence"`
    #[serde(default)]
    sequence: bool,

    #[serde(default)]
    hold: Option<HoldJson>,

    #[serde(rename = "type")]
    kind: ActionType,

    target: OneOrMany,

    #[serde(default)]
    grab: bool,
}

/// Validated, immutable configuration of one device.
///
/// A configuration switch replaces the whole object; nothing mutates it
/// once it is active.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfig {
    pub elements: ElementTable,
    pub actions: Vec<Arc<ActionSpec>>,
    pub grab: bool,
}

impl DeviceConfig {
    /// Parse a JSON configuration file
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_json(&content).map_err(|e| e.in_file(path))
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let json: ConfigJson =
            serde_json::from_str(content).map_err(|e| ConfigError::Json(e.to_string()))?;
        json.into_config()
    }

    /// Whether the device must be grabbed while this configuration is active
    pub fn wants_grab(&self) -> bool {
        self.grab || self.actions.iter().any(|action| action.grab)
    }

    /// Every key code a key action of this configuration may emit
    pub fn key_targets(&self) -> impl Iterator<Item = Key> + '_ {
        self.actions
            .iter()
            .flat_map(|action| action.kind.keys().iter().copied())
    }
}

impl ConfigJson {
    fn into_config(self) -> Result<DeviceConfig, ConfigError> {
        let mut elements = ElementTable::new();
        for axis in self.axes {
            let (Some(min), Some(max)) = (axis.min, axis.max) else {
                return Err(ConfigError::MissingRange(axis.name));
            };
            elements.insert(InputElement::axis(axis.name, axis.code, min, max))?;
        }
        for button in self.buttons {
            elements.insert(InputElement::button(button.name, button.code))?;
        }

        let actions = self
            .actions
            .into_iter()
            .enumerate()
            .map(|(id, action)| action.into_spec(id, &elements).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "parsed configuration: {} element(s), {} action(s), grab={}",
            elements.len(),
            actions.len(),
            self.grab
        );

        Ok(DeviceConfig {
            elements,
            actions,
            grab: self.grab,
        })
    }
}

impl ActionJson {
    fn into_spec(self, id: usize, elements: &ElementTable) -> Result<ActionSpec, ConfigError> {
        let mode = match (self.mode, self.sequence) {
            (None, true) => TriggerMode::Sequence,
            (None, false) => TriggerMode::All,
            (Some(mode), true) if mode != TriggerMode::Sequence => {
                return Err(ConfigError::ConflictingMode { action: id, mode })
            }
            (Some(mode), _) => mode,
        };

        let names = self.trigger.into_vec();
        if names.is_empty() {
            return Err(ConfigError::EmptyTrigger { action: id });
        }
        let mut triggers = Vec::with_capacity(names.len());
        for name in &names {
            let trigger = parse_trigger(id, name, elements)?;
            if mode != TriggerMode::Sequence && triggers.contains(&trigger) {
                return Err(ConfigError::DuplicateTrigger {
                    action: id,
                    trigger: name.clone(),
                });
            }
            triggers.push(trigger);
        }
        if mode == TriggerMode::Sequence && triggers.len() < 2 {
            return Err(ConfigError::ShortSequence { action: id });
        }

        let hold = parse_hold(id, self.hold)?;
        if mode == TriggerMode::Sequence && !hold.is_zero() {
            return Err(ConfigError::HoldWithSequence { action: id });
        }

        let targets = self.target.into_vec();
        if targets.is_empty() || targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyTarget { action: id });
        }
        let kind = match self.kind {
            ActionType::Key => ActionKind::Key(parse_key_targets(id, &targets)?),
            ActionType::Exec => ActionKind::Exec(targets),
        };

        Ok(ActionSpec {
            id,
            label: names.join(", "),
            triggers,
            mode,
            kind,
            hold,
            grab: self.grab,
        })
    }
}

/// Resolve `name`, `name:min` or `name:max` against the element table
fn parse_trigger(
    action: usize,
    spelling: &str,
    elements: &ElementTable,
) -> Result<TriggerRef, ConfigError> {
    let (name, suffix) = match spelling.split_once(':') {
        Some((name, suffix)) => (name, Some(suffix)),
        None => (spelling, None),
    };
    let id = elements
        .id_of(name)
        .ok_or_else(|| ConfigError::UndefinedElement {
            action,
            name: name.to_string(),
        })?;
    let bad_suffix = || ConfigError::BadSuffix {
        action,
        trigger: spelling.to_string(),
    };
    let element = elements.get(id).ok_or_else(bad_suffix)?;
    let polarity = match (element.kind, suffix) {
        (ElementKind::Button, None) => Polarity::Pressed,
        (ElementKind::Axis { .. }, Some("min")) => Polarity::Min,
        (ElementKind::Axis { .. }, Some("max")) => Polarity::Max,
        _ => return Err(bad_suffix()),
    };
    Ok(TriggerRef::new(id, polarity))
}

fn parse_hold(action: usize, hold: Option<HoldJson>) -> Result<Duration, ConfigError> {
    let seconds = match hold {
        None | Some(HoldJson::Flag(false)) => 0.0,
        Some(HoldJson::Flag(true)) => DEFAULT_HOLD_SECS,
        Some(HoldJson::Seconds(seconds)) => seconds,
    };
    let invalid = || ConfigError::InvalidHold {
        action,
        hold: seconds,
    };
    if !(0.0..=MAX_HOLD_SECS).contains(&seconds) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

fn parse_key_targets(action: usize, names: &[String]) -> Result<Vec<Key>, ConfigError> {
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(names.len());
    for name in names {
        let key = crate::key::key_from_name(name).ok_or_else(|| ConfigError::UnknownKey {
            action,
            key: name.clone(),
        })?;
        if !seen.insert(key) {
            return Err(ConfigError::DuplicateKey {
                action,
                key: name.clone(),
            });
        }
        keys.push(key);
    }
    Ok(keys)
}
