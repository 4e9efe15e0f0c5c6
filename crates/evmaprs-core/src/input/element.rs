// Evmaprs Input Layer - Element Table
// Monitorable buttons/axes of one device and raw value to edge translation

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::event::{RawEvent, RawKind, KEY_RELEASE, KEY_REPEAT};
use crate::trigger::{Edge, Polarity, TriggerRef};

/// Index of an element inside its [`ElementTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

/// Physical signal kind of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Button,
    Axis { min: i32, max: i32 },
}

/// One physical signal source of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElement {
    pub name: String,
    pub code: u16,
    pub kind: ElementKind,
}

impl InputElement {
    pub fn button(name: impl Into<String>, code: u16) -> Self {
        Self {
            name: name.into(),
            code,
            kind: ElementKind::Button,
        }
    }

    pub fn axis(name: impl Into<String>, code: u16, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            code,
            kind: ElementKind::Axis { min, max },
        }
    }

    pub fn is_axis(&self) -> bool {
        matches!(self.kind, ElementKind::Axis { .. })
    }
}

/// Catalog of the elements a device configuration declares.
///
/// Element names are unique; codes are unique per kind (an axis and a
/// button may share a numeric code since they arrive as different event
/// classes).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementTable {
    elements: IndexMap<String, InputElement>,
    buttons: HashMap<u16, ElementId>,
    axes: HashMap<u16, ElementId>,
}

/// Reasons an element cannot be added to a table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    #[error("duplicate code {code} for '{name}'")]
    DuplicateCode { name: String, code: u16 },

    #[error("axis '{0}' must have min < max")]
    EmptyRange(String),
}

impl ElementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, element: InputElement) -> Result<ElementId, ElementError> {
        if self.elements.contains_key(&element.name) {
            return Err(ElementError::DuplicateName(element.name));
        }
        if let ElementKind::Axis { min, max } = element.kind {
            if min >= max {
                return Err(ElementError::EmptyRange(element.name));
            }
        }
        let codes = if element.is_axis() {
            &mut self.axes
        } else {
            &mut self.buttons
        };
        if codes.contains_key(&element.code) {
            return Err(ElementError::DuplicateCode {
                name: element.name,
                code: element.code,
            });
        }
        let id = ElementId(self.elements.len());
        codes.insert(element.code, id);
        self.elements.insert(element.name.clone(), element);
        Ok(id)
    }

    pub fn get(&self, id: ElementId) -> Option<&InputElement> {
        self.elements.get_index(id.0).map(|(_, element)| element)
    }

    pub fn id_of(&self, name: &str) -> Option<ElementId> {
        self.elements.get_index_of(name).map(ElementId)
    }

    /// Element addressed by a raw kernel event, if the table declares one
    pub fn lookup(&self, kind: RawKind, code: u16) -> Option<ElementId> {
        match kind {
            RawKind::Key => self.buttons.get(&code).copied(),
            RawKind::Absolute => self.axes.get(&code).copied(),
            RawKind::Other(_) => None,
        }
    }

    /// Configuration spelling of a trigger (`name`, `name:min`, `name:max`)
    pub fn describe(&self, trigger: &TriggerRef) -> String {
        match self.get(trigger.element) {
            Some(element) => format!("{}{}", element.name, trigger.polarity.suffix()),
            None => format!("#{}{}", trigger.element.0, trigger.polarity.suffix()),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &InputElement)> {
        self.elements
            .values()
            .enumerate()
            .map(|(index, element)| (ElementId(index), element))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Min,
    Idle,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementState {
    Button(bool),
    Axis(Zone),
}

/// Edges produced by a single raw event (at most a deactivate followed by
/// an activate when an axis jumps between extremes).
pub type Edges = SmallVec<[(TriggerRef, Edge); 2]>;

/// Tracks the last observed state of every element of one device and
/// turns raw values into activate/deactivate edges.
///
/// Buttons start released and axes start idle, so the first event of a
/// freshly attached device is compared against the resting state.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    states: Vec<ElementState>,
}

impl EdgeDetector {
    pub fn new(table: &ElementTable) -> Self {
        let states = table
            .iter()
            .map(|(_, element)| match element.kind {
                ElementKind::Button => ElementState::Button(false),
                ElementKind::Axis { .. } => ElementState::Axis(Zone::Idle),
            })
            .collect();
        Self { states }
    }

    pub fn feed(&mut self, table: &ElementTable, event: &RawEvent) -> Edges {
        let mut edges = Edges::new();
        let Some(id) = table.lookup(event.kind, event.code) else {
            return edges;
        };
        let (Some(element), Some(state)) = (table.get(id), self.states.get_mut(id.0)) else {
            return edges;
        };

        match (element.kind, state) {
            (ElementKind::Button, ElementState::Button(pressed)) => {
                if event.value == KEY_REPEAT {
                    return edges;
                }
                let now_pressed = event.value != KEY_RELEASE;
                if now_pressed != *pressed {
                    *pressed = now_pressed;
                    let edge = if now_pressed {
                        Edge::Activate
                    } else {
                        Edge::Deactivate
                    };
                    edges.push((TriggerRef::button(id), edge));
                }
            }
            (ElementKind::Axis { min, max }, ElementState::Axis(zone)) => {
                let next = if event.value <= min {
                    Zone::Min
                } else if event.value >= max {
                    Zone::Max
                } else {
                    Zone::Idle
                };
                if next != *zone {
                    if let Some(polarity) = zone_polarity(*zone) {
                        edges.push((TriggerRef::new(id, polarity), Edge::Deactivate));
                    }
                    if let Some(polarity) = zone_polarity(next) {
                        edges.push((TriggerRef::new(id, polarity), Edge::Activate));
                    }
                    *zone = next;
                }
            }
            _ => {}
        }
        edges
    }
}

fn zone_polarity(zone: Zone) -> Option<Polarity> {
    match zone {
        Zone::Min => Some(Polarity::Min),
        Zone::Max => Some(Polarity::Max),
        Zone::Idle => None,
    }
}
