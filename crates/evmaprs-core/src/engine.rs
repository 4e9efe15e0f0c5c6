// Evmaprs Trigger Engine
// Per-device state machine turning trigger edges and elapsed time into fire requests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

use crate::action::{ActionSpec, FireRequest, TriggerMode};
use crate::config::DeviceConfig;
use crate::trigger::{Edge, TriggerRef};

/// Activation bookkeeping for one action.
#[derive(Debug, Clone)]
struct ActivationState {
    /// Which trigger positions are currently satisfied
    active: Vec<bool>,
    /// `All`: when the full set was first completed (hold actions only)
    armed_at: Option<Instant>,
    /// `All`: already fired during the current episode
    fired: bool,
    /// `Sequence`: index of the next expected trigger
    cursor: usize,
    /// `Any`: per-position hold timers
    pending: Vec<Option<Instant>>,
}

impl ActivationState {
    fn new(len: usize) -> Self {
        Self {
            active: vec![false; len],
            armed_at: None,
            fired: false,
            cursor: 0,
            pending: vec![None; len],
        }
    }
}

/// Evaluates trigger edges of one device against its configured actions.
///
/// The engine owns no clock: every call carries the timestamp it should
/// be evaluated at, and [`TriggerEngine::next_deadline`] tells the caller
/// when [`TriggerEngine::on_tick`] has work to do. An engine is built for
/// exactly one configuration and is thrown away with it.
#[derive(Debug)]
pub struct TriggerEngine {
    config: Arc<DeviceConfig>,
    states: Vec<ActivationState>,
    /// Actions listening to each trigger, in configuration order
    index: HashMap<TriggerRef, SmallVec<[usize; 4]>>,
}

impl TriggerEngine {
    pub fn new(config: Arc<DeviceConfig>) -> Self {
        let mut index: HashMap<TriggerRef, SmallVec<[usize; 4]>> = HashMap::new();
        for (slot, action) in config.actions.iter().enumerate() {
            for trigger in &action.triggers {
                let slots = index.entry(*trigger).or_default();
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
        let states = config
            .actions
            .iter()
            .map(|action| ActivationState::new(action.triggers.len()))
            .collect();
        Self {
            config,
            states,
            index,
        }
    }

    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    /// Feed one edge of one trigger.
    pub fn on_event(&mut self, trigger: TriggerRef, edge: Edge, now: Instant) -> Vec<FireRequest> {
        let mut fired = Vec::new();
        let Some(slots) = self.index.get(&trigger) else {
            return fired;
        };
        for &slot in slots {
            let action = &self.config.actions[slot];
            let state = &mut self.states[slot];
            match action.mode {
                TriggerMode::All => all_edge(action, state, trigger, edge, now, &mut fired),
                TriggerMode::Any => any_edge(action, state, trigger, edge, now, &mut fired),
                TriggerMode::Sequence => {
                    if edge.is_activate() {
                        sequence_activate(action, state, trigger, now, &mut fired)
                    }
                }
            }
        }
        fired
    }

    /// Fire every hold timer that has elapsed at `now`.
    pub fn on_tick(&mut self, now: Instant) -> Vec<FireRequest> {
        let mut fired = Vec::new();
        for (action, state) in self.config.actions.iter().zip(self.states.iter_mut()) {
            match action.mode {
                TriggerMode::All => {
                    if let Some(armed_at) = state.armed_at {
                        if !state.fired && expired(armed_at, action, now) {
                            state.armed_at = None;
                            state.fired = true;
                            fired.push(FireRequest::new(action.clone(), None, now));
                        }
                    }
                }
                TriggerMode::Any => {
                    for (position, pending) in state.pending.iter_mut().enumerate() {
                        if let Some(since) = *pending {
                            if expired(since, action, now) {
                                *pending = None;
                                let trigger = action.triggers[position];
                                fired.push(FireRequest::new(action.clone(), Some(trigger), now));
                            }
                        }
                    }
                }
                TriggerMode::Sequence => {}
            }
        }
        fired
    }

    /// Earliest instant at which a pending hold timer expires
    pub fn next_deadline(&self) -> Option<Instant> {
        self.config
            .actions
            .iter()
            .zip(self.states.iter())
            .flat_map(|(action, state)| {
                let armed = state
                    .armed_at
                    .filter(|_| !state.fired)
                    .and_then(|armed_at| armed_at.checked_add(action.hold));
                let pending = state
                    .pending
                    .iter()
                    .flatten()
                    .filter_map(move |since| since.checked_add(action.hold));
                armed.into_iter().chain(pending)
            })
            .min()
    }

}

/// A hold timer whose deadline is not representable never expires
fn expired(since: Instant, action: &ActionSpec, now: Instant) -> bool {
    since
        .checked_add(action.hold)
        .is_some_and(|deadline| deadline <= now)
}

fn positions(action: &ActionSpec, trigger: TriggerRef) -> impl Iterator<Item = usize> + '_ {
    action
        .triggers
        .iter()
        .enumerate()
        .filter(move |(_, t)| **t == trigger)
        .map(|(position, _)| position)
}

fn all_edge(
    action: &Arc<ActionSpec>,
    state: &mut ActivationState,
    trigger: TriggerRef,
    edge: Edge,
    now: Instant,
    fired: &mut Vec<FireRequest>,
) {
    match edge {
        Edge::Activate => {
            for position in positions(action, trigger) {
                state.active[position] = true;
            }
            if state.fired || !state.active.iter().all(|a| *a) {
                return;
            }
            if action.is_held() {
                if state.armed_at.is_none() {
                    state.armed_at = Some(now);
                }
            } else {
                state.fired = true;
                fired.push(FireRequest::new(action.clone(), None, now));
            }
        }
        Edge::Deactivate => {
            for position in positions(action, trigger) {
                state.active[position] = false;
            }
            state.armed_at = None;
            // A new episode starts only after a full release
            if state.active.iter().all(|a| !*a) {
                state.fired = false;
            }
        }
    }
}

fn any_edge(
    action: &Arc<ActionSpec>,
    state: &mut ActivationState,
    trigger: TriggerRef,
    edge: Edge,
    now: Instant,
    fired: &mut Vec<FireRequest>,
) {
    for position in positions(action, trigger) {
        state.active[position] = edge.is_activate();
        match edge {
            Edge::Activate if action.is_held() => state.pending[position] = Some(now),
            Edge::Activate => fired.push(FireRequest::new(action.clone(), Some(trigger), now)),
            Edge::Deactivate => state.pending[position] = None,
        }
    }
}

fn sequence_activate(
    action: &Arc<ActionSpec>,
    state: &mut ActivationState,
    trigger: TriggerRef,
    now: Instant,
    fired: &mut Vec<FireRequest>,
) {
    let triggers = &action.triggers;
    if triggers.get(state.cursor) == Some(&trigger) {
        state.cursor += 1;
    } else if state.cursor > 0 && triggers.first() == Some(&trigger) {
        state.cursor = 1;
    } else {
        state.cursor = 0;
    }
    if state.cursor == triggers.len() {
        state.cursor = 0;
        fired.push(FireRequest::new(action.clone(), None, now));
    }
}
