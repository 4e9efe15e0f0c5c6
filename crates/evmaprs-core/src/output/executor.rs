// Evmaprs Action Executor
// Performs fire requests: key chords on the virtual keyboard or detached commands

use super::reaper::CommandLauncher;
use super::uinput::{KeySink, OutputEvent};
use crate::action::{ActionKind, FireRequest};
use crate::Key;

/// Events emitting `keys` as one chord: presses in listed order, releases
/// in reverse order, then a sync report.
pub fn key_chord(keys: &[Key]) -> Vec<OutputEvent> {
    let mut events = Vec::with_capacity(keys.len() * 2 + 1);
    events.extend(keys.iter().copied().map(OutputEvent::Press));
    events.extend(keys.iter().rev().copied().map(OutputEvent::Release));
    events.push(OutputEvent::Sync);
    events
}

/// Turns fire requests into side effects.
///
/// Failures never reach the caller: the event loop must keep running no
/// matter what an action does, so everything is logged here instead.
pub struct ActionExecutor {
    /// `None` when the virtual keyboard could not be created
    output: Option<Box<dyn KeySink>>,
    launcher: Box<dyn CommandLauncher>,
}

impl ActionExecutor {
    pub fn new(output: Option<Box<dyn KeySink>>, launcher: Box<dyn CommandLauncher>) -> Self {
        Self { output, launcher }
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn execute(&mut self, request: &FireRequest) {
        let action = &request.action;
        match &action.kind {
            ActionKind::Key(keys) => {
                let Some(output) = self.output.as_mut() else {
                    log::warn!(
                        "action '{}': key injection disabled, dropping {}",
                        action.label,
                        action.kind
                    );
                    return;
                };
                if let Err(e) = output.emit(&key_chord(keys)) {
                    log::error!("action '{}': {}", action.label, e);
                }
            }
            ActionKind::Exec(commands) => {
                for command in commands {
                    match self.launcher.launch(command) {
                        Ok(pid) => log::info!("action '{}': started '{}' (pid {})", action.label, command, pid),
                        Err(e) => log::error!("action '{}': cannot run '{}': {}", action.label, command, e),
                    }
                }
            }
        }
    }

    /// Destroy the virtual keyboard; later key actions are dropped.
    pub fn shutdown(&mut self) {
        self.output = None;
    }
}
