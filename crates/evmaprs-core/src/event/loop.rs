// Evmaprs Event Loop
// Single poll(2) loop multiplexing devices, hold timers and control messages

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use super::control::{ControlChannel, ControlError, ControlMessage};
use super::manager::DeviceManager;
use crate::action::FireRequest;
use crate::config::ConfigSource;
use crate::input::{DeviceBackend, RawEvent};
use crate::output::ActionExecutor;

/// Result type for event loop operations
pub type MultiplexResult<T> = Result<T, MultiplexError>;

/// Failures that stop the loop; nothing can be serviced after them.
#[derive(Debug, thiserror::Error)]
pub enum MultiplexError {
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Read-only observer of everything the loop dispatches.
pub trait DebugSink {
    fn raw_event(&mut self, device: &Path, event: &RawEvent);

    fn fire(&mut self, device: &Path, request: &FireRequest);
}

/// Default debug sink writing to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl DebugSink for LogSink {
    fn raw_event(&mut self, device: &Path, event: &RawEvent) {
        log::trace!("{}: {:?}", device.display(), event);
    }

    fn fire(&mut self, device: &Path, request: &FireRequest) {
        log::debug!(
            "{}: action '{}' fired: {}",
            device.display(),
            request.action.label,
            request.action.kind
        );
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Milliseconds poll(2) should wait to reach `deadline`, rounded up so the
/// wake never comes early. `-1` blocks indefinitely.
pub fn poll_timeout(deadline: Option<Instant>, now: Instant) -> i32 {
    match deadline {
        None => -1,
        Some(deadline) => {
            let wait = deadline.saturating_duration_since(now);
            let millis = wait.as_nanos().div_ceil(1_000_000);
            millis.min(i32::MAX as u128) as i32
        }
    }
}

/// Owns the device arena, the action executor and the control channel, and
/// drives them from one thread.
///
/// Each turn waits for the nearest of: a readable device, an expiring hold
/// timer, a control message. It then reads the ready devices, fires the
/// expired timers, and finally applies control messages, so attach, detach
/// and configuration switches always happen between dispatch cycles.
pub struct EventMultiplexer<B: DeviceBackend, C: ConfigSource> {
    manager: DeviceManager<B, C>,
    executor: ActionExecutor,
    control: ControlChannel,
    debug: Box<dyn DebugSink>,
}

impl<B: DeviceBackend, C: ConfigSource> EventMultiplexer<B, C> {
    pub fn new(manager: DeviceManager<B, C>, executor: ActionExecutor, control: ControlChannel) -> Self {
        Self {
            manager,
            executor,
            control,
            debug: Box::new(LogSink),
        }
    }

    pub fn with_debug_sink(mut self, debug: Box<dyn DebugSink>) -> Self {
        self.debug = debug;
        self
    }

    pub fn manager(&self) -> &DeviceManager<B, C> {
        &self.manager
    }

    /// Run until a shutdown request, then tear down.
    pub fn run(mut self) -> MultiplexResult<()> {
        log::info!("event loop started with {} device(s)", self.manager.len());
        let result = loop {
            match self.turn(None) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.shutdown();
        result
    }

    /// One loop iteration. `cap` bounds the wait on top of the timer
    /// deadline.
    pub fn turn(&mut self, cap: Option<Duration>) -> MultiplexResult<Flow> {
        let devices = self.manager.poll_targets();
        let control_fds = self.control.raw_fds();
        let mut poll_fds: Vec<libc::pollfd> = devices
            .iter()
            .map(|(_, fd)| *fd)
            .chain(control_fds.iter().copied())
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let now = Instant::now();
        let deadline = match (self.manager.next_deadline(), cap.map(|cap| now + cap)) {
            (Some(timer), Some(cap)) => Some(timer.min(cap)),
            (timer, cap) => timer.or(cap),
        };
        let timeout = poll_timeout(deadline, now);

        let ready = unsafe {
            libc::poll(
                poll_fds.as_mut_ptr(),
                poll_fds.len() as libc::nfds_t,
                timeout,
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            // A signal interrupted the wait; its message is on the channel
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(MultiplexError::Poll(err));
            }
            for poll_fd in &mut poll_fds {
                poll_fd.revents = 0;
            }
        }

        let now = Instant::now();
        let readable = libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
        for ((path, _), poll_fd) in devices.iter().zip(&poll_fds) {
            if poll_fd.revents & readable != 0 {
                self.read_device(path, now);
            }
        }

        self.fire_timers(now);

        let control_ready = poll_fds[devices.len()..]
            .iter()
            .any(|poll_fd| poll_fd.revents != 0);
        if control_ready {
            for message in self.control.drain()? {
                if self.apply(message) == Flow::Shutdown {
                    return Ok(Flow::Shutdown);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn read_device(&mut self, path: &Path, now: Instant) {
        let Some(device) = self.manager.get_mut(path) else {
            return;
        };
        match device.fetch_events() {
            Ok(events) => {
                for event in &events {
                    self.debug.raw_event(path, event);
                    for request in device.handle(event, now) {
                        self.debug.fire(path, &request);
                        self.executor.execute(&request);
                    }
                }
            }
            Err(e) => {
                if e.is_gone() {
                    log::info!("{}", e);
                } else {
                    log::warn!("{}, dropping device", e);
                }
                self.manager.detach(path);
            }
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        for device in self.manager.iter_mut() {
            if !device.next_deadline().is_some_and(|deadline| deadline <= now) {
                continue;
            }
            let path = device.path().to_path_buf();
            for request in device.tick(now) {
                self.debug.fire(&path, &request);
                self.executor.execute(&request);
            }
        }
    }

    fn apply(&mut self, message: ControlMessage) -> Flow {
        match message {
            ControlMessage::Shutdown => {
                log::info!("shutdown requested");
                return Flow::Shutdown;
            }
            ControlMessage::Rescan => {
                log::info!("rescanning devices");
                self.manager.rescan_all();
            }
            ControlMessage::Reconfigure { device, file } => {
                if let Err(e) = self.manager.switch_config(&device, file.as_deref()) {
                    log::error!("{}: cannot switch configuration: {}", device.display(), e);
                }
            }
            ControlMessage::List { reply_to } => self.reply_list(&reply_to),
        }
        Flow::Continue
    }

    fn reply_list(&self, reply_to: &Path) {
        let Some(socket) = self.control.socket() else {
            return;
        };
        let payload = match serde_json::to_vec(&self.manager.devices()) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("cannot encode device list: {}", e);
                return;
            }
        };
        if let Err(e) = socket.reply(reply_to, &payload) {
            log::warn!("cannot reply to {}: {}", reply_to.display(), e);
        }
    }

    /// Release every grab, destroy the virtual keyboard, then close all
    /// devices. The control socket goes away with `self`.
    pub fn shutdown(&mut self) {
        self.manager.release_grabs();
        self.executor.shutdown();
        self.manager.detach_all();
        log::info!("event loop stopped");
    }
}
