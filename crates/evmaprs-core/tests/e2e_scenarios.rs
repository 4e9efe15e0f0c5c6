// Evmaprs End-to-End Test Scenarios
//
// Whole-loop scenarios against fake devices: no hardware, no uinput.
// Devices are socket pairs, so poll(2) sees them exactly like evdev nodes.
//
// Run with: cargo test --test e2e_scenarios

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use evmaprs_core::event::{ControlChannel, ControlHandle, ControlMessage, Flow};
use evmaprs_core::output::{ActionExecutor, CommandLauncher, KeySink, OutputEvent, UInputError};
use evmaprs_core::{
    ConfigError, ConfigSource, DebugSink, DeviceBackend, DeviceConfig, DeviceError, DeviceManager,
    ElementId, EventMultiplexer, FireRequest, InputSource, Key, RawEvent, RawKind, TriggerRef,
};

// =========================================================================
// Fakes
// =========================================================================

type Queue = Rc<RefCell<VecDeque<RawEvent>>>;

struct FakeSource {
    path: PathBuf,
    name: String,
    reader: UnixStream,
    queue: Queue,
    grabs: Rc<RefCell<Vec<(PathBuf, bool)>>>,
}

impl InputSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn fetch_events(&mut self) -> Result<Vec<RawEvent>, DeviceError> {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Err(DeviceError::Gone(self.path.clone())),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(DeviceError::from_io(&self.path, e)),
            }
        }
        Ok(self.queue.borrow_mut().drain(..).collect())
    }

    fn grab(&mut self) -> Result<(), DeviceError> {
        self.grabs.borrow_mut().push((self.path.clone(), true));
        Ok(())
    }

    fn ungrab(&mut self) -> Result<(), DeviceError> {
        self.grabs.borrow_mut().push((self.path.clone(), false));
        Ok(())
    }
}

/// A plugged-in fake device
struct Plugged {
    name: String,
    reader: UnixStream,
    writer: Option<UnixStream>,
    queue: Queue,
}

#[derive(Clone, Default)]
struct FakeBackend {
    devices: Rc<RefCell<HashMap<PathBuf, Plugged>>>,
    grabs: Rc<RefCell<Vec<(PathBuf, bool)>>>,
}

impl FakeBackend {
    fn plug(&self, path: &str, name: &str) {
        let (reader, writer) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        self.devices.borrow_mut().insert(
            PathBuf::from(path),
            Plugged {
                name: name.to_string(),
                reader,
                writer: Some(writer),
                queue: Queue::default(),
            },
        );
    }

    /// Close the device's write end: the next read reports it gone
    fn unplug(&self, path: &str) {
        if let Some(mut plugged) = self.devices.borrow_mut().remove(Path::new(path)) {
            plugged.writer = None;
        }
    }

    fn send(&self, path: &str, events: &[RawEvent]) {
        let devices = self.devices.borrow();
        let plugged = &devices[Path::new(path)];
        plugged.queue.borrow_mut().extend(events.iter().copied());
        plugged.writer.as_ref().unwrap().write_all(&[1]).unwrap();
    }
}

impl DeviceBackend for FakeBackend {
    type Source = FakeSource;

    fn discover(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.devices.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn open(&self, path: &Path) -> Result<FakeSource, DeviceError> {
        let devices = self.devices.borrow();
        let plugged = devices
            .get(path)
            .ok_or_else(|| DeviceError::Gone(path.to_path_buf()))?;
        Ok(FakeSource {
            path: path.to_path_buf(),
            name: plugged.name.clone(),
            reader: plugged
                .reader
                .try_clone()
                .map_err(|e| DeviceError::from_io(path, e))?,
            queue: plugged.queue.clone(),
            grabs: self.grabs.clone(),
        })
    }
}

/// Configurations keyed by `(device name, file)`
#[derive(Clone, Default)]
struct MemoryConfigs(Rc<RefCell<HashMap<(String, Option<String>), String>>>);

impl MemoryConfigs {
    fn put(&self, device: &str, file: Option<&str>, json: &str) {
        self.0
            .borrow_mut()
            .insert((device.to_string(), file.map(String::from)), json.to_string());
    }
}

impl ConfigSource for MemoryConfigs {
    fn load(&self, device_name: &str, file: Option<&str>) -> Result<DeviceConfig, ConfigError> {
        let key = (device_name.to_string(), file.map(String::from));
        match self.0.borrow().get(&key) {
            Some(json) => DeviceConfig::from_json(json),
            None => Err(ConfigError::NotFound(PathBuf::from(device_name))),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingSink(Rc<RefCell<Vec<OutputEvent>>>);

impl KeySink for RecordingSink {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<(), UInputError> {
        self.0.borrow_mut().extend_from_slice(events);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingLauncher(Rc<RefCell<Vec<String>>>);

impl CommandLauncher for RecordingLauncher {
    fn launch(&mut self, command: &str) -> io::Result<u32> {
        self.0.borrow_mut().push(command.to_string());
        Ok(1)
    }
}

/// Everything the loop reported to its debug sink
#[derive(Default)]
struct Observed {
    raw: Vec<(PathBuf, RawEvent)>,
    fires: Vec<(PathBuf, usize, Option<TriggerRef>)>,
}

#[derive(Clone, Default)]
struct RecordingDebug(Rc<RefCell<Observed>>);

impl DebugSink for RecordingDebug {
    fn raw_event(&mut self, device: &Path, event: &RawEvent) {
        self.0.borrow_mut().raw.push((device.to_path_buf(), *event));
    }

    fn fire(&mut self, device: &Path, request: &FireRequest) {
        self.0
            .borrow_mut()
            .fires
            .push((device.to_path_buf(), request.action.id, request.trigger));
    }
}

// =========================================================================
// Test Helpers
// =========================================================================

const ALT: Key = Key(56);
const ENTER: Key = Key(28);
const BTN_A: u16 = 304;
const BTN_B: u16 = 305;

const PAD: &str = "/dev/input/event0";
const STICK: &str = "/dev/input/event1";

const COMBO_HOLD: &str = r#"{
    "grab": true,
    "buttons": [{"name": "A", "code": 304}, {"name": "B", "code": 305}],
    "actions": [
        {"trigger": ["A", "B"], "hold": 1.0, "type": "key", "target": ["KEY_LEFTALT", "KEY_ENTER"]}
    ]
}"#;

const COMBO_HOLD_EXEC: &str = r#"{
    "buttons": [{"name": "A", "code": 304}, {"name": "B", "code": 305}],
    "actions": [
        {"trigger": ["A", "B"], "hold": 1.0, "type": "exec", "target": "notify-send switched"}
    ]
}"#;

const STICK_EXEC: &str = r#"{
    "axes": [{"name": "X", "code": 0, "min": 0, "max": 255}],
    "actions": [{"trigger": "X:max", "type": "exec", "target": "shutdown -h now"}]
}"#;

const TAP_AND_HOLD: &str = r#"{
    "buttons": [{"name": "A", "code": 304}, {"name": "B", "code": 305}],
    "actions": [
        {"trigger": "A", "type": "key", "target": "KEY_ENTER"},
        {"trigger": "B", "mode": "any", "hold": 0.3, "type": "exec", "target": "true"}
    ]
}"#;

const PAD_TAP: &str = r#"{
    "buttons": [{"name": "A", "code": 304}],
    "actions": [{"trigger": "A", "type": "key", "target": "KEY_ENTER"}]
}"#;

struct Rig {
    backend: FakeBackend,
    configs: MemoryConfigs,
    keys: RecordingSink,
    launches: RecordingLauncher,
    control: ControlHandle,
    debug: RecordingDebug,
    mux: EventMultiplexer<FakeBackend, MemoryConfigs>,
}

impl Rig {
    fn new(setup: impl FnOnce(&FakeBackend, &MemoryConfigs)) -> Self {
        let backend = FakeBackend::default();
        let configs = MemoryConfigs::default();
        setup(&backend, &configs);

        let keys = RecordingSink::default();
        let launches = RecordingLauncher::default();
        let executor = ActionExecutor::new(Some(Box::new(keys.clone())), Box::new(launches.clone()));
        let control = ControlChannel::new().unwrap();
        let handle = control.handle();
        let mut manager = DeviceManager::new(backend.clone(), configs.clone());
        manager.rescan_all();
        let debug = RecordingDebug::default();

        Self {
            backend,
            configs,
            keys,
            launches,
            control: handle,
            debug: debug.clone(),
            mux: EventMultiplexer::new(manager, executor, control).with_debug_sink(Box::new(debug)),
        }
    }

    /// Run the loop for `duration`, returning early on shutdown
    fn pump(&mut self, duration: Duration) -> Flow {
        let until = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= until {
                return Flow::Continue;
            }
            if self.mux.turn(Some(until - now)).unwrap() == Flow::Shutdown {
                return Flow::Shutdown;
            }
        }
    }

    fn send(&mut self, path: &str, events: &[RawEvent]) {
        self.backend.send(path, events);
        self.pump(Duration::from_millis(20));
    }

    fn chords(&self) -> usize {
        self.keys
            .0
            .borrow()
            .iter()
            .filter(|event| **event == OutputEvent::Sync)
            .count()
    }

    fn launched(&self) -> Vec<String> {
        self.launches.0.borrow().clone()
    }
}

fn press(code: u16) -> RawEvent {
    RawEvent::key(code, 1)
}

fn release(code: u16) -> RawEvent {
    RawEvent::key(code, 0)
}

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn test_axis_max_spawns_command_once() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(STICK, "Stick");
        configs.put("Stick", None, STICK_EXEC);
    });

    rig.send(STICK, &[RawEvent::absolute(0, 128)]);
    rig.send(STICK, &[RawEvent::absolute(0, 255)]);
    // Still at max: same episode
    rig.send(STICK, &[RawEvent::absolute(0, 255), RawEvent::absolute(0, 254)]);

    assert_eq!(rig.launched(), vec!["shutdown -h now"]);
    assert_eq!(rig.chords(), 0);
}

#[test]
fn test_two_button_hold_fires_once() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, COMBO_HOLD);
    });

    rig.send(PAD, &[press(BTN_A)]);
    rig.send(PAD, &[press(BTN_B)]);
    rig.pump(Duration::from_millis(800));
    assert_eq!(rig.chords(), 0);

    rig.pump(Duration::from_millis(400));
    assert_eq!(
        *rig.keys.0.borrow(),
        vec![
            OutputEvent::Press(ALT),
            OutputEvent::Press(ENTER),
            OutputEvent::Release(ENTER),
            OutputEvent::Release(ALT),
            OutputEvent::Sync,
        ]
    );

    // Keeping both held never fires again
    rig.pump(Duration::from_millis(1200));
    assert_eq!(rig.chords(), 1);
}

#[test]
fn test_two_button_early_release_never_fires() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, COMBO_HOLD);
    });

    rig.send(PAD, &[press(BTN_A)]);
    rig.send(PAD, &[press(BTN_B)]);
    rig.pump(Duration::from_millis(500));
    rig.send(PAD, &[release(BTN_B)]);
    rig.pump(Duration::from_millis(1000));

    assert_eq!(rig.chords(), 0);
}

#[test]
fn test_config_switch_discards_pending_timers() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, COMBO_HOLD);
        configs.put("Pad", Some("exec.json"), COMBO_HOLD_EXEC);
    });
    assert!(rig.mux.manager().get(Path::new(PAD)).unwrap().is_grabbed());

    rig.send(PAD, &[press(BTN_A), press(BTN_B)]);
    rig.pump(Duration::from_millis(300));
    rig.control
        .send(ControlMessage::Reconfigure {
            device: PathBuf::from(PAD),
            file: Some("exec.json".into()),
        })
        .unwrap();
    rig.pump(Duration::from_millis(1200));

    assert_eq!(rig.chords(), 0);
    assert!(rig.launched().is_empty());
    let pad = rig.mux.manager().get(Path::new(PAD)).unwrap();
    assert!(!pad.is_grabbed());
    assert!(rig.mux.manager().next_deadline().is_none());

    // The new configuration works from a fresh episode
    rig.send(PAD, &[release(BTN_A), release(BTN_B)]);
    rig.send(PAD, &[press(BTN_A), press(BTN_B)]);
    rig.pump(Duration::from_millis(1100));
    assert_eq!(rig.launched(), vec!["notify-send switched"]);
}

#[test]
fn test_failed_switch_keeps_running_config() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, PAD_TAP);
        configs.put("Pad", Some("broken.json"), r#"{"actions": [{"trigger": "Q"}]}"#);
    });

    rig.control
        .send(ControlMessage::Reconfigure {
            device: PathBuf::from(PAD),
            file: Some("broken.json".into()),
        })
        .unwrap();
    rig.pump(Duration::from_millis(20));
    rig.send(PAD, &[press(BTN_A)]);

    assert_eq!(rig.chords(), 1);
}

#[test]
fn test_detach_cancels_pending_timer() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, COMBO_HOLD);
    });

    rig.send(PAD, &[press(BTN_A), press(BTN_B)]);
    assert!(rig.mux.manager().next_deadline().is_some());
    rig.backend.unplug(PAD);
    rig.pump(Duration::from_millis(1200));

    assert!(rig.mux.manager().is_empty());
    assert!(rig.mux.manager().next_deadline().is_none());
    assert_eq!(rig.chords(), 0);
    // Grab released on the way out
    assert_eq!(
        *rig.backend.grabs.borrow(),
        vec![(PathBuf::from(PAD), true), (PathBuf::from(PAD), false)]
    );
}

#[test]
fn test_gone_device_leaves_others_untouched() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        backend.plug(STICK, "Stick");
        configs.put("Pad", None, PAD_TAP);
        configs.put("Stick", None, STICK_EXEC);
    });
    assert_eq!(rig.mux.manager().len(), 2);

    rig.backend.unplug(STICK);
    rig.send(PAD, &[press(BTN_A)]);

    assert_eq!(rig.mux.manager().len(), 1);
    assert_eq!(rig.chords(), 1);
    assert!(rig.launched().is_empty());
}

#[test]
fn test_rescan_request_attaches_new_device() {
    let mut rig = Rig::new(|_, _| {});
    assert!(rig.mux.manager().is_empty());

    rig.backend.plug(PAD, "Pad");
    rig.configs.put("Pad", None, PAD_TAP);
    rig.control.send(ControlMessage::Rescan).unwrap();
    rig.pump(Duration::from_millis(20));

    assert_eq!(rig.mux.manager().len(), 1);
    rig.send(PAD, &[press(BTN_A), release(BTN_A), press(BTN_A)]);
    assert_eq!(rig.chords(), 2);
}

#[test]
fn test_shutdown_releases_grabs() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, COMBO_HOLD);
    });

    rig.send(PAD, &[press(BTN_A), press(BTN_B)]);
    rig.control.send(ControlMessage::Shutdown).unwrap();
    assert_eq!(rig.pump(Duration::from_secs(1)), Flow::Shutdown);
    rig.mux.shutdown();

    assert!(rig.mux.manager().is_empty());
    assert_eq!(rig.backend.grabs.borrow().last(), Some(&(PathBuf::from(PAD), false)));
    // The armed hold never fires after shutdown
    assert_eq!(rig.chords(), 0);
}

#[test]
fn test_debug_sink_sees_raw_events_and_fires() {
    let mut rig = Rig::new(|backend, configs| {
        backend.plug(PAD, "Pad");
        configs.put("Pad", None, TAP_AND_HOLD);
    });
    let syn = RawEvent::new(RawKind::Other(0), 0, 0);

    rig.send(PAD, &[press(BTN_A), syn]);
    rig.send(PAD, &[press(BTN_B)]);
    {
        let observed = rig.debug.0.borrow();
        assert_eq!(observed.fires, vec![(PathBuf::from(PAD), 0, None)]);
    }

    // The hold of B expires inside the loop, not on a read
    rig.pump(Duration::from_millis(400));

    let observed = rig.debug.0.borrow();
    let pad = PathBuf::from(PAD);
    assert_eq!(
        observed.raw,
        vec![
            (pad.clone(), press(BTN_A)),
            (pad.clone(), syn),
            (pad.clone(), press(BTN_B)),
        ]
    );
    assert_eq!(
        observed.fires,
        vec![
            (pad.clone(), 0, None),
            (pad, 1, Some(TriggerRef::button(ElementId(1)))),
        ]
    );
    assert_eq!(rig.chords(), 1);
    assert_eq!(rig.launched(), vec!["true"]);
}
