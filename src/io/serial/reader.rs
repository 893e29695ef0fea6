// src/io/serial/reader.rs
//
// Serial acquisition worker.
//
// One dedicated thread runs a cooperative poll loop at a fixed tick rate.
// Each tick advances a small state machine that discovers devices, opens
// the selected one, reads whatever bytes are waiting, extracts frames and
// hands decoded samples to the registry. Other threads never touch the
// state machine: they leave requests on the registry and the next tick
// acts on them.
//
// Failures are never fatal. Open failures go back to discovery, read
// failures are logged and reading continues, malformed frames are dropped.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::BridgeError;
use crate::io::{Port, SerialBackend, SerialLink};
use crate::registry::{DeviceRegistry, PendingRequests};
use crate::settings::BridgeSettings;

use super::framer::{decode, to_sample, ByteBuffer, Frame};

// ============================================================================
// Types and Configuration
// ============================================================================

/// Read at most this many bytes per tick.
const READ_CHUNK: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Wait,
    ScanPorts,
    Connecting,
    Read,
    Parse,
    Close,
}

/// Worker tuning, usually derived from [`BridgeSettings`].
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub tick: Duration,
    pub baud_rate: u32,
    /// Selected automatically when a matching port shows up
    pub default_port: Option<String>,
    /// Wait this long after a failed open before trying again
    pub open_retry_backoff: Option<Duration>,
    pub max_buffered_bytes: usize,
}

impl WorkerConfig {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        WorkerConfig {
            tick: settings.tick_period(),
            baud_rate: settings.baud_rate,
            default_port: settings.default_port.clone(),
            open_retry_backoff: settings.open_retry_backoff(),
            max_buffered_bytes: settings.max_buffered_bytes,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig::from_settings(&BridgeSettings::default())
    }
}

// ============================================================================
// State Machine
// ============================================================================

pub struct ConnectionStateMachine {
    state: ConnectionState,
    backend: Box<dyn SerialBackend>,
    registry: Arc<DeviceRegistry>,
    config: WorkerConfig,
    buffer: ByteBuffer,
    link: Option<Box<dyn SerialLink>>,
    /// Path of the device behind `link`
    open_path: Option<String>,
    /// Frame found in READ, decoded in PARSE
    pending: Option<Frame>,
    /// Backoff deadline after a failed open
    retry_after: Option<Instant>,
    /// Closed to switch ports; go straight back to discovery
    resume_after_close: bool,
    enumerate_failing: bool,
}

impl ConnectionStateMachine {
    pub fn new(
        backend: Box<dyn SerialBackend>,
        registry: Arc<DeviceRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let buffer = ByteBuffer::new(config.max_buffered_bytes);
        ConnectionStateMachine {
            state: ConnectionState::Wait,
            backend,
            registry,
            config,
            buffer,
            link: None,
            open_path: None,
            pending: None,
            retry_after: None,
            resume_after_close: false,
            enumerate_failing: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Text buffered from the device and not yet consumed.
    pub fn buffered(&self) -> &str {
        self.buffer.as_str()
    }

    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        // READ <-> PARSE happens once per frame, and an idle machine with no
        // devices cycles WAIT <-> CLOSE every tick; neither is worth a log line
        let routine = match (self.state, next) {
            (ConnectionState::Read, ConnectionState::Parse)
            | (ConnectionState::Parse, ConnectionState::Read) => true,
            (ConnectionState::Wait, ConnectionState::Close)
            | (ConnectionState::Close, ConnectionState::Wait) => self.link.is_none(),
            _ => false,
        };
        if !routine {
            tlog!("[worker] {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    /// Ports currently visible to the system. Enumeration errors count as none.
    fn discover(&mut self) -> Vec<Port> {
        match self.backend.available_ports() {
            Ok(ports) => {
                if self.enumerate_failing {
                    tlog!("[worker] Port enumeration recovered");
                    self.enumerate_failing = false;
                }
                ports
            }
            Err(e) => {
                if !self.enumerate_failing {
                    tlog!("[worker] {}", e);
                    self.enumerate_failing = true;
                }
                Vec::new()
            }
        }
    }

    /// Run one iteration of the machine.
    pub fn tick(&mut self) {
        let visible = self.discover();

        // Device loss overrides everything else on this tick. Ports are
        // forgotten even when CLOSE is already underway.
        let open_lost = self
            .open_path
            .as_ref()
            .map_or(false, |path| !visible.iter().any(|p| &p.path == path));
        if visible.is_empty() || open_lost {
            if self.link.is_some() && self.state != ConnectionState::Close {
                tlog!("[worker] {}", BridgeError::DeviceUnavailable);
            }
            self.registry.clear_ports();
            if self.state != ConnectionState::Close {
                self.transition(ConnectionState::Close);
                return;
            }
        }

        let requests = self.registry.take_requests();
        if !requests.is_empty() && self.apply_requests(requests, &visible) {
            return;
        }

        match self.state {
            ConnectionState::Wait => self.on_wait(requests),
            ConnectionState::ScanPorts => self.on_scan_ports(&visible),
            ConnectionState::Connecting => self.on_connecting(),
            ConnectionState::Read => self.on_read(),
            ConnectionState::Parse => self.on_parse(),
            ConnectionState::Close => self.on_close(),
        }
    }

    /// Returns true when a request moved the machine to CLOSE.
    fn apply_requests(&mut self, requests: PendingRequests, visible: &[Port]) -> bool {
        if requests.scan {
            // A requested scan re-announces the list so a new client gets it
            if !self.registry.set_port_list(visible) && self.registry.is_client_attached() {
                self.registry.announce_port_list();
            }
        }

        if requests.disconnect
            && !matches!(self.state, ConnectionState::Wait | ConnectionState::Close)
        {
            self.transition(ConnectionState::Close);
            return true;
        }

        if requests.connect {
            let switching = match (&self.open_path, self.registry.selected()) {
                (Some(open), Some(sel)) => *open != sel.port.path,
                _ => false,
            };
            if switching {
                self.resume_after_close = true;
                self.transition(ConnectionState::Close);
                return true;
            }
        }
        false
    }

    fn on_wait(&mut self, requests: PendingRequests) {
        let commanded = requests.scan || requests.connect || self.resume_after_close;
        if commanded || self.registry.selected().is_none() {
            self.resume_after_close = false;
            self.transition(ConnectionState::ScanPorts);
        }
    }

    fn on_scan_ports(&mut self, visible: &[Port]) {
        self.registry.set_port_list(visible);

        if self.registry.selected().is_none() {
            if let Some(default) = self.config.default_port.clone() {
                if visible.iter().any(|p| p.matches(&default)) {
                    if let Err(e) = self.registry.select_port(&default, self.config.baud_rate) {
                        tlog!("[worker] Default port: {}", e);
                    }
                }
            }
        }

        if self.registry.selected().is_none() {
            return;
        }
        if let Some(deadline) = self.retry_after {
            if Instant::now() < deadline {
                return;
            }
            self.retry_after = None;
        }
        self.transition(ConnectionState::Connecting);
    }

    fn on_connecting(&mut self) {
        let Some(selected) = self.registry.selected() else {
            self.transition(ConnectionState::ScanPorts);
            return;
        };

        match self.backend.open(&selected) {
            Ok(link) => {
                tlog!(
                    "[worker] Opened {} at {} baud",
                    selected.port.path,
                    selected.baud_rate
                );
                self.link = Some(link);
                self.open_path = Some(selected.port.path);
                self.buffer.clear();
                self.pending = None;
                self.registry.set_port_open(true);
                self.transition(ConnectionState::Read);
            }
            Err(e) => {
                tlog!("[worker] {}", e);
                self.retry_after = self.config.open_retry_backoff.map(|d| Instant::now() + d);
                self.transition(ConnectionState::ScanPorts);
            }
        }
    }

    fn on_read(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.transition(ConnectionState::Close);
            return;
        };

        if let Err(e) = read_available(link.as_mut(), &mut self.buffer) {
            tlog!("[worker] {}", e);
        }

        if let Some(frame) = self.buffer.extract() {
            self.pending = Some(frame);
            self.transition(ConnectionState::Parse);
        }
    }

    fn on_parse(&mut self) {
        if let Some(frame) = self.pending.take() {
            let sample = to_sample(&decode(self.buffer.as_str(), frame));
            self.buffer.consume(frame);
            // Malformed frames are dropped quietly; the previous sample stands
            if let Ok(sample) = sample {
                self.registry.set_sample(sample);
            }
        }
        self.transition(ConnectionState::Read);
    }

    fn on_close(&mut self) {
        if self.link.take().is_some() {
            if let Some(path) = self.open_path.take() {
                tlog!("[worker] Port {} closed", path);
            }
        }
        self.open_path = None;
        self.buffer.clear();
        self.pending = None;
        self.registry.set_port_open(false);
        self.transition(ConnectionState::Wait);
    }

    /// Drop the device handle on shutdown. Publishes nothing.
    fn release(&mut self) {
        self.link = None;
        self.open_path = None;
        self.registry.set_port_open(false);
    }

    /// Tick until `cancel` fires, then release the device.
    pub fn run(mut self, cancel: CancelToken) {
        tlog!("[worker] Started ({:?} per tick)", self.config.tick);
        while !cancel.is_cancelled() {
            self.tick();
            if cancel.wait_timeout(self.config.tick) {
                break;
            }
        }
        self.release();
        tlog!("[worker] Stopped");
    }
}

/// Non-blocking read: check for waiting bytes and read only those.
fn read_available(link: &mut dyn SerialLink, buffer: &mut ByteBuffer) -> Result<usize, BridgeError> {
    let waiting = link.bytes_to_read()? as usize;
    if waiting == 0 {
        return Ok(0);
    }

    let mut chunk = [0u8; READ_CHUNK];
    let want = waiting.min(READ_CHUNK);
    match link.read(&mut chunk[..want]) {
        Ok(n) => {
            buffer.push(&chunk[..n]);
            Ok(n)
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
        Err(e) => Err(BridgeError::TransientRead(e)),
    }
}

// ============================================================================
// Worker Thread
// ============================================================================

/// Owns the thread running a [`ConnectionStateMachine`].
///
/// Scan, connect and disconnect are requested through the registry
/// (`DeviceRegistry::request_*`); the worker picks them up on its next tick.
pub struct SerialWorker {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl SerialWorker {
    pub fn start(machine: ConnectionStateMachine) -> Result<Self, BridgeError> {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("serial_worker".to_string())
            .spawn(move || machine.run(worker_cancel))
            .map_err(BridgeError::Worker)?;

        Ok(SerialWorker {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit. Idempotent.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tlog!("[worker] Worker thread panicked");
            }
        }
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BridgeEvent, EventBus};
    use crate::testing::{MockSerial, RecordingSubscriber};

    struct Rig {
        machine: ConnectionStateMachine,
        serial: MockSerial,
        registry: Arc<DeviceRegistry>,
        events: Arc<RecordingSubscriber>,
    }

    fn rig_with(config: WorkerConfig) -> Rig {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(RecordingSubscriber::default());
        bus.subscribe(events.clone());
        let registry = Arc::new(DeviceRegistry::new(bus));
        let serial = MockSerial::default();
        let machine =
            ConnectionStateMachine::new(Box::new(serial.clone()), registry.clone(), config);
        Rig {
            machine,
            serial,
            registry,
            events,
        }
    }

    fn rig() -> Rig {
        rig_with(WorkerConfig::default())
    }

    fn port_a() -> Port {
        Port::new("A", "/dev/ttyA")
    }

    impl Rig {
        /// Discover port A, select it and tick until READ.
        fn connect_a(&mut self) {
            self.serial.set_ports(vec![port_a()]);
            self.machine.tick(); // WAIT -> SCAN_PORTS
            self.machine.tick(); // SCAN_PORTS, nothing selected yet
            self.registry.select_port("A", 115200).unwrap();
            self.machine.tick(); // -> CONNECTING
            self.machine.tick(); // -> READ
            assert_eq!(self.machine.state(), ConnectionState::Read);
        }

        /// Bring the machine to `target` with port A known and selected.
        fn drive_to(&mut self, target: ConnectionState) {
            match target {
                ConnectionState::Wait => {
                    self.connect_a();
                    self.registry.request_disconnect();
                    self.machine.tick(); // -> CLOSE
                    self.machine.tick(); // -> WAIT, selection kept
                }
                ConnectionState::ScanPorts => {
                    self.serial.set_ports(vec![port_a()]);
                    self.machine.tick();
                    self.machine.tick();
                    self.registry.select_port("A", 115200).unwrap();
                }
                ConnectionState::Connecting => {
                    self.drive_to(ConnectionState::ScanPorts);
                    self.machine.tick();
                }
                ConnectionState::Read => self.connect_a(),
                ConnectionState::Parse => {
                    self.connect_a();
                    self.serial.feed(b"$1;2;3;4;5\n");
                    self.machine.tick();
                }
                ConnectionState::Close => {
                    self.connect_a();
                    self.registry.request_disconnect();
                    self.machine.tick();
                }
            }
            assert_eq!(self.machine.state(), target);
        }
    }

    #[test]
    fn test_wait_goes_to_scan_without_selection() {
        let mut rig = rig();
        rig.serial.set_ports(vec![port_a()]);
        assert_eq!(rig.machine.state(), ConnectionState::Wait);

        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);

        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);
        assert_eq!(rig.registry.ports(), vec![port_a()]);
        assert_eq!(rig.events.count(BridgeEvent::PortListChanged), 1);

        // Same list again: no new event
        rig.machine.tick();
        assert_eq!(rig.events.count(BridgeEvent::PortListChanged), 1);
    }

    #[test]
    fn test_selection_leads_to_read() {
        let mut rig = rig();
        rig.connect_a();
        assert_eq!(rig.serial.opens(), 1);
        assert!(rig.registry.is_port_open());
    }

    #[test]
    fn test_open_failure_returns_to_scan() {
        let mut rig = rig();
        rig.serial.set_ports(vec![port_a()]);
        rig.serial.set_fail_open(true);
        rig.machine.tick();
        rig.machine.tick();
        rig.registry.select_port("A", 115200).unwrap();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Connecting);

        for _ in 0..5 {
            rig.machine.tick(); // CONNECTING fails
            assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);
            rig.machine.tick(); // busy retry, no backoff
            assert_eq!(rig.machine.state(), ConnectionState::Connecting);
        }
        assert!(!rig.registry.is_port_open());

        rig.serial.set_fail_open(false);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);
    }

    #[test]
    fn test_open_backoff_delays_retry() {
        let mut rig = rig_with(WorkerConfig {
            open_retry_backoff: Some(Duration::from_secs(60)),
            ..WorkerConfig::default()
        });
        rig.serial.set_ports(vec![port_a()]);
        rig.serial.set_fail_open(true);
        rig.machine.tick();
        rig.machine.tick();
        rig.registry.select_port("A", 115200).unwrap();
        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);

        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);
    }

    #[test]
    fn test_frames_become_samples() {
        let mut rig = rig();
        rig.connect_a();

        rig.serial.feed(b"garbage$1;2.0;0.5;5.0;128\nmore$3");
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Parse);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);

        let sample = rig.registry.sample().unwrap();
        assert_eq!(sample.state, "1");
        assert_eq!(sample.weight, "2.0");
        assert_eq!(sample.current, "0.5");
        assert_eq!(sample.voltage, "5.0");
        assert_eq!(sample.pwm, "128");
        assert_eq!(rig.events.count(BridgeEvent::SampleReady), 1);
        assert_eq!(rig.machine.buffered(), "$3");

        // Rest of the in-flight frame arrives
        rig.serial.feed(b";4.0;0.1;4.9;64\n");
        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.registry.sample().unwrap().state, "3");
        assert_eq!(rig.events.count(BridgeEvent::SampleReady), 2);
    }

    #[test]
    fn test_burst_of_frames_yields_latest_sample() {
        let mut rig = rig();
        rig.connect_a();

        rig.serial.feed(b"$1;1;1;1;1\n$2;2;2;2;2\n$3;3;3;3;3\n");
        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.registry.sample().unwrap().state, "3");
        assert_eq!(rig.events.count(BridgeEvent::SampleReady), 1);

        // Nothing stale left to replay
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);
        assert_eq!(rig.machine.buffered(), "");
    }

    #[test]
    fn test_short_frame_keeps_previous_sample() {
        let mut rig = rig();
        rig.connect_a();

        rig.serial.feed(b"$1;2.0;0.5;5.0;128\n");
        rig.machine.tick();
        rig.machine.tick();
        let before = rig.registry.sample();

        rig.serial.feed(b"$9;9\n");
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Parse);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);

        assert_eq!(rig.registry.sample(), before);
        assert_eq!(rig.events.count(BridgeEvent::SampleReady), 1);
    }

    #[test]
    fn test_read_error_stays_in_read() {
        let mut rig = rig();
        rig.connect_a();

        rig.serial.feed_read_error();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);

        rig.serial.feed(b"$1;2;3;4;5\n");
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Parse);
    }

    #[test]
    fn test_empty_device_list_forces_close_from_read() {
        let mut rig = rig();
        rig.serial.set_ports(vec![]);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Close);
        rig.machine.tick();

        rig.connect_a();
        rig.serial.feed(b"$1;2");
        rig.machine.tick();

        rig.serial.set_ports(vec![]);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Close);
        // Handle stays open until the CLOSE action runs
        assert_eq!(rig.serial.closes(), 0);

        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Wait);
        assert_eq!(rig.serial.closes(), 1);
        assert!(!rig.registry.is_port_open());
        assert!(rig.registry.ports().is_empty());
        assert!(rig.registry.selected().is_none());
        assert_eq!(rig.machine.buffered(), "");
    }

    const ALL_STATES: [ConnectionState; 6] = [
        ConnectionState::Wait,
        ConnectionState::ScanPorts,
        ConnectionState::Connecting,
        ConnectionState::Read,
        ConnectionState::Parse,
        ConnectionState::Close,
    ];

    #[test]
    fn test_empty_device_list_forces_close_from_every_state() {
        for target in ALL_STATES {
            let mut rig = rig();
            rig.drive_to(target);
            assert_eq!(rig.registry.ports(), vec![port_a()], "{:?}", target);
            assert!(rig.registry.selected().is_some(), "{:?}", target);

            rig.serial.set_ports(vec![]);
            rig.machine.tick();

            // Already closing: the close action runs on this tick
            let expected = if target == ConnectionState::Close {
                ConnectionState::Wait
            } else {
                ConnectionState::Close
            };
            assert_eq!(rig.machine.state(), expected, "from {:?}", target);
            assert!(rig.registry.ports().is_empty(), "from {:?}", target);
            assert!(rig.registry.selected().is_none(), "from {:?}", target);
        }
    }

    #[test]
    fn test_device_loss_while_closing_forgets_ports() {
        let mut rig = rig();
        rig.drive_to(ConnectionState::Close);
        let selected = rig.events.count(BridgeEvent::PortSelected);

        rig.serial.set_ports(vec![]);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Wait);
        assert_eq!(rig.serial.closes(), 1);
        assert!(rig.registry.ports().is_empty());
        assert!(rig.registry.selected().is_none());

        // The vanished device can no longer be selected
        let err = rig.registry.select_port("A", 115200).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSelection(_)));
        assert_eq!(rig.events.count(BridgeEvent::PortSelected), selected);
    }

    #[test]
    fn test_losing_the_open_device_forces_close() {
        let mut rig = rig();
        rig.connect_a();

        rig.serial.set_ports(vec![Port::new("B", "/dev/ttyB")]);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Close);
    }

    #[test]
    fn test_disconnect_request_closes_then_waits() {
        let mut rig = rig();
        rig.connect_a();

        rig.registry.request_disconnect();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Close);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Wait);
        assert_eq!(rig.serial.closes(), 1);

        // Selection kept, nothing commanded: stay idle
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Wait);

        rig.registry.request_connect();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);
        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);
        assert_eq!(rig.serial.opens(), 2);
    }

    #[test]
    fn test_selecting_another_port_switches_device() {
        let mut rig = rig();
        rig.connect_a();
        rig.serial.set_ports(vec![port_a(), Port::new("B", "/dev/ttyB")]);
        rig.machine.tick();

        rig.registry.set_port_list(&rig.serial.available_ports().unwrap());
        rig.registry.select_port("B", 115200).unwrap();
        rig.registry.request_connect();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Close);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Wait);
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::ScanPorts);
        rig.machine.tick();
        rig.machine.tick();
        assert_eq!(rig.machine.state(), ConnectionState::Read);
        assert_eq!(rig.serial.opens(), 2);
    }

    #[test]
    fn test_default_port_is_selected_on_discovery() {
        let mut rig = rig_with(WorkerConfig {
            default_port: Some("/dev/ttyA".to_string()),
            ..WorkerConfig::default()
        });
        rig.serial.set_ports(vec![port_a()]);

        rig.machine.tick(); // WAIT -> SCAN_PORTS
        rig.machine.tick(); // discovers A, selects it -> CONNECTING
        assert_eq!(rig.machine.state(), ConnectionState::Connecting);
        assert_eq!(rig.events.count(BridgeEvent::PortSelected), 1);
        assert_eq!(rig.registry.selected().unwrap().baud_rate, 115200);
    }

    #[test]
    fn test_requested_scan_reannounces_for_attached_client() {
        let mut rig = rig();
        rig.connect_a();
        let announced = rig.events.count(BridgeEvent::PortListChanged);

        rig.registry.set_client_attached(true);
        rig.registry.request_scan();
        rig.machine.tick();
        assert_eq!(rig.events.count(BridgeEvent::PortListChanged), announced + 1);
        assert_eq!(rig.machine.state(), ConnectionState::Read);

        // Unrequested ticks stay quiet
        rig.machine.tick();
        assert_eq!(rig.events.count(BridgeEvent::PortListChanged), announced + 1);
    }

    #[test]
    fn test_worker_thread_runs_and_shuts_down() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(RecordingSubscriber::default());
        bus.subscribe(events.clone());
        let registry = Arc::new(DeviceRegistry::new(bus));
        let serial = MockSerial::default();
        serial.set_ports(vec![port_a()]);
        serial.feed(b"$1;2;3;4;5\n");

        let config = WorkerConfig {
            tick: Duration::from_millis(1),
            default_port: Some("A".to_string()),
            ..WorkerConfig::default()
        };
        let machine = ConnectionStateMachine::new(Box::new(serial.clone()), registry.clone(), config);
        let mut worker = SerialWorker::start(machine).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while events.count(BridgeEvent::SampleReady) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_running());
        assert_eq!(registry.sample().unwrap().pwm, "5");

        let published = events.events().len();
        worker.shutdown();
        assert!(!worker.is_running());
        assert!(!registry.is_port_open());
        assert_eq!(serial.closes(), 1);
        // Shutdown publishes nothing
        assert_eq!(events.events().len(), published);
    }
}
