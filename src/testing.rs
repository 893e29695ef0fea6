// src/testing.rs
//
// Test doubles shared by the unit tests: an event recorder, a transport
// recorder, and an in-memory serial backend whose port list and incoming
// bytes are scripted by the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::BridgeError;
use crate::events::{BridgeEvent, Subscriber};
use crate::io::{Port, SelectedPort, SerialBackend, SerialLink, TelemetrySample};
use crate::transport::{PortEntry, Transport};

#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<BridgeEvent>>,
}

impl RecordingSubscriber {
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: BridgeEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|e| **e == kind).count()
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_event(&self, event: BridgeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    port_lists: Mutex<Vec<Vec<PortEntry>>>,
    samples: Mutex<Vec<TelemetrySample>>,
}

impl RecordingTransport {
    pub fn port_lists(&self) -> Vec<Vec<PortEntry>> {
        self.port_lists.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.samples.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn notify_port_list(&self, ports: &[PortEntry]) {
        self.port_lists.lock().unwrap().push(ports.to_vec());
    }

    fn notify_sample(&self, sample: &TelemetrySample) {
        self.samples.lock().unwrap().push(sample.clone());
    }
}

/// What the mock device does on its next read.
pub enum ReadStep {
    Bytes(Vec<u8>),
    Fail,
}

#[derive(Default)]
struct MockState {
    ports: Vec<Port>,
    fail_open: bool,
    opens: usize,
    closes: usize,
    incoming: VecDeque<ReadStep>,
}

/// Scripted serial backend. Clones share the same script.
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn set_ports(&self, ports: Vec<Port>) {
        self.state.lock().unwrap().ports = ports;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .incoming
            .push_back(ReadStep::Bytes(bytes.to_vec()));
    }

    pub fn feed_read_error(&self) {
        self.state.lock().unwrap().incoming.push_back(ReadStep::Fail);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl SerialBackend for MockSerial {
    fn available_ports(&self) -> Result<Vec<Port>, BridgeError> {
        Ok(self.state.lock().unwrap().ports.clone())
    }

    fn open(&self, selected: &SelectedPort) -> Result<Box<dyn SerialLink>, BridgeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(BridgeError::OpenFailure {
                path: selected.port.path.clone(),
                reason: "device busy".into(),
            });
        }
        state.opens += 1;
        Ok(Box::new(MockLink {
            state: self.state.clone(),
        }))
    }
}

struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl SerialLink for MockLink {
    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        match self.state.lock().unwrap().incoming.front() {
            Some(ReadStep::Bytes(bytes)) => Ok(bytes.len() as u32),
            Some(ReadStep::Fail) => Ok(1),
            None => Ok(0),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.incoming.pop_front() {
            Some(ReadStep::Bytes(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    bytes.drain(..n);
                    state.incoming.push_front(ReadStep::Bytes(bytes));
                }
                Ok(n)
            }
            Some(ReadStep::Fail) => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device reported an error",
            )),
            None => Ok(0),
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closes += 1;
        }
    }
}
