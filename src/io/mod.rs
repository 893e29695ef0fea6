// src/io/mod.rs
//
// Device I/O for the bridge.
// The acquisition worker talks to hardware only through the two traits
// below, so it can be driven by the system serial ports or by a scripted
// backend in tests.

pub mod serial;

pub use serial::framer::{ByteBuffer, Frame, TelemetryReading, TelemetrySample};
pub use serial::reader::{ConnectionState, ConnectionStateMachine, SerialWorker, WorkerConfig};
pub use serial::utils::{LineSettings, Parity};

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

use crate::error::BridgeError;

// ============================================================================
// Shared Types
// ============================================================================

/// A serial device seen by discovery.
/// Identity is the device path; the name is for display only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub path: String,
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Port {}

impl Port {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Port {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Whether a client-supplied key names this port (by name or path).
    pub fn matches(&self, key: &str) -> bool {
        self.path == key || self.name == key
    }
}

/// The port chosen for connection, with the baud rate to open it at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedPort {
    pub port: Port,
    pub baud_rate: u32,
}

// ============================================================================
// Backend Traits
// ============================================================================

/// An open serial handle. Reads never block for long: callers check
/// `bytes_to_read` first and only read what is already there.
pub trait SerialLink: Send {
    fn bytes_to_read(&mut self) -> std::io::Result<u32>;
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Source of serial devices: enumeration and opening.
pub trait SerialBackend: Send {
    fn available_ports(&self) -> Result<Vec<Port>, BridgeError>;
    fn open(&self, selected: &SelectedPort) -> Result<Box<dyn SerialLink>, BridgeError>;
}

// ============================================================================
// System Backend (serialport crate)
// ============================================================================

/// Real serial ports via the `serialport` crate.
pub struct SystemSerial {
    line: LineSettings,
}

impl SystemSerial {
    pub fn new(line: LineSettings) -> Self {
        SystemSerial { line }
    }
}

impl SerialBackend for SystemSerial {
    fn available_ports(&self) -> Result<Vec<Port>, BridgeError> {
        serial::utils::list_ports()
    }

    fn open(&self, selected: &SelectedPort) -> Result<Box<dyn SerialLink>, BridgeError> {
        // Minimal timeout: the worker only reads bytes it knows are waiting
        let port = serialport::new(&selected.port.path, selected.baud_rate)
            .data_bits(serial::utils::to_serialport_data_bits(self.line.data_bits))
            .stop_bits(serial::utils::to_serialport_stop_bits(self.line.stop_bits))
            .parity(serial::utils::to_serialport_parity(&self.line.parity))
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| BridgeError::OpenFailure {
                path: selected.port.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SystemLink { port }))
    }
}

struct SystemLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SystemLink {
    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        self.port.bytes_to_read().map_err(std::io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}
