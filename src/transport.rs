// src/transport.rs
//
// The bridge's edge towards real-time clients.
//
// Outbound: `Transport` is the notification interface the dispatcher calls.
// Inbound: `ClientCommands` turns client actions into registry updates and
// events. `JsonLinesTransport` is a line-oriented implementation used by the
// command-line binary: events out as JSON, commands in as plain text.

use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::io::{TelemetryReading, TelemetrySample};
use crate::registry::DeviceRegistry;

// ============================================================================
// Notification Interface
// ============================================================================

/// One row of the port list sent to clients. Indices start at 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub index: usize,
    pub name: String,
}

/// Fire-and-forget delivery towards attached clients.
pub trait Transport: Send + Sync {
    fn notify_port_list(&self, ports: &[PortEntry]);
    fn notify_sample(&self, sample: &TelemetrySample);
}

// ============================================================================
// Command Interface
// ============================================================================

/// A command received from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Attach,
    Detach,
    Select(String),
    Scan,
    Quit,
}

/// Parse one command line: `attach`, `detach`, `select <name>`, `scan`, `quit`.
pub fn parse_command(line: &str) -> Option<ClientCommand> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb.to_ascii_lowercase().as_str() {
        "attach" => Some(ClientCommand::Attach),
        "detach" => Some(ClientCommand::Detach),
        "select" if !rest.is_empty() => Some(ClientCommand::Select(rest.to_string())),
        "scan" => Some(ClientCommand::Scan),
        "quit" | "exit" => Some(ClientCommand::Quit),
        _ => None,
    }
}

/// Entry points for the transport side: client presence and port selection.
#[derive(Clone)]
pub struct ClientCommands {
    registry: Arc<DeviceRegistry>,
    baud_rate: u32,
}

impl ClientCommands {
    pub fn new(registry: Arc<DeviceRegistry>, baud_rate: u32) -> Self {
        ClientCommands {
            registry,
            baud_rate,
        }
    }

    pub fn on_client_attached(&self) {
        tlog!("[client] Attached");
        self.registry.set_client_attached(true);
        self.registry.bus().publish(BridgeEvent::Connected);
    }

    pub fn on_client_detached(&self) {
        tlog!("[client] Detached");
        self.registry.set_client_attached(false);
        self.registry.bus().publish(BridgeEvent::Disconnected);
    }

    /// Select a port by name or path at the configured baud rate.
    /// The registry publishes `PortSelected` on success.
    pub fn on_select_port(&self, name: &str) -> Result<(), BridgeError> {
        self.registry.select_port(name, self.baud_rate)
    }

    /// Apply a parsed command. `Quit` is left to the caller.
    pub fn apply(&self, command: ClientCommand) -> Result<(), BridgeError> {
        match command {
            ClientCommand::Attach => self.on_client_attached(),
            ClientCommand::Detach => self.on_client_detached(),
            ClientCommand::Select(name) => self.on_select_port(&name)?,
            ClientCommand::Scan => self.registry.request_scan(),
            ClientCommand::Quit => {}
        }
        Ok(())
    }
}

// ============================================================================
// JSON Lines Transport
// ============================================================================

/// Outbound message, tagged with the event names clients listen for.
#[derive(Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum Outbound<'a> {
    NewPort(&'a [PortEntry]),
    SerialData(SamplePayload<'a>),
}

/// Typed values when every field converts, raw strings otherwise.
#[derive(Serialize)]
#[serde(untagged)]
enum SamplePayload<'a> {
    Typed(TelemetryReading),
    Raw(&'a TelemetrySample),
}

/// Writes one JSON object per line to any writer (stdout in the binary).
pub struct JsonLinesTransport<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesTransport<W> {
    pub fn new(out: W) -> Self {
        JsonLinesTransport {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|p| p.into_inner())
    }

    fn send(&self, message: &Outbound<'_>) {
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                tlog!("[stdio] Failed to encode message: {}", e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tlog!("[stdio] Failed to write message: {}", e);
        }
    }
}

impl<W: Write + Send> Transport for JsonLinesTransport<W> {
    fn notify_port_list(&self, ports: &[PortEntry]) {
        self.send(&Outbound::NewPort(ports));
    }

    fn notify_sample(&self, sample: &TelemetrySample) {
        let payload = match sample.reading() {
            Some(reading) => SamplePayload::Typed(reading),
            None => SamplePayload::Raw(sample),
        };
        self.send(&Outbound::SerialData(payload));
    }
}
