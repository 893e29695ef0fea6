// src/registry.rs
//
// Device registry: the set of visible ports, the current selection, the
// latest telemetry sample, and the presence flags read by the dispatcher.
//
// This is also where callers leave requests for the worker (scan, connect,
// disconnect). The worker picks them up on its next tick; nothing here ever
// changes the connection state directly.
//
// Events are published after the internal lock is released, so subscribers
// are free to read the registry from their handlers.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventBus};
use crate::io::{Port, SelectedPort, TelemetrySample};

/// Transitions requested of the worker since its last tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingRequests {
    pub scan: bool,
    pub connect: bool,
    pub disconnect: bool,
}

impl PendingRequests {
    pub fn is_empty(&self) -> bool {
        !(self.scan || self.connect || self.disconnect)
    }
}

#[derive(Default)]
struct RegistryState {
    ports: Vec<Port>,
    selected: Option<SelectedPort>,
    sample: Option<TelemetrySample>,
    client_attached: bool,
    port_open: bool,
    requests: PendingRequests,
}

pub struct DeviceRegistry {
    bus: Arc<EventBus>,
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        DeviceRegistry {
            bus,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ------------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------------

    /// Replace the known ports with the latest discovery result.
    ///
    /// Publishes `PortListChanged` only when the incoming list contains a
    /// port that was not known before; returns whether it did. Duplicates
    /// (same path) are dropped. A selection whose port disappeared is cleared.
    pub fn set_port_list(&self, ports: &[Port]) -> bool {
        let added = {
            let mut state = self.lock();

            let mut incoming: Vec<Port> = Vec::with_capacity(ports.len());
            for port in ports {
                if !incoming.contains(port) {
                    incoming.push(port.clone());
                }
            }

            let new_paths: Vec<String> = incoming
                .iter()
                .filter(|p| !state.ports.contains(p))
                .map(|p| p.path.clone())
                .collect();
            if !new_paths.is_empty() {
                tlog!("[registry] New ports: {}", new_paths.join(", "));
            }

            let selection_gone = state
                .selected
                .as_ref()
                .map_or(false, |sel| !incoming.contains(&sel.port));
            if selection_gone {
                tlog!("[registry] Selected port is gone, clearing selection");
                state.selected = None;
            }

            state.ports = incoming;
            !new_paths.is_empty()
        };

        if added {
            self.bus.publish(BridgeEvent::PortListChanged);
        }
        added
    }

    /// Publish `PortListChanged` for the current list, changed or not.
    pub fn announce_port_list(&self) {
        self.bus.publish(BridgeEvent::PortListChanged);
    }

    /// Forget every known port and the selection. Publishes nothing.
    pub fn clear_ports(&self) {
        let mut state = self.lock();
        state.ports.clear();
        state.selected = None;
    }

    pub fn ports(&self) -> Vec<Port> {
        self.lock().ports.clone()
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Select a known port by name or path.
    /// Unknown ports are rejected: no state change and no event.
    pub fn select_port(&self, key: &str, baud_rate: u32) -> Result<(), BridgeError> {
        {
            let mut state = self.lock();
            let port = state
                .ports
                .iter()
                .find(|p| p.matches(key))
                .cloned()
                .ok_or_else(|| BridgeError::InvalidSelection(key.to_string()))?;
            tlog!("[registry] Selected {} at {} baud", port.path, baud_rate);
            state.selected = Some(SelectedPort { port, baud_rate });
        }
        self.bus.publish(BridgeEvent::PortSelected);
        Ok(())
    }

    pub fn selected(&self) -> Option<SelectedPort> {
        self.lock().selected.clone()
    }

    // ------------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------------

    /// Store a sample and publish `SampleReady`, even if it equals the last one.
    pub fn set_sample(&self, sample: TelemetrySample) {
        self.lock().sample = Some(sample);
        self.bus.publish(BridgeEvent::SampleReady);
    }

    pub fn sample(&self) -> Option<TelemetrySample> {
        self.lock().sample.clone()
    }

    // ------------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------------

    pub fn set_client_attached(&self, attached: bool) {
        self.lock().client_attached = attached;
    }

    pub fn is_client_attached(&self) -> bool {
        self.lock().client_attached
    }

    pub fn set_port_open(&self, open: bool) {
        self.lock().port_open = open;
    }

    pub fn is_port_open(&self) -> bool {
        self.lock().port_open
    }

    // ------------------------------------------------------------------------
    // Worker requests
    // ------------------------------------------------------------------------

    pub fn request_scan(&self) {
        self.lock().requests.scan = true;
    }

    pub fn request_connect(&self) {
        self.lock().requests.connect = true;
    }

    pub fn request_disconnect(&self) {
        self.lock().requests.disconnect = true;
    }

    /// Hand all pending requests to the worker and reset them.
    pub fn take_requests(&self) -> PendingRequests {
        std::mem::take(&mut self.lock().requests)
    }
}
