// src/dispatcher.rs
//
// Maps each event kind to a reaction: forwarding to the transport,
// throttling samples, and leaving requests for the worker.
//
// Reactions run inline on whichever thread published the event (usually
// the worker), so they only read the registry, write to the transport, or
// set request flags. None of them waits on the worker.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::events::{BridgeEvent, Subscriber};
use crate::registry::DeviceRegistry;
use crate::transport::{PortEntry, Transport};

/// Default minimum interval between forwarded samples.
pub const DEFAULT_SAMPLE_THROTTLE: Duration = Duration::from_secs(1);

type Reaction = fn(&Dispatcher, &DeviceRegistry);

pub struct Dispatcher {
    // Weak: the registry owns the bus that owns this subscriber
    registry: Weak<DeviceRegistry>,
    transport: Arc<dyn Transport>,
    sample_throttle: Duration,
    last_sample_sent: Mutex<Option<Instant>>,
}

impl Dispatcher {
    pub fn new(
        registry: &Arc<DeviceRegistry>,
        transport: Arc<dyn Transport>,
        sample_throttle: Duration,
    ) -> Self {
        Dispatcher {
            registry: Arc::downgrade(registry),
            transport,
            sample_throttle,
            last_sample_sent: Mutex::new(None),
        }
    }

    fn reaction(event: BridgeEvent) -> Reaction {
        match event {
            BridgeEvent::Connected => Dispatcher::on_connected,
            BridgeEvent::Disconnected => Dispatcher::on_disconnected,
            BridgeEvent::PortListChanged => Dispatcher::on_port_list_changed,
            BridgeEvent::PortSelected => Dispatcher::on_port_selected,
            BridgeEvent::SampleReady => Dispatcher::on_sample_ready,
        }
    }

    fn on_connected(&self, registry: &DeviceRegistry) {
        registry.request_scan();
    }

    fn on_disconnected(&self, registry: &DeviceRegistry) {
        registry.request_disconnect();
        registry.clear_ports();
    }

    fn on_port_list_changed(&self, registry: &DeviceRegistry) {
        if !registry.is_client_attached() {
            tlog!("[dispatcher] Client not connected, port list not sent");
            return;
        }
        let entries: Vec<PortEntry> = registry
            .ports()
            .into_iter()
            .enumerate()
            .map(|(i, p)| PortEntry {
                index: i + 1,
                name: p.name,
            })
            .collect();
        self.transport.notify_port_list(&entries);
    }

    fn on_port_selected(&self, registry: &DeviceRegistry) {
        if registry.selected().is_some() {
            registry.request_connect();
        }
    }

    fn on_sample_ready(&self, registry: &DeviceRegistry) {
        if !registry.is_client_attached() {
            return;
        }

        let now = Instant::now();
        let mut last = self.last_sample_sent.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.sample_throttle {
                return;
            }
        }

        if let Some(sample) = registry.sample() {
            self.transport.notify_sample(&sample);
            *last = Some(now);
        }
    }
}

impl Subscriber for Dispatcher {
    fn on_event(&self, event: BridgeEvent) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        Dispatcher::reaction(event)(self, &registry);
    }
}
