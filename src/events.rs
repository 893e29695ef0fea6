// src/events.rs
//
// Publish/subscribe layer between the acquisition worker and its consumers.
//
// Delivery is synchronous: `publish` runs every subscriber's handler on the
// caller's thread, in subscription order, before returning. A publish made
// from inside a worker tick therefore runs subscriber code on the worker
// thread. Handlers must be quick, must not block, and must only ever request
// worker transitions (never wait for them).

use std::sync::{Arc, RwLock};

/// Things that happened. Events carry no payload; subscribers read the
/// current state from the `DeviceRegistry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BridgeEvent {
    /// A client attached to the transport.
    Connected,
    /// The client detached.
    Disconnected,
    /// Discovery found ports that were not known before.
    PortListChanged,
    /// A known port was selected.
    PortSelected,
    /// A new telemetry sample was stored.
    SampleReady,
}

/// Anything that wants to hear about [`BridgeEvent`]s.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: BridgeEvent);
}

impl<F> Subscriber for F
where
    F: Fn(BridgeEvent) + Send + Sync,
{
    fn on_event(&self, event: BridgeEvent) {
        self(event)
    }
}

/// Ordered, append-only list of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        match self.subscribers.write() {
            Ok(mut subs) => subs.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    /// Deliver `event` to every subscriber in registration order.
    pub fn publish(&self, event: BridgeEvent) {
        // Snapshot so handlers may subscribe or publish without deadlocking
        let subs: Vec<Arc<dyn Subscriber>> = match self.subscribers.read() {
            Ok(subs) => subs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for sub in subs {
            sub.on_event(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}
