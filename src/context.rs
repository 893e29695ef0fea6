// src/context.rs
//
// Wiring for one bridge instance: settings, the event bus, the registry,
// and helpers that hook up a transport and start the worker.
// Everything is passed explicitly; there is no process-wide state besides
// the log file.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::events::EventBus;
use crate::io::{ConnectionStateMachine, SerialBackend, SerialWorker, WorkerConfig};
use crate::registry::DeviceRegistry;
use crate::settings::BridgeSettings;
use crate::transport::{ClientCommands, Transport};

pub struct BridgeContext {
    pub settings: BridgeSettings,
    pub bus: Arc<EventBus>,
    pub registry: Arc<DeviceRegistry>,
}

impl BridgeContext {
    pub fn new(settings: BridgeSettings) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(DeviceRegistry::new(bus.clone()));
        BridgeContext {
            settings,
            bus,
            registry,
        }
    }

    /// Command entry points for the transport, using the configured baud rate.
    pub fn commands(&self) -> ClientCommands {
        ClientCommands::new(self.registry.clone(), self.settings.baud_rate)
    }

    /// Subscribe a dispatcher that forwards to `transport`.
    pub fn attach_dispatcher(&self, transport: Arc<dyn Transport>) {
        let dispatcher = Dispatcher::new(
            &self.registry,
            transport,
            self.settings.sample_throttle(),
        );
        self.bus.subscribe(Arc::new(dispatcher));
    }

    pub fn state_machine(&self, backend: Box<dyn SerialBackend>) -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            backend,
            self.registry.clone(),
            WorkerConfig::from_settings(&self.settings),
        )
    }

    pub fn start_worker(&self, backend: Box<dyn SerialBackend>) -> Result<SerialWorker, BridgeError> {
        SerialWorker::start(self.state_machine(backend))
    }
}
