//! Event Bus - broadcast pub/sub for launch events
//!
//! The EventBus uses a tokio broadcast channel. Launchers and the orchestrator
//! emit; focus rotation, the event logger and callers of `run` subscribe.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{AttemptOutcome, LaunchEvent};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct EventBus {
    tx: broadcast::Sender<LaunchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped; a full channel drops the
    /// oldest events for lagging receivers.
    pub fn emit(&self, event: LaunchEvent) {
        debug!(event_type = event.event_type(), run_id = event.run_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LaunchEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Emitter bound to one run
    pub fn emitter_for(&self, run_id: impl Into<String>) -> EventEmitter {
        let run_id = run_id.into();
        debug!(%run_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap handle for emitting a run's events without owning the bus
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<LaunchEvent>,
    run_id: String,
}

impl EventEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: LaunchEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn run_started(&self, accounts: usize) {
        self.emit(LaunchEvent::RunStarted {
            run_id: self.run_id.clone(),
            accounts,
        });
    }

    pub fn client_ready(&self, account: &str) {
        self.emit(LaunchEvent::ClientReady {
            run_id: self.run_id.clone(),
            account: account.to_string(),
        });
    }

    pub fn client_closed(&self, account: &str) {
        self.emit(LaunchEvent::ClientClosed {
            run_id: self.run_id.clone(),
            account: account.to_string(),
        });
    }

    pub fn attempt_finished(&self, account: &str, identity: &str, outcome: AttemptOutcome) {
        self.emit(LaunchEvent::AttemptFinished {
            run_id: self.run_id.clone(),
            account: account.to_string(),
            identity: identity.to_string(),
            outcome,
        });
    }

    pub fn metrics_updated(&self, path: PathBuf) {
        self.emit(LaunchEvent::MetricsUpdated {
            run_id: self.run_id.clone(),
            path,
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
