//! Window-focus rotation across running clients
//!
//! Clients that entered the world queue up in arrival order. One of them is
//! active and holds the foreground; when it closes, focus moves to the next
//! ready client, or to none.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collab::ClientHost;
use crate::events::{EventBus, LaunchEvent};

#[derive(Debug, Default)]
pub struct FocusRotation {
    ready: Vec<String>,
    active: Option<String>,
}

impl FocusRotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn ready(&self) -> &[String] {
        &self.ready
    }

    /// Queue a ready client; returns the account to focus when it becomes active
    pub fn client_ready(&mut self, account: &str) -> Option<String> {
        debug!(%account, "FocusRotation::client_ready: called");
        if !self.ready.iter().any(|a| a == account) {
            self.ready.push(account.to_string());
        }
        if self.active.is_none() {
            self.active = Some(account.to_string());
            return self.active.clone();
        }
        None
    }

    /// Drop a closed client; returns the account to focus if focus moved to one
    pub fn client_closed(&mut self, account: &str) -> Option<String> {
        debug!(%account, "FocusRotation::client_closed: called");
        let Some(position) = self.ready.iter().position(|a| a == account) else {
            return None;
        };
        self.ready.remove(position);
        if self.active.as_deref() != Some(account) {
            return None;
        }
        self.active = if self.ready.is_empty() {
            None
        } else {
            Some(self.ready[position % self.ready.len()].clone())
        };
        self.active.clone()
    }

    /// Follow the bus until `cancel` fires or the bus closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<LaunchEvent>, host: Arc<dyn ClientHost>, cancel: CancellationToken) {
        debug!("FocusRotation::run: started");
        loop {
            // Queued events are handled before honouring cancellation
            let event = tokio::select! {
                biased;
                event = rx.recv() => event,
                _ = cancel.cancelled() => break,
            };
            let focus = match event {
                Ok(LaunchEvent::ClientReady { account, .. }) => self.client_ready(&account),
                Ok(LaunchEvent::ClientClosed { account, .. }) => self.client_closed(&account),
                Ok(_) => None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "FocusRotation: lagged behind, missed events");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if let Some(account) = focus
                && let Err(e) = host.focus(&account).await
            {
                warn!(%account, error = %e, "Failed to focus client");
            }
        }
        debug!("FocusRotation::run: stopped");
    }
}

/// Subscribe now and rotate focus in the background
pub fn spawn_focus_rotation(bus: &EventBus, host: Arc<dyn ClientHost>, cancel: CancellationToken) -> JoinHandle<()> {
    let rx = bus.subscribe();
    tokio::spawn(FocusRotation::new().run(rx, host, cancel))
}
