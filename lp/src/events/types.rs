//! Event types for launch activity
//!
//! Everything a run exposes to the outside: attempt results, client
//! readiness for focus rotation and the location of the metrics record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events raised during a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LaunchEvent {
    /// Scheduling began for `accounts` eligible accounts
    RunStarted { run_id: String, accounts: usize },
    /// A client entered the world and stays running
    ClientReady { run_id: String, account: String },
    /// A client process went away
    ClientClosed { run_id: String, account: String },
    /// One launch attempt finished
    AttemptFinished {
        run_id: String,
        account: String,
        identity: String,
        outcome: AttemptOutcome,
    },
    /// The run's metrics record was written to `path`
    MetricsUpdated { run_id: String, path: PathBuf },
}

impl LaunchEvent {
    pub fn run_id(&self) -> &str {
        match self {
            LaunchEvent::RunStarted { run_id, .. }
            | LaunchEvent::ClientReady { run_id, .. }
            | LaunchEvent::ClientClosed { run_id, .. }
            | LaunchEvent::AttemptFinished { run_id, .. }
            | LaunchEvent::MetricsUpdated { run_id, .. } => run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LaunchEvent::RunStarted { .. } => "RunStarted",
            LaunchEvent::ClientReady { .. } => "ClientReady",
            LaunchEvent::ClientClosed { .. } => "ClientClosed",
            LaunchEvent::AttemptFinished { .. } => "AttemptFinished",
            LaunchEvent::MetricsUpdated { .. } => "MetricsUpdated",
        }
    }
}

/// How one launch attempt ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum AttemptOutcome {
    Succeeded,
    /// The attempt failed; `penalized` when the identity was blamed
    Failed { reason: String, penalized: bool },
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: LaunchEvent,
}

impl EventLogEntry {
    pub fn new(event: LaunchEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = LaunchEvent::ClientReady {
            run_id: "run-1".to_string(),
            account: "alice".to_string(),
        };
        assert_eq!(event.run_id(), "run-1");
        assert_eq!(event.event_type(), "ClientReady");
    }

    #[test]
    fn test_attempt_outcome_serialization() {
        let event = LaunchEvent::AttemptFinished {
            run_id: "run-1".to_string(),
            account: "bob".to_string(),
            identity: "vpn-de".to_string(),
            outcome: AttemptOutcome::Failed {
                reason: "Client reported login-failed".to_string(),
                penalized: true,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"AttemptFinished\""));
        assert!(json.contains("\"outcome\":\"Failed\""));

        let parsed: LaunchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_log_entry_timestamp_key() {
        let entry = EventLogEntry::new(LaunchEvent::RunStarted {
            run_id: "run-1".to_string(),
            accounts: 3,
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.starts_with("{\"ts\":"));
    }
}
