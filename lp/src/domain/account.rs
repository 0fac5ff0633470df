//! Account domain type

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::LaunchMode;

/// An account shared between the orchestrator and its launcher during a run
pub type SharedAccount = Arc<Mutex<Account>>;

/// One login the launcher can drive through the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account name
    pub name: String,

    /// Set once the account completed this run
    #[serde(default)]
    pub done: bool,

    /// Launch attempts ever started for this account
    #[serde(default)]
    pub attempts: u32,

    /// Successful logins ever recorded
    #[serde(default)]
    pub logins: u32,

    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_collection: Option<DateTime<Utc>>,

    /// Why the most recent attempt failed
    #[serde(default)]
    pub last_error: Option<String>,

    /// Identity ids this account may be launched through, in preference order
    #[serde(default)]
    pub identities: Vec<String>,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style membership
    pub fn with_identities<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identities = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn shared(self) -> SharedAccount {
        Arc::new(Mutex::new(self))
    }

    /// Mark the account finished; returns false if it already was
    pub fn mark_done(&mut self) -> bool {
        debug!(account = %self.name, done = self.done, "Account::mark_done: called");
        if self.done {
            return false;
        }
        self.done = true;
        self.last_error = None;
        true
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(account = %self.name, %reason, "Account::mark_failed: called");
        self.last_error = Some(reason);
    }

    /// Bookkeeping after the client left the world cleanly
    pub fn record_completion(&mut self, mode: LaunchMode, at: DateTime<Utc>) {
        debug!(account = %self.name, %mode, "Account::record_completion: called");
        match mode {
            LaunchMode::LoginOnly => {
                self.logins += 1;
                self.last_login = Some(at);
            }
            LaunchMode::Collect => {
                self.last_collection = Some(at);
            }
            LaunchMode::UpdateOnly => {}
        }
    }
}
