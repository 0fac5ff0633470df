//! Identity - one routable network identity accounts are launched through
//!
//! An identity owns its connect/disconnect lifecycle, rolling attempt
//! statistics and the cooldown derived from them. Statistics are append-only
//! logs read through a time-window filter plus atomic streak counters, so
//! concurrent launchers never contend on a long-held lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DelayPolicy;
use crate::collab::{DialStatus, Dialer};
use crate::error::{DialAction, DialError};

/// Id of the synthetic pass-through identity
pub const NO_IDENTITY: &str = "none";

/// Persisted subset of an identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,

    /// Display name; defaults to the connection name
    #[serde(default)]
    pub name: Option<String>,

    /// Name the dialer knows the connection by
    pub connection: String,

    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_fail: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_fail_account: Option<String>,

    #[serde(default)]
    pub last_fail_code: Option<i32>,
}

/// Timestamps of one connect/disconnect cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub connect_started: Option<DateTime<Utc>>,
    pub connect_finished: Option<DateTime<Utc>>,
    pub disconnect_started: Option<DateTime<Utc>>,
    pub disconnect_finished: Option<DateTime<Utc>>,
}

/// The account and code blamed for an identity's last failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub account: String,
    pub code: Option<i32>,
    pub at: DateTime<Utc>,
}

/// A network route accounts can be scheduled through
#[derive(Debug)]
pub struct Identity {
    id: String,
    name: String,
    connection: String,
    synthetic: bool,
    policy: Arc<DelayPolicy>,

    calls: RwLock<Vec<DateTime<Utc>>>,
    successes: RwLock<Vec<DateTime<Utc>>>,
    fails: RwLock<Vec<DateTime<Utc>>>,
    consecutive_fails: AtomicU32,
    consecutive_successes: AtomicU32,

    last_attempt: RwLock<Option<DateTime<Utc>>>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    last_fail: RwLock<Option<DateTime<Utc>>>,
    last_failure: RwLock<Option<FailureRecord>>,

    /// Aborts only this identity's in-flight batch
    cancel: RwLock<CancellationToken>,

    connections: RwLock<Vec<ConnectionMetrics>>,
}

fn append(log: &RwLock<Vec<DateTime<Utc>>>, at: DateTime<Utc>) {
    if let Ok(mut entries) = log.write() {
        entries.push(at);
    }
}

fn count_since(log: &RwLock<Vec<DateTime<Utc>>>, since: DateTime<Utc>) -> u32 {
    log.read()
        .map(|entries| entries.iter().filter(|t| **t >= since).count() as u32)
        .unwrap_or(0)
}

fn set_latest(slot: &RwLock<Option<DateTime<Utc>>>, at: DateTime<Utc>) {
    if let Ok(mut latest) = slot.write() {
        *latest = Some(latest.map_or(at, |prev| prev.max(at)));
    }
}

fn window_start(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Identity {
    /// A real identity reached through the dialer
    pub fn new(id: impl Into<String>, connection: impl Into<String>, policy: Arc<DelayPolicy>) -> Self {
        let id = id.into();
        let connection = connection.into();
        debug!(%id, %connection, "Identity::new: called");
        Self::build(id, connection.clone(), connection, false, policy)
    }

    /// The pass-through bucket for accounts without a route
    pub fn synthetic(policy: Arc<DelayPolicy>) -> Self {
        debug!("Identity::synthetic: called");
        Self::build(
            NO_IDENTITY.to_string(),
            "no identity".to_string(),
            String::new(),
            true,
            policy,
        )
    }

    pub fn from_record(record: &IdentityRecord, policy: Arc<DelayPolicy>) -> Self {
        debug!(id = %record.id, "Identity::from_record: called");
        let name = record.name.clone().unwrap_or_else(|| record.connection.clone());
        let identity = Self::build(
            record.id.clone(),
            name,
            record.connection.clone(),
            record.id == NO_IDENTITY,
            policy,
        );
        if let Ok(mut slot) = identity.last_success.write() {
            *slot = record.last_success;
        }
        if let Ok(mut slot) = identity.last_fail.write() {
            *slot = record.last_fail;
        }
        if let (Some(account), Some(at)) = (&record.last_fail_account, record.last_fail)
            && let Ok(mut slot) = identity.last_failure.write()
        {
            *slot = Some(FailureRecord {
                account: account.clone(),
                code: record.last_fail_code,
                at,
            });
        }
        identity
    }

    fn build(id: String, name: String, connection: String, synthetic: bool, policy: Arc<DelayPolicy>) -> Self {
        Self {
            id,
            name,
            connection,
            synthetic,
            policy,
            calls: RwLock::new(Vec::new()),
            successes: RwLock::new(Vec::new()),
            fails: RwLock::new(Vec::new()),
            consecutive_fails: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_attempt: RwLock::new(None),
            last_success: RwLock::new(None),
            last_fail: RwLock::new(None),
            last_failure: RwLock::new(None),
            cancel: RwLock::new(CancellationToken::new()),
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn to_record(&self) -> IdentityRecord {
        let failure = self.last_failure();
        IdentityRecord {
            id: self.id.clone(),
            name: (self.name != self.connection).then(|| self.name.clone()),
            connection: self.connection.clone(),
            last_success: self.last_success(),
            last_fail: self.last_fail(),
            last_fail_account: failure.as_ref().map(|f| f.account.clone()),
            last_fail_code: failure.and_then(|f| f.code),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn policy(&self) -> &DelayPolicy {
        &self.policy
    }

    // === Scheduling ===

    /// Attempts inside the band window ending at `now`
    pub fn call_count(&self, now: DateTime<Utc>) -> u32 {
        count_since(&self.calls, window_start(now, self.policy.call_window()))
    }

    /// Attempts inside the (shorter) priority window ending at `now`
    pub fn recent_calls(&self, now: DateTime<Utc>) -> u32 {
        count_since(&self.calls, window_start(now, self.policy.priority_window()))
    }

    pub fn success_count(&self, since: DateTime<Utc>) -> u32 {
        count_since(&self.successes, since)
    }

    pub fn fail_count(&self, since: DateTime<Utc>) -> u32 {
        count_since(&self.fails, since)
    }

    pub fn consecutive_fails(&self) -> u32 {
        self.consecutive_fails.load(Ordering::SeqCst)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::SeqCst)
    }

    /// Cooldown that applies after the most recent attempt
    pub fn cooldown(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.policy.delay(self.call_count(now), self.consecutive_fails())
    }

    /// Earliest time this identity may be used again; never before `now`
    pub fn available(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(last) = self.last_attempt() else {
            return now;
        };
        let delay = chrono::Duration::from_std(self.cooldown(now)).unwrap_or(chrono::Duration::MAX);
        let next = last.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(id = %self.id, %last, %next, "Identity::available: computed");
        next.max(now)
    }

    /// Higher is better: real, idle, under-filled identities win
    pub fn priority(&self, accounts_in_group: usize, max_accounts: usize, now: DateTime<Utc>) -> i64 {
        let max = max_accounts as i64;
        let free = (max - accounts_in_group as i64).max(0);
        let real_bonus = if self.synthetic { 0 } else { max };
        (free + real_bonus) * max - i64::from(self.recent_calls(now))
    }

    // === Statistics ===

    pub fn set_attempt(&self, at: DateTime<Utc>) {
        debug!(id = %self.id, %at, "Identity::set_attempt: called");
        append(&self.calls, at);
        set_latest(&self.last_attempt, at);
    }

    pub fn set_success(&self, at: DateTime<Utc>) {
        debug!(id = %self.id, %at, "Identity::set_success: called");
        append(&self.successes, at);
        set_latest(&self.last_success, at);
        self.consecutive_successes.fetch_add(1, Ordering::SeqCst);
        self.consecutive_fails.store(0, Ordering::SeqCst);
    }

    /// Record a failure blamed on `account`; optionally abort the current batch
    pub fn set_fail(&self, account: &str, code: Option<i32>, at: DateTime<Utc>, cancel_batch: bool) {
        debug!(id = %self.id, %account, ?code, cancel_batch, "Identity::set_fail: called");
        append(&self.fails, at);
        set_latest(&self.last_fail, at);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        let streak = self.consecutive_fails.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut failure) = self.last_failure.write() {
            *failure = Some(FailureRecord {
                account: account.to_string(),
                code,
                at,
            });
        }
        warn!(id = %self.id, %account, streak, "Identity failure recorded");
        if cancel_batch {
            info!(id = %self.id, "Cancelling in-flight batch for identity");
            self.batch_token().cancel();
        }
    }

    /// Forget the failure blamed on `account`, if it is the latest one
    pub fn clear_failure(&self, account: &str) {
        if let Ok(mut failure) = self.last_failure.write()
            && failure.as_ref().is_some_and(|f| f.account == account)
        {
            debug!(id = %self.id, %account, "Identity::clear_failure: cleared");
            *failure = None;
        }
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt.read().ok().and_then(|t| *t)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success.read().ok().and_then(|t| *t)
    }

    pub fn last_fail(&self) -> Option<DateTime<Utc>> {
        self.last_fail.read().ok().and_then(|t| *t)
    }

    pub fn last_failure(&self) -> Option<FailureRecord> {
        self.last_failure.read().ok().and_then(|f| f.clone())
    }

    // === Cancellation ===

    /// Arm a fresh batch token that also fires when `run` is cancelled
    pub fn begin_batch(&self, run: &CancellationToken) -> CancellationToken {
        debug!(id = %self.id, "Identity::begin_batch: called");
        let token = run.child_token();
        if let Ok(mut cancel) = self.cancel.write() {
            *cancel = token.clone();
        }
        token
    }

    pub fn batch_token(&self) -> CancellationToken {
        self.cancel
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|_| CancellationToken::new())
    }

    // === Connection ===

    pub async fn connect(&self, dialer: &dyn Dialer) -> Result<(), DialError> {
        debug!(id = %self.id, connection = %self.connection, "Identity::connect: called");
        if self.synthetic {
            return Ok(());
        }
        let started = Utc::now();
        let status = dialer.dial(&self.connection).await;
        self.check(DialAction::Connect, status)?;
        let finished = Utc::now();
        if let Ok(mut connections) = self.connections.write() {
            connections.push(ConnectionMetrics {
                connect_started: Some(started),
                connect_finished: Some(finished),
                ..Default::default()
            });
        }
        info!(id = %self.id, connection = %self.connection, "Identity connected");
        Ok(())
    }

    pub async fn disconnect(&self, dialer: &dyn Dialer) -> Result<(), DialError> {
        debug!(id = %self.id, connection = %self.connection, "Identity::disconnect: called");
        if self.synthetic {
            return Ok(());
        }
        let started = Utc::now();
        let status = dialer.hang_up(&self.connection).await;
        self.check(DialAction::Disconnect, status)?;
        let finished = Utc::now();
        if let Ok(mut connections) = self.connections.write() {
            match connections.last_mut() {
                Some(entry) if entry.disconnect_started.is_none() => {
                    entry.disconnect_started = Some(started);
                    entry.disconnect_finished = Some(finished);
                }
                _ => connections.push(ConnectionMetrics {
                    disconnect_started: Some(started),
                    disconnect_finished: Some(finished),
                    ..Default::default()
                }),
            }
        }
        info!(id = %self.id, connection = %self.connection, "Identity disconnected");
        Ok(())
    }

    fn check(&self, action: DialAction, status: DialStatus) -> Result<(), DialError> {
        match status.exit_code {
            None => Err(DialError::NotStarted {
                action,
                connection: self.connection.clone(),
            }),
            Some(0) => Ok(()),
            Some(code) => Err(DialError::ExitCode {
                action,
                connection: self.connection.clone(),
                code,
            }),
        }
    }

    pub fn connections(&self) -> Vec<ConnectionMetrics> {
        self.connections.read().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}
