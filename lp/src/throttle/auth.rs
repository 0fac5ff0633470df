//! AuthenticationThrottle - global pacing gate around the authentication step
//!
//! Exactly one account may be between "slot taken" and "authenticated" at any
//! moment, across every identity. Once an account authenticates, the gate
//! stays shut for the active identity's cooldown before the next account may
//! start, which spaces out hits on the authentication service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Slot, SlotPermit};
use crate::domain::{Identity, LaunchMode};
use crate::error::{LaunchError, SlotKind};

/// Proof of holding the authentication slot
///
/// Consumed by [`AuthenticationThrottle::release_after_login`], so a ticket
/// can only ever be released once.
#[derive(Debug)]
pub struct AuthTicket {
    permit: SlotPermit,
    identity: Arc<Identity>,
}

#[derive(Debug)]
pub struct AuthenticationThrottle {
    slot: Slot,
    timeout: Duration,
    run_cancel: CancellationToken,
    launches: AtomicU64,
    active: RwLock<Option<Arc<Identity>>>,
}

impl AuthenticationThrottle {
    /// `run_cancel` cuts every pending paced release short when it fires
    pub fn new(timeout: Duration, run_cancel: CancellationToken) -> Self {
        debug!(timeout_secs = timeout.as_secs(), "AuthenticationThrottle::new: called");
        Self {
            slot: Slot::new(SlotKind::Auth, 1),
            timeout,
            run_cancel,
            launches: AtomicU64::new(0),
            active: RwLock::new(None),
        }
    }

    /// Take the gate for an account launched through `identity`
    pub async fn acquire(&self, identity: &Arc<Identity>, cancel: &CancellationToken) -> Result<AuthTicket, LaunchError> {
        debug!(identity = %identity.id(), "AuthenticationThrottle::acquire: called");
        let permit = self.slot.acquire(self.timeout, cancel).await?;
        let launches = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut active) = self.active.write() {
            *active = Some(identity.clone());
        }
        identity.set_attempt(Utc::now());
        debug!(identity = %identity.id(), launches, "AuthenticationThrottle::acquire: acquired");
        Ok(AuthTicket {
            permit,
            identity: identity.clone(),
        })
    }

    /// Open the gate again after the identity's cooldown
    ///
    /// Update-only runs do not authenticate against the live service and
    /// release at once.
    pub fn release_after_login(&self, ticket: AuthTicket, account: &str, mode: LaunchMode) {
        let AuthTicket { permit, identity } = ticket;
        if mode == LaunchMode::UpdateOnly {
            debug!(%account, "AuthenticationThrottle::release_after_login: update-only, releasing now");
            permit.release();
            return;
        }
        let delay = identity.cooldown(Utc::now());
        info!(
            %account,
            identity = %identity.id(),
            delay_secs = delay.as_secs(),
            "Pacing next authentication"
        );
        self.slot.release_after(permit, delay, &self.run_cancel);
    }

    /// Blame `identity` for a failed login of `account`
    pub fn login_failed(&self, identity: &Identity, account: &str, code: Option<i32>, cancel_identity: bool) {
        debug!(identity = %identity.id(), %account, cancel_identity, "AuthenticationThrottle::login_failed: called");
        identity.set_fail(account, code, Utc::now(), cancel_identity);
    }

    pub fn login_succeeded(&self, identity: &Identity, account: &str) {
        debug!(identity = %identity.id(), %account, "AuthenticationThrottle::login_succeeded: called");
        identity.clear_failure(account);
        identity.set_success(Utc::now());
    }

    /// Identity of the most recent authentication
    pub fn active(&self) -> Option<Arc<Identity>> {
        self.active.read().ok().and_then(|a| a.clone())
    }

    pub fn clear_active(&self) {
        debug!("AuthenticationThrottle::clear_active: called");
        if let Ok(mut active) = self.active.write() {
            *active = None;
        }
    }

    /// Authentications started this run
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    /// Wait for the pending paced release, if any
    pub async fn settle(&self) {
        self.slot.settle().await;
    }
}
