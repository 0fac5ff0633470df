//! Counting slot with timeout-bounded acquisition and tracked delayed release
//!
//! A slot hands out RAII permits. Dropping a permit releases it immediately;
//! `release_after` instead moves the permit into a single timer task that
//! releases it once the delay elapses (or at once when cancelled). Timer tasks
//! are kept so the owner can wait for them to settle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{LaunchError, SlotKind};

/// A bounded pool of identical permits
#[derive(Debug)]
pub struct Slot {
    kind: SlotKind,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    opened: AtomicBool,
    holders: Arc<AtomicUsize>,
    peak_holders: Arc<AtomicUsize>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// One held permit; released on drop
#[derive(Debug)]
pub struct SlotPermit {
    kind: SlotKind,
    permit: Option<OwnedSemaphorePermit>,
    holders: Arc<AtomicUsize>,
}

impl SlotPermit {
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Give the permit back now
    pub fn release(self) {
        debug!(slot = %self.kind, "SlotPermit::release: called");
        drop(self);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.holders.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Slot {
    /// A slot with all `capacity` permits available
    pub fn new(kind: SlotKind, capacity: usize) -> Self {
        let slot = Self::closed(kind, capacity);
        slot.open();
        slot
    }

    /// A slot with no permits until [`Slot::open`] is called
    pub fn closed(kind: SlotKind, capacity: usize) -> Self {
        debug!(%kind, capacity, "Slot::closed: called");
        Self {
            kind,
            capacity,
            semaphore: Arc::new(Semaphore::new(0)),
            opened: AtomicBool::new(false),
            holders: Arc::new(AtomicUsize::new(0)),
            peak_holders: Arc::new(AtomicUsize::new(0)),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Release the full capacity for the first time; later calls do nothing
    pub fn open(&self) -> bool {
        if self.opened.swap(true, Ordering::SeqCst) {
            debug!(slot = %self.kind, "Slot::open: already open");
            return false;
        }
        debug!(slot = %self.kind, capacity = self.capacity, "Slot::open: releasing permits");
        self.semaphore.add_permits(self.capacity);
        true
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held, including those waiting on a delayed release
    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    /// Most permits ever held at the same time
    pub fn peak_holders(&self) -> usize {
        self.peak_holders.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for a permit; cancellation wins over a free permit
    pub async fn acquire(&self, timeout: Duration, cancel: &CancellationToken) -> Result<SlotPermit, LaunchError> {
        debug!(slot = %self.kind, timeout_ms = timeout.as_millis() as u64, "Slot::acquire: called");
        let acquire = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(slot = %self.kind, "Slot::acquire: cancelled");
                Err(LaunchError::Cancelled)
            }
            result = acquire => match result {
                Err(_) => {
                    debug!(slot = %self.kind, "Slot::acquire: timed out");
                    Err(LaunchError::SlotTimeout { slot: self.kind, waited: timeout })
                }
                Ok(Err(_)) => Err(LaunchError::Cancelled),
                Ok(Ok(permit)) => {
                    let held = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
                    self.peak_holders.fetch_max(held, Ordering::SeqCst);
                    debug!(slot = %self.kind, held, "Slot::acquire: acquired");
                    Ok(SlotPermit {
                        kind: self.kind,
                        permit: Some(permit),
                        holders: self.holders.clone(),
                    })
                }
            }
        }
    }

    /// Release `permit` after `delay` from a tracked timer task
    ///
    /// Cancelling `cancel` releases early. A binary slot can only ever have
    /// one timer outstanding; a second one is logged as an invariant breach.
    pub fn release_after(&self, permit: SlotPermit, delay: Duration, cancel: &CancellationToken) {
        debug!(slot = %self.kind, delay_ms = delay.as_millis() as u64, "Slot::release_after: called");
        if delay.is_zero() {
            permit.release();
            return;
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|handle| !handle.is_finished());
        if self.capacity == 1 && !pending.is_empty() {
            error!(slot = %self.kind, outstanding = pending.len(), "Delayed release requested while one is pending");
        }

        let cancel = cancel.clone();
        let kind = self.kind;
        pending.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    debug!(slot = %kind, "Slot::release_after: cancelled, releasing early");
                }
            }
            permit.release();
        }));
    }

    /// Whether a delayed release is still waiting to fire
    pub fn has_pending_release(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.iter().any(|handle| !handle.is_finished())
    }

    /// Wait for every outstanding delayed release to complete
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        debug!(slot = %self.kind, count = handles.len(), "Slot::settle: waiting");
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(slot = %self.kind, error = %e, "Delayed release task failed");
            }
        }
    }
}
