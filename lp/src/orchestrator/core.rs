//! LaunchOrchestrator - the top-level scheduling loop
//!
//! Each round regroups the remaining accounts by identity and runs the
//! batches one identity at a time: wait out the identity's cooldown, connect,
//! launch every account of the batch concurrently, disconnect. The first
//! launched batch of a run gets a one-time stagger before the login and exe
//! slots open. Whatever happens, cleanup runs exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::PathBuf;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::focus::spawn_focus_rotation;
use super::metrics::RunMetrics;
use crate::collab::{ClientHost, CredentialStager, Dialer};
use crate::config::Config;
use crate::domain::{Account, DelayPolicy, Identity, SharedAccount};
use crate::events::{EventBus, EventEmitter};
use crate::grouping::{LaunchBatch, accounts_by_identity, order_batches};
use crate::lifecycle::{LaunchContext, Launcher};

/// The external systems a run drives
#[derive(Clone)]
pub struct Collaborators {
    pub dialer: Arc<dyn Dialer>,
    pub stager: Arc<dyn CredentialStager>,
    pub host: Arc<dyn ClientHost>,
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// Accounts done at the end of the run
    pub completed: Vec<String>,
    /// Attempted this run but still not done
    pub failed: Vec<String>,
    /// Never attempted this run
    pub skipped: Vec<String>,
    /// Identities retired after repeated connect failures
    pub retired: Vec<String>,
    pub batches: usize,
    pub connect_failures: usize,
    pub cancelled: bool,
    pub metrics_path: Option<PathBuf>,
}

enum BatchOutcome {
    Launched,
    ConnectFailed,
    Cancelled,
}

/// Per-run scheduling state
#[derive(Default)]
struct RunState {
    attempts: HashMap<String, u32>,
    connect_failures: HashMap<String, u32>,
    retired: HashSet<String>,
    first_batch: bool,
}

pub struct LaunchOrchestrator {
    config: Config,
    identities: Vec<Arc<Identity>>,
    synthetic: Arc<Identity>,
    dialer: Arc<dyn Dialer>,
    ctx: Arc<LaunchContext>,
    bus: Arc<EventBus>,
    events: EventEmitter,
    run_id: String,
    cancel: CancellationToken,
    cleaned_up: AtomicBool,
}

impl LaunchOrchestrator {
    pub fn new(config: Config, identities: Vec<Arc<Identity>>, collab: Collaborators, bus: Arc<EventBus>) -> Self {
        let run_id = uuid::Uuid::now_v7().to_string();
        debug!(%run_id, identities = identities.len(), "LaunchOrchestrator::new: called");
        let cancel = CancellationToken::new();
        let events = bus.emitter_for(&run_id);
        let synthetic = Arc::new(Identity::synthetic(Arc::new(DelayPolicy::from_config(&config.throttle))));
        let ctx = Arc::new(LaunchContext::new(
            &config,
            collab.stager,
            collab.host,
            events.clone(),
            cancel.clone(),
        ));
        Self {
            config,
            identities,
            synthetic,
            dialer: collab.dialer,
            ctx,
            bus,
            events,
            run_id,
            cancel,
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Token that stops the run; cancel it from a signal handler
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn identities(&self) -> &[Arc<Identity>] {
        &self.identities
    }

    /// Launch accounts until none is left to do or the run is cancelled
    ///
    /// Never fails: every error is logged, attributed and summarized in the
    /// report, and cleanup always runs.
    pub async fn run(self, accounts: &[SharedAccount]) -> RunReport {
        let started = Utc::now();
        info!(run_id = %self.run_id, accounts = accounts.len(), mode = %self.ctx.mode, "Run starting");
        let mut metrics = RunMetrics::new(&self.run_id, self.ctx.mode, started);
        let mut report = RunReport {
            run_id: self.run_id.clone(),
            ..Default::default()
        };
        let mut state = RunState {
            first_batch: true,
            ..Default::default()
        };

        let focus = spawn_focus_rotation(&self.bus, self.ctx.host.clone(), self.cancel.clone());
        self.events.run_started(accounts.len());

        let backed_up = match self.ctx.stager.backup().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Credential backup failed, not launching");
                false
            }
        };
        if backed_up {
            self.schedule(accounts, &mut state, &mut metrics, &mut report).await;
        }

        self.cleanup(&mut metrics, &mut report, backed_up).await;
        if let Err(e) = focus.await {
            warn!(error = %e, "Focus rotation task failed");
        }

        for account in accounts {
            let account = account.lock().await;
            if account.done {
                report.completed.push(account.name.clone());
            } else if state.attempts.contains_key(&account.name) {
                report.failed.push(account.name.clone());
            } else {
                report.skipped.push(account.name.clone());
            }
        }
        report.retired = state.retired.into_iter().collect();
        report.retired.sort();
        info!(
            run_id = %self.run_id,
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "Run finished"
        );
        report
    }

    fn eligible(&self, account: &Account, state: &RunState) -> bool {
        if account.done {
            return false;
        }
        if state.attempts.get(&account.name).copied().unwrap_or(0) >= self.config.launch.max_attempts {
            return false;
        }
        account.identities.is_empty() || account.identities.iter().any(|id| !state.retired.contains(id))
    }

    async fn schedule(
        &self,
        accounts: &[SharedAccount],
        state: &mut RunState,
        metrics: &mut RunMetrics,
        report: &mut RunReport,
    ) {
        let mut by_name: HashMap<String, SharedAccount> = HashMap::new();
        for account in accounts {
            let name = account.lock().await.name.clone();
            by_name.insert(name, account.clone());
        }

        let mut round = 0;
        loop {
            if self.cancel.is_cancelled() {
                info!("Run cancelled, no further batches");
                break;
            }

            let mut eligible = Vec::new();
            for account in accounts {
                let snapshot = account.lock().await.clone();
                if self.eligible(&snapshot, state) {
                    eligible.push(snapshot);
                }
            }
            if eligible.is_empty() {
                info!("No eligible accounts remain");
                break;
            }

            let live: Vec<Arc<Identity>> = self
                .identities
                .iter()
                .filter(|i| !state.retired.contains(i.id()))
                .cloned()
                .collect();
            let now = Utc::now();
            let mut batches = accounts_by_identity(
                &eligible,
                &live,
                &self.synthetic,
                self.config.launch.accounts_per_batch,
                now,
            );
            order_batches(&mut batches, now);
            round += 1;
            info!(round, eligible = eligible.len(), batches = batches.len(), "Scheduling round");

            for batch in &batches {
                if self.cancel.is_cancelled() {
                    break;
                }
                match self.run_batch(batch, &by_name, state.first_batch, metrics).await {
                    BatchOutcome::Launched => {
                        state.first_batch = false;
                        report.batches += 1;
                        for name in &batch.accounts {
                            *state.attempts.entry(name.clone()).or_default() += 1;
                        }
                    }
                    BatchOutcome::ConnectFailed => {
                        report.connect_failures += 1;
                        let id = batch.identity.id().to_string();
                        let failures = state.connect_failures.entry(id.clone()).or_default();
                        *failures += 1;
                        if *failures >= self.config.launch.max_connect_failures {
                            warn!(identity = %id, failures = *failures, "Retiring identity for this run");
                            state.retired.insert(id);
                        }
                    }
                    BatchOutcome::Cancelled => break,
                }
            }
        }
    }

    async fn run_batch(
        &self,
        batch: &LaunchBatch,
        accounts: &HashMap<String, SharedAccount>,
        first: bool,
        metrics: &mut RunMetrics,
    ) -> BatchOutcome {
        let identity = &batch.identity;
        debug!(identity = %identity.id(), accounts = batch.len(), first, "LaunchOrchestrator::run_batch: called");

        let now = Utc::now();
        let available = identity.available(now);
        if available > now {
            let wait = (available - now).to_std().unwrap_or_default();
            info!(identity = %identity.id(), wait_secs = wait.as_secs(), "Waiting for identity cooldown");
            tokio::select! {
                _ = self.cancel.cancelled() => return BatchOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        if self.cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }

        if let Err(e) = identity.connect(self.dialer.as_ref()).await {
            warn!(identity = %identity.id(), error = %e, "Connect failed, skipping batch");
            return BatchOutcome::ConnectFailed;
        }

        let token = identity.begin_batch(&self.cancel);
        let mut handles = Vec::new();
        for name in &batch.accounts {
            let Some(account) = accounts.get(name) else {
                warn!(account = %name, "Batch names an unknown account");
                continue;
            };
            let launcher = Launcher::new(self.ctx.clone(), account.clone(), identity.clone(), token.clone());
            handles.push((name.clone(), tokio::spawn(launcher.run())));
        }
        info!(identity = %identity.id(), launched = handles.len(), "Batch launched");

        if first {
            let stagger = self.config.launch.stagger();
            debug!(stagger_ms = stagger.as_millis() as u64, "LaunchOrchestrator::run_batch: staggering first batch");
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(stagger) => {
                    self.ctx.open_slots();
                }
            }
        }

        let (names, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(tasks).await) {
            match result {
                Ok(record) => metrics.record_attempt(&record),
                Err(e) => {
                    error!(account = %name, error = %e, "Launch task failed");
                    if let Some(account) = accounts.get(&name) {
                        account.lock().await.mark_failed(format!("Launch task failed: {}", e));
                    }
                }
            }
        }

        if let Err(e) = identity.disconnect(self.dialer.as_ref()).await {
            warn!(identity = %identity.id(), error = %e, "Disconnect failed");
        }
        self.ctx.throttle.clear_active();
        BatchOutcome::Launched
    }

    async fn cleanup(&self, metrics: &mut RunMetrics, report: &mut RunReport, backed_up: bool) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            warn!("Cleanup already ran");
            return;
        }
        let cancelled = self.cancel.is_cancelled();
        info!(cancelled, "Cleaning up run");
        self.cancel.cancel();
        self.ctx.throttle.settle().await;

        if backed_up {
            self.restore().await;
        }

        metrics.finish(Utc::now(), cancelled);
        for identity in self.identities.iter().chain(std::iter::once(&self.synthetic)) {
            metrics.record_identity(identity);
        }
        match metrics.write(&self.config.storage.metrics_dir) {
            Ok(path) => {
                report.metrics_path = Some(path.clone());
                self.events.metrics_updated(path);
            }
            Err(e) => error!(error = %format!("{:#}", e), "Failed to write run metrics"),
        }
        report.cancelled = cancelled;
    }

    /// Put the backed-up credential file back, holding the login slot if it was ever opened
    async fn restore(&self) {
        let permit = if self.ctx.slots_opened() {
            // The run token is already cancelled; wait on the slot's own timeout instead
            let waiter = CancellationToken::new();
            match self.ctx.login.acquire(self.ctx.slots.restore_timeout(), &waiter).await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    warn!(error = %e, "Restoring credentials without the login slot");
                    None
                }
            }
        } else {
            None
        };

        match self.ctx.stager.restore().await {
            Ok(()) => info!("Credentials restored"),
            Err(e) => error!(error = %format!("{:#}", e), "Failed to restore credentials"),
        }
        if let Some(permit) = permit {
            permit.release();
        }
    }
}
