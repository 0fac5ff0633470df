//! In-memory collaborators for tests
//!
//! These stand in for the dialer, credential file and client process so the
//! scheduling logic can be exercised end to end without touching the system.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use super::{ClientHost, ClientProcess, CredentialStager, DialStatus, Dialer};
use crate::lifecycle::RunStage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn bump_peak(current: usize, peak: &AtomicUsize) {
    peak.fetch_max(current, Ordering::SeqCst);
}

// =============================================================================
// Dialer
// =============================================================================

/// Dialer that records calls and answers with a fixed exit code
#[derive(Debug)]
pub struct MockDialer {
    exit_code: Option<i32>,
    failing: HashSet<String>,
    dialed: Mutex<Vec<String>>,
    hung_up: Mutex<Vec<String>>,
}

impl MockDialer {
    pub fn succeeding() -> Self {
        Self::with_exit_code(Some(0))
    }

    pub fn with_exit_code(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            failing: HashSet::new(),
            dialed: Mutex::new(Vec::new()),
            hung_up: Mutex::new(Vec::new()),
        }
    }

    /// Connections that fail to dial with exit code 1
    pub fn failing<I, S>(mut self, connections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = connections.into_iter().map(Into::into).collect();
        self
    }

    /// Connections successfully or unsuccessfully dialed, in order
    pub fn dialed(&self) -> Vec<String> {
        lock(&self.dialed).clone()
    }

    pub fn hung_up(&self) -> Vec<String> {
        lock(&self.hung_up).clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, connection: &str) -> DialStatus {
        debug!(%connection, "MockDialer::dial: called");
        lock(&self.dialed).push(connection.to_string());
        if self.failing.contains(connection) {
            return DialStatus::exited(1);
        }
        DialStatus {
            exit_code: self.exit_code,
        }
    }

    async fn hang_up(&self, connection: &str) -> DialStatus {
        debug!(%connection, "MockDialer::hang_up: called");
        lock(&self.hung_up).push(connection.to_string());
        DialStatus {
            exit_code: self.exit_code,
        }
    }
}

// =============================================================================
// Credential staging
// =============================================================================

/// Stager that records staging order and detects overlapping writers
#[derive(Debug, Default)]
pub struct MockStager {
    failing: HashSet<String>,
    staged: Mutex<Vec<String>>,
    backups: AtomicUsize,
    restores: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts whose credential file cannot be staged
    pub fn failing<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = accounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn staged(&self) -> Vec<String> {
        lock(&self.staged).clone()
    }

    pub fn backups(&self) -> usize {
        self.backups.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    /// Most accounts ever staging at the same time
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStager for MockStager {
    async fn backup(&self) -> Result<()> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stage(&self, account: &str) -> Result<()> {
        debug!(%account, "MockStager::stage: called");
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        bump_peak(active, &self.peak_active);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(account) {
            return Err(eyre::eyre!("no credential file for {}", account));
        }
        lock(&self.staged).push(account.to_string());
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Client host
// =============================================================================

/// Stages a scripted client reports, in order
#[derive(Debug, Clone)]
pub struct Script {
    stages: Vec<RunStage>,
    step: Duration,
    hang: bool,
    failure_code: Option<i32>,
}

impl Script {
    pub fn new(stages: Vec<RunStage>) -> Self {
        Self {
            stages,
            step: Duration::from_millis(1),
            hang: false,
            failure_code: None,
        }
    }

    /// A full successful run through the world and out
    pub fn success() -> Self {
        use RunStage::*;
        Self::new(vec![
            Started,
            Authenticated,
            ReadyToPlay,
            Playing,
            CharacterSelectReached,
            CharacterSelected,
            WorldEntered,
            Exited,
        ])
    }

    /// Authentication rejected
    pub fn login_failure() -> Self {
        use RunStage::*;
        Self::new(vec![Started, Authenticated, LoginFailed])
    }

    /// Reports `stages` and then never reports again
    pub fn hang_after(stages: Vec<RunStage>) -> Self {
        Self {
            hang: true,
            ..Self::new(stages)
        }
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Error code reported alongside a failure stage
    pub fn with_failure_code(mut self, code: i32) -> Self {
        self.failure_code = Some(code);
        self
    }
}

/// Client host whose processes follow per-account scripts
#[derive(Debug)]
pub struct ScriptedHost {
    default: Script,
    scripts: HashMap<String, Script>,
    failing_launch: HashSet<String>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
    launched: Mutex<Vec<String>>,
    focused: Mutex<Vec<String>>,
    commands: Arc<Mutex<Vec<(String, &'static str)>>>,
}

impl ScriptedHost {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            scripts: HashMap::new(),
            failing_launch: HashSet::new(),
            running: Arc::new(AtomicUsize::new(0)),
            peak_running: Arc::new(AtomicUsize::new(0)),
            launched: Mutex::new(Vec::new()),
            focused: Mutex::new(Vec::new()),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(mut self, account: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(account.into(), script);
        self
    }

    /// Accounts whose client fails to start
    pub fn failing_launch(mut self, account: impl Into<String>) -> Self {
        self.failing_launch.insert(account.into());
        self
    }

    pub fn launched(&self) -> Vec<String> {
        lock(&self.launched).clone()
    }

    pub fn focused(&self) -> Vec<String> {
        lock(&self.focused).clone()
    }

    /// Commands sent to clients as (account, command)
    pub fn commands(&self) -> Vec<(String, &'static str)> {
        lock(&self.commands).clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientHost for ScriptedHost {
    async fn launch(&self, account: &str) -> Result<Box<dyn ClientProcess>> {
        debug!(%account, "ScriptedHost::launch: called");
        lock(&self.launched).push(account.to_string());
        if self.failing_launch.contains(account) {
            return Err(eyre::eyre!("client for {} failed to start", account));
        }
        let script = self.scripts.get(account).unwrap_or(&self.default).clone();
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        bump_peak(running, &self.peak_running);
        Ok(Box::new(ScriptedProcess {
            account: account.to_string(),
            stages: script.stages.into(),
            step: script.step,
            hang: script.hang,
            failure_code: script.failure_code,
            reported_code: None,
            alive: true,
            running: self.running.clone(),
            commands: self.commands.clone(),
        }))
    }

    async fn focus(&self, account: &str) -> Result<()> {
        lock(&self.focused).push(account.to_string());
        Ok(())
    }
}

struct ScriptedProcess {
    account: String,
    stages: VecDeque<RunStage>,
    step: Duration,
    hang: bool,
    failure_code: Option<i32>,
    reported_code: Option<i32>,
    alive: bool,
    running: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<(String, &'static str)>>>,
}

impl ScriptedProcess {
    fn end(&mut self) {
        if self.alive {
            self.alive = false;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn record(&self, command: &'static str) {
        lock(&self.commands).push((self.account.clone(), command));
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        self.end();
    }
}

#[async_trait]
impl ClientProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn next_stage(&mut self) -> Option<RunStage> {
        if !self.alive {
            return None;
        }
        match self.stages.pop_front() {
            Some(stage) => {
                tokio::time::sleep(self.step).await;
                if stage.is_failure() {
                    self.reported_code = self.failure_code;
                }
                if stage == RunStage::Exited {
                    self.end();
                }
                Some(stage)
            }
            None if self.hang => std::future::pending().await,
            None => {
                self.end();
                None
            }
        }
    }

    async fn confirm(&mut self) -> Result<()> {
        self.record("confirm");
        Ok(())
    }

    async fn select_character(&mut self) -> Result<()> {
        self.record("select");
        Ok(())
    }

    async fn minimize(&mut self) -> Result<()> {
        self.record("minimize");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown");
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.record("kill");
        self.end();
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        !self.alive
    }

    fn failure_code(&self) -> Option<i32> {
        self.reported_code
    }
}
