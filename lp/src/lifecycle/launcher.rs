//! Launcher - drives one account through one launch attempt
//!
//! An attempt walks login slot → credential staging → exe slot → auth slot →
//! client launch, then follows the stages the client reports and applies the
//! effects each stage calls for. Whatever happens, held slots are released,
//! an unreleased auth ticket is paced out and a live process is killed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Client, ClientTimeline, Effect, RunStage, effects};
use crate::collab::{ClientHost, ClientProcess, CredentialStager};
use crate::config::{Config, SlotConfig};
use crate::domain::{Identity, LaunchMode, SharedAccount};
use crate::error::{LaunchError, SlotKind};
use crate::events::{AttemptOutcome, EventEmitter};
use crate::throttle::{AuthTicket, AuthenticationThrottle, Slot, SlotPermit};

/// State every launcher of a run shares
pub struct LaunchContext {
    pub mode: LaunchMode,
    pub slots: SlotConfig,
    pub attempt_timeout: Duration,
    pub cancel_identity_on_login_failure: bool,
    /// Exclusive use of the shared credential file; starts closed
    pub login: Slot,
    /// Running-client budget; starts closed
    pub exe: Slot,
    pub throttle: AuthenticationThrottle,
    pub stager: Arc<dyn CredentialStager>,
    pub host: Arc<dyn ClientHost>,
    pub events: EventEmitter,
}

impl LaunchContext {
    pub fn new(
        config: &Config,
        stager: Arc<dyn CredentialStager>,
        host: Arc<dyn ClientHost>,
        events: EventEmitter,
        run_cancel: CancellationToken,
    ) -> Self {
        debug!(mode = %config.launch.mode, max_instances = config.launch.max_instances, "LaunchContext::new: called");
        Self {
            mode: config.launch.mode,
            slots: config.slots.clone(),
            attempt_timeout: config.launch.attempt_timeout(),
            cancel_identity_on_login_failure: config.throttle.cancel_identity_on_login_failure,
            login: Slot::closed(SlotKind::Login, 1),
            exe: Slot::closed(SlotKind::Exe, config.launch.max_instances),
            throttle: AuthenticationThrottle::new(config.slots.auth_timeout(), run_cancel),
            stager,
            host,
            events,
        }
    }

    /// End of the first-batch stagger: let launchers past the login and exe slots
    pub fn open_slots(&self) -> bool {
        let exe = self.exe.open();
        let login = self.login.open();
        exe || login
    }

    pub fn slots_opened(&self) -> bool {
        self.login.is_open()
    }
}

/// What one attempt produced
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub account: String,
    pub identity: String,
    pub timeline: ClientTimeline,
    pub outcome: AttemptOutcome,
}

enum Flow {
    Continue,
    Finished,
}

/// Resources an attempt may be holding when it ends
#[derive(Default)]
struct Held {
    login: Option<SlotPermit>,
    exe: Option<SlotPermit>,
    auth: Option<AuthTicket>,
    process: Option<Box<dyn ClientProcess>>,
    ready_announced: bool,
    closed_announced: bool,
}

fn control_error(e: eyre::Report) -> LaunchError {
    LaunchError::Control(format!("{:#}", e))
}

pub struct Launcher {
    ctx: Arc<LaunchContext>,
    account: SharedAccount,
    identity: Arc<Identity>,
    cancel: CancellationToken,
}

impl Launcher {
    /// `cancel` is the identity's batch token
    pub fn new(ctx: Arc<LaunchContext>, account: SharedAccount, identity: Arc<Identity>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            account,
            identity,
            cancel,
        }
    }

    /// Run the attempt to completion; never fails, the outcome says how it went
    pub async fn run(self) -> AttemptRecord {
        let name = {
            let mut account = self.account.lock().await;
            account.attempts += 1;
            account.name.clone()
        };
        info!(account = %name, identity = %self.identity.id(), "Launch attempt starting");

        let mut client = Client::new(&name);
        let mut held = Held::default();
        let result = self.attempt(&mut client, &mut held).await;
        self.finish(&client, &mut held).await;
        let outcome = self.conclude(&mut client, result).await;

        self.ctx.events.attempt_finished(&name, self.identity.id(), outcome.clone());
        AttemptRecord {
            account: name,
            identity: self.identity.id().to_string(),
            timeline: client.timeline().clone(),
            outcome,
        }
    }

    async fn attempt(&self, client: &mut Client, held: &mut Held) -> Result<(), LaunchError> {
        let ctx = &self.ctx;
        let name = client.account().to_string();

        held.login = Some(ctx.login.acquire(ctx.slots.login_timeout(), &self.cancel).await?);
        ctx.stager
            .stage(&name)
            .await
            .map_err(|e| LaunchError::Staging(format!("{:#}", e)))?;
        held.exe = Some(ctx.exe.acquire(ctx.slots.exe_timeout(), &self.cancel).await?);
        held.auth = Some(ctx.throttle.acquire(&self.identity, &self.cancel).await?);
        let process = ctx
            .host
            .launch(&name)
            .await
            .map_err(|e| LaunchError::Launch(format!("{:#}", e)))?;
        debug!(account = %name, pid = ?process.id(), "Launcher::attempt: client launched");
        held.process = Some(process);

        let deadline = tokio::time::sleep(ctx.attempt_timeout);
        tokio::pin!(deadline);
        loop {
            let Some(process) = held.process.as_mut() else {
                return Err(LaunchError::ExitedEarly { stage: client.stage() });
            };
            let reported = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(LaunchError::Cancelled),
                _ = &mut deadline => return Err(LaunchError::AttemptTimeout(ctx.attempt_timeout)),
                stage = process.next_stage() => stage,
            };
            let stage = reported.unwrap_or_else(|| {
                debug!(account = %name, "Launcher::attempt: stage stream ended, treating as exit");
                RunStage::Exited
            });

            let previous = client.stage();
            if stage == previous {
                debug!(account = %name, %stage, "Launcher::attempt: stage repeated, ignoring");
                continue;
            }
            client.advance(stage, Utc::now())?;
            debug!(account = %name, %previous, %stage, "Launcher::attempt: stage reached");
            for effect in effects(stage, previous, ctx.mode, ctx.cancel_identity_on_login_failure) {
                if let Flow::Finished = self.apply(effect, client, held).await? {
                    return Ok(());
                }
            }
        }
    }

    async fn apply(&self, effect: Effect, client: &mut Client, held: &mut Held) -> Result<Flow, LaunchError> {
        let ctx = &self.ctx;
        let name = client.account().to_string();
        debug!(account = %name, ?effect, "Launcher::apply: called");
        match effect {
            Effect::BeginAuthRelease => {
                if let Some(ticket) = held.auth.take() {
                    ctx.throttle.release_after_login(ticket, &name, ctx.mode);
                }
            }
            Effect::ReleaseLoginSlot => {
                if let Some(permit) = held.login.take() {
                    permit.release();
                }
            }
            Effect::ReleaseExeSlot => {
                if let Some(permit) = held.exe.take() {
                    permit.release();
                }
            }
            Effect::ReportFailure { cancel_identity } => {
                let code = held.process.as_ref().and_then(|p| p.failure_code());
                ctx.throttle.login_failed(&self.identity, &name, code, cancel_identity);
            }
            Effect::ReportSuccess => {
                if client.mark_success_reported() {
                    ctx.throttle.login_succeeded(&self.identity, &name);
                }
            }
            Effect::MarkAccountFailed => {
                let reason = format!("Client reported {}", client.stage());
                self.account.lock().await.mark_failed(reason);
            }
            Effect::KillProcess => {
                if let Some(process) = held.process.as_mut()
                    && let Err(e) = process.kill().await
                {
                    warn!(account = %name, error = %e, "Failed to kill client");
                }
            }
            Effect::Confirm => {
                if let Some(process) = held.process.as_mut() {
                    process.confirm().await.map_err(control_error)?;
                }
            }
            Effect::SelectCharacter => {
                if let Some(process) = held.process.as_mut() {
                    process.select_character().await.map_err(control_error)?;
                }
            }
            Effect::Minimize => {
                if let Some(process) = held.process.as_mut()
                    && let Err(e) = process.minimize().await
                {
                    warn!(account = %name, error = %e, "Failed to minimize client");
                }
            }
            Effect::RequestShutdown => {
                if let Some(process) = held.process.as_mut() {
                    process.shutdown().await.map_err(control_error)?;
                }
            }
            Effect::ClientReady => {
                held.ready_announced = true;
                ctx.events.client_ready(&name);
            }
            Effect::RecordCompletion => {
                self.account.lock().await.record_completion(ctx.mode, Utc::now());
            }
            Effect::ClientClosed => {
                held.closed_announced = true;
                ctx.events.client_closed(&name);
            }
            Effect::Succeed => return Ok(Flow::Finished),
            Effect::FailLifecycle => return Err(LaunchError::LifecycleFailed { stage: client.stage() }),
            Effect::FailExitedEarly => return Err(LaunchError::ExitedEarly { stage: client.previous() }),
        }
        Ok(Flow::Continue)
    }

    /// Guaranteed cleanup for every way an attempt can end
    async fn finish(&self, client: &Client, held: &mut Held) {
        let name = client.account();
        debug!(account = %name, stage = %client.stage(), "Launcher::finish: called");

        if let Some(ticket) = held.auth.take() {
            debug!(account = %name, "Launcher::finish: pacing out unreleased auth ticket");
            self.ctx.throttle.release_after_login(ticket, name, self.ctx.mode);
        }
        if let Some(mut process) = held.process.take() {
            if !process.has_exited() {
                info!(account = %name, "Killing client");
                if let Err(e) = process.kill().await {
                    warn!(account = %name, error = %e, "Failed to kill client");
                }
            }
            if held.ready_announced && !held.closed_announced {
                self.ctx.events.client_closed(name);
            }
        }
        if let Some(permit) = held.login.take() {
            permit.release();
        }
        if let Some(permit) = held.exe.take() {
            permit.release();
        }
    }

    async fn conclude(&self, client: &mut Client, result: Result<(), LaunchError>) -> AttemptOutcome {
        let name = client.account().to_string();
        match result {
            Ok(()) => {
                self.account.lock().await.mark_done();
                if client.mark_success_reported() {
                    self.ctx.throttle.login_succeeded(&self.identity, &name);
                }
                info!(account = %name, identity = %self.identity.id(), "Account completed");
                AttemptOutcome::Succeeded
            }
            Err(e) if e.is_cancelled() => {
                info!(account = %name, stage = %client.stage(), "Launch attempt cancelled");
                AttemptOutcome::Cancelled
            }
            Err(e) => {
                let penalized = e.is_reported() || (!e.is_local() && !self.cancel.is_cancelled());
                if penalized && !e.is_reported() {
                    self.ctx.throttle.login_failed(&self.identity, &name, None, false);
                }
                warn!(account = %name, identity = %self.identity.id(), error = %e, penalized, "Launch attempt failed");
                self.account.lock().await.mark_failed(e.to_string());
                AttemptOutcome::Failed {
                    reason: e.to_string(),
                    penalized,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::{MockStager, Script, ScriptedHost};
    use crate::config::Band;
    use crate::domain::{Account, DelayPolicy};
    use crate::events::EventBus;

    fn fast_config(mode: LaunchMode) -> Config {
        let mut config = Config::default();
        config.launch.mode = mode;
        config.launch.max_instances = 2;
        config.slots.login_timeout_secs = 2;
        config.slots.exe_timeout_secs = 2;
        config.slots.auth_timeout_secs = 2;
        config.throttle.bands = [Band {
            threshold: u32::MAX,
            delay_secs: 0,
        }; 3];
        config.throttle.fail_base_secs = 0;
        config.throttle.fail_step_secs = 0;
        config
    }

    struct Fixture {
        ctx: Arc<LaunchContext>,
        host: Arc<ScriptedHost>,
        stager: Arc<MockStager>,
        identity: Arc<Identity>,
        run: CancellationToken,
        bus: EventBus,
    }

    fn fixture(config: Config, host: ScriptedHost) -> Fixture {
        let bus = EventBus::new(64);
        let run = CancellationToken::new();
        let host = Arc::new(host);
        let stager = Arc::new(MockStager::new());
        let ctx = Arc::new(LaunchContext::new(
            &config,
            stager.clone(),
            host.clone(),
            bus.emitter_for("run-test"),
            run.clone(),
        ));
        ctx.open_slots();
        let identity = Arc::new(Identity::new("vpn-de", "vpn-de", Arc::new(DelayPolicy::immediate())));
        Fixture {
            ctx,
            host,
            stager,
            identity,
            run,
            bus,
        }
    }

    impl Fixture {
        fn launcher(&self, account: &SharedAccount) -> Launcher {
            let cancel = self.identity.begin_batch(&self.run);
            Launcher::new(self.ctx.clone(), account.clone(), self.identity.clone(), cancel)
        }
    }

    #[tokio::test]
    async fn test_successful_login_only_attempt() {
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(Script::success()));
        let account = Account::new("alice").shared();

        let record = fx.launcher(&account).run().await;
        assert_eq!(record.outcome, AttemptOutcome::Succeeded);
        assert!(record.timeline.logged_in.is_some());
        assert!(record.timeline.exited.is_some());

        let account = account.lock().await;
        assert!(account.done);
        assert_eq!(account.attempts, 1);
        assert_eq!(account.logins, 1);
        assert!(account.last_login.is_some());

        assert_eq!(fx.identity.success_count(chrono::DateTime::<Utc>::MIN_UTC), 1);
        assert_eq!(fx.identity.consecutive_fails(), 0);
        assert_eq!(fx.stager.staged(), vec!["alice".to_string()]);

        let commands: Vec<&str> = fx.host.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(commands, vec!["confirm", "select", "minimize", "shutdown", "shutdown"]);

        fx.ctx.throttle.settle().await;
        assert_eq!(fx.ctx.login.available(), 1);
        assert_eq!(fx.ctx.exe.available(), 2);
        assert_eq!(fx.ctx.throttle.slot().available(), 1);
    }

    #[tokio::test]
    async fn test_collect_mode_announces_ready_and_closed() {
        let fx = fixture(fast_config(LaunchMode::Collect), ScriptedHost::new(Script::success()));
        let mut rx = fx.bus.subscribe();
        let account = Account::new("alice").shared();

        let record = fx.launcher(&account).run().await;
        assert!(record.outcome.is_success());
        assert!(account.lock().await.last_collection.is_some());

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(types, vec!["ClientReady", "ClientClosed", "AttemptFinished"]);
    }

    #[tokio::test]
    async fn test_login_failure_penalizes_identity() {
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(Script::login_failure()));
        let account = Account::new("bob").shared();
        fx.identity.set_success(Utc::now());

        let record = fx.launcher(&account).run().await;
        assert!(matches!(record.outcome, AttemptOutcome::Failed { penalized: true, .. }));

        let account = account.lock().await;
        assert!(!account.done);
        assert!(account.last_error.is_some());
        assert_eq!(fx.identity.consecutive_fails(), 1);
        assert_eq!(fx.identity.consecutive_successes(), 0);
        assert_eq!(fx.identity.last_failure().map(|f| f.account), Some("bob".to_string()));
        assert!(fx.identity.batch_token().is_cancelled());
        assert!(!fx.run.is_cancelled());
        assert_eq!(fx.host.running(), 0);
        assert_eq!(fx.ctx.exe.available(), 2);
    }

    #[tokio::test]
    async fn test_failure_code_reaches_identity() {
        let script = Script::login_failure().with_failure_code(4012);
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(script));
        let account = Account::new("bob").shared();

        fx.launcher(&account).run().await;
        let failure = fx.identity.last_failure().unwrap();
        assert_eq!(failure.account, "bob");
        assert_eq!(failure.code, Some(4012));
        assert_eq!(fx.identity.to_record().last_fail_code, Some(4012));
    }

    #[tokio::test]
    async fn test_repeated_stage_report_is_ignored() {
        use RunStage::*;
        let script = Script::new(vec![
            Started,
            Authenticated,
            Authenticated,
            ReadyToPlay,
            Playing,
            Playing,
            CharacterSelectReached,
            CharacterSelected,
            WorldEntered,
            Exited,
        ]);
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(script));
        let account = Account::new("hank").shared();

        let record = fx.launcher(&account).run().await;
        assert_eq!(record.outcome, AttemptOutcome::Succeeded);
        assert_eq!(fx.identity.consecutive_fails(), 0);
        assert!(!fx.host.commands().contains(&("hank".to_string(), "kill")));

        // Effects ran once per distinct stage
        let confirms = fx.host.commands().iter().filter(|(_, c)| *c == "confirm").count();
        assert_eq!(confirms, 1);
        fx.ctx.throttle.settle().await;
        assert_eq!(fx.ctx.login.available(), 1);
    }

    #[tokio::test]
    async fn test_early_exit_fails_attempt() {
        use RunStage::*;
        let script = Script::new(vec![Started, Authenticated, ReadyToPlay, Playing, Exited]);
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(script));
        let account = Account::new("carol").shared();

        let record = fx.launcher(&account).run().await;
        match record.outcome {
            AttemptOutcome::Failed { reason, penalized } => {
                assert!(reason.contains("playing"));
                assert!(penalized);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!account.lock().await.done);
    }

    #[tokio::test]
    async fn test_cancel_while_running_has_no_penalty() {
        use RunStage::*;
        let script = Script::hang_after(vec![Started, Authenticated]);
        let fx = fixture(fast_config(LaunchMode::Collect), ScriptedHost::new(script));
        let account = Account::new("dave").shared();

        let launcher = fx.launcher(&account);
        let handle = tokio::spawn(launcher.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.run.cancel();

        let record = handle.await.unwrap();
        assert_eq!(record.outcome, AttemptOutcome::Cancelled);
        assert_eq!(fx.identity.consecutive_fails(), 0);
        assert!(account.lock().await.last_error.is_none());
        assert_eq!(fx.host.running(), 0);
        assert!(fx.host.commands().contains(&("dave".to_string(), "kill")));
    }

    #[tokio::test]
    async fn test_staging_failure_releases_login_slot() {
        let fx = fixture(fast_config(LaunchMode::LoginOnly), ScriptedHost::new(Script::success()));
        let account = Account::new("erin").shared();
        let stager = Arc::new(MockStager::new().failing(["erin"]));
        let ctx = Arc::new(LaunchContext::new(
            &fast_config(LaunchMode::LoginOnly),
            stager,
            fx.host.clone(),
            fx.bus.emitter_for("run-test"),
            fx.run.clone(),
        ));
        ctx.open_slots();

        let cancel = fx.identity.begin_batch(&fx.run);
        let record = Launcher::new(ctx.clone(), account.clone(), fx.identity.clone(), cancel)
            .run()
            .await;
        assert!(matches!(record.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(ctx.login.available(), 1);
        assert!(fx.host.launched().is_empty());
    }

    #[tokio::test]
    async fn test_slot_timeout_is_local() {
        let mut config = fast_config(LaunchMode::LoginOnly);
        config.slots.login_timeout_secs = 0;
        let fx = fixture(config, ScriptedHost::new(Script::success()));
        let held = fx.ctx.login.acquire(Duration::from_secs(1), &fx.run).await.unwrap();
        let account = Account::new("frank").shared();

        let record = fx.launcher(&account).run().await;
        assert!(matches!(record.outcome, AttemptOutcome::Failed { penalized: false, .. }));
        assert_eq!(fx.identity.consecutive_fails(), 0);
        drop(held);
    }

    #[tokio::test]
    async fn test_attempt_timeout_kills_client() {
        let mut config = fast_config(LaunchMode::Collect);
        config.launch.attempt_timeout_secs = 0;
        let script = Script::hang_after(vec![RunStage::Started]);
        let fx = fixture(config, ScriptedHost::new(script));
        let account = Account::new("gina").shared();

        let record = fx.launcher(&account).run().await;
        match record.outcome {
            AttemptOutcome::Failed { reason, .. } => assert!(reason.contains("exceeded")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fx.host.running(), 0);
        fx.ctx.throttle.settle().await;
        assert_eq!(fx.ctx.throttle.slot().available(), 1);
    }
}
