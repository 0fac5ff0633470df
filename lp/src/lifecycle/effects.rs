//! Side-effect dispatch table keyed by stage
//!
//! `effects` decides what the launcher must do when a stage is entered. It is
//! pure so every branch of the lifecycle is testable without a process.

use super::RunStage;
use crate::domain::LaunchMode;

/// One side effect the launcher performs on entering a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the throttle's delayed release of the authentication slot
    BeginAuthRelease,
    /// Free the credential file for the next account, if still held
    ReleaseLoginSlot,
    /// Free the process budget, if still held
    ReleaseExeSlot,
    /// Blame the identity for a failed login or world entry
    ReportFailure { cancel_identity: bool },
    /// Credit the identity with a successful login
    ReportSuccess,
    MarkAccountFailed,
    KillProcess,
    Confirm,
    SelectCharacter,
    Minimize,
    RequestShutdown,
    /// Announce the client for focus rotation
    ClientReady,
    /// Update login/collection bookkeeping
    RecordCompletion,
    ClientClosed,
    /// The attempt is over and succeeded
    Succeed,
    /// The attempt is over; the client reported a failure stage
    FailLifecycle,
    /// The attempt is over; the client exited before completing
    FailExitedEarly,
}

/// Effects for entering `stage` from `previous`
pub fn effects(stage: RunStage, previous: RunStage, mode: LaunchMode, cancel_on_login_failure: bool) -> Vec<Effect> {
    use Effect::*;
    match stage {
        RunStage::NotRun | RunStage::Started => vec![],
        RunStage::Authenticated => vec![BeginAuthRelease, ReleaseLoginSlot],
        RunStage::LoginFailed => vec![
            ReportFailure {
                cancel_identity: cancel_on_login_failure,
            },
            MarkAccountFailed,
            KillProcess,
            ReleaseLoginSlot,
            ReleaseExeSlot,
            FailLifecycle,
        ],
        RunStage::EntryFailed => vec![
            ReportFailure { cancel_identity: false },
            MarkAccountFailed,
            KillProcess,
            ReleaseLoginSlot,
            ReleaseExeSlot,
            FailLifecycle,
        ],
        RunStage::ReadyToPlay => vec![ReleaseLoginSlot, Confirm],
        RunStage::Playing => vec![ReportSuccess],
        RunStage::CharacterSelectReached => vec![SelectCharacter, Minimize],
        RunStage::CharacterSelected => match mode {
            LaunchMode::LoginOnly => vec![RequestShutdown],
            _ => vec![],
        },
        RunStage::WorldEntered => match mode {
            LaunchMode::LoginOnly => vec![RequestShutdown],
            _ => vec![ClientReady],
        },
        RunStage::Exited => {
            if previous.completes_on_exit() {
                vec![RecordCompletion, ClientClosed, Succeed]
            } else {
                vec![ClientClosed, FailExitedEarly]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Effect::*;

    #[test]
    fn test_authenticated_starts_paced_release() {
        let fx = effects(RunStage::Authenticated, RunStage::Started, LaunchMode::Collect, true);
        assert_eq!(fx, vec![BeginAuthRelease, ReleaseLoginSlot]);
    }

    #[test]
    fn test_login_failure_cleans_up() {
        let fx = effects(RunStage::LoginFailed, RunStage::Authenticated, LaunchMode::LoginOnly, true);
        assert!(fx.contains(&ReportFailure { cancel_identity: true }));
        assert!(fx.contains(&KillProcess));
        assert!(fx.contains(&ReleaseLoginSlot));
        assert!(fx.contains(&ReleaseExeSlot));
        assert_eq!(fx.last(), Some(&FailLifecycle));

        let fx = effects(RunStage::LoginFailed, RunStage::Started, LaunchMode::LoginOnly, false);
        assert!(fx.contains(&ReportFailure { cancel_identity: false }));
    }

    #[test]
    fn test_entry_failure_never_cancels_identity() {
        let fx = effects(RunStage::EntryFailed, RunStage::CharacterSelectReached, LaunchMode::Collect, true);
        assert!(fx.contains(&ReportFailure { cancel_identity: false }));
        assert!(fx.contains(&MarkAccountFailed));
    }

    #[test]
    fn test_world_entered_per_mode() {
        let prev = RunStage::CharacterSelected;
        assert_eq!(
            effects(RunStage::WorldEntered, prev, LaunchMode::LoginOnly, true),
            vec![RequestShutdown]
        );
        assert_eq!(
            effects(RunStage::WorldEntered, prev, LaunchMode::Collect, true),
            vec![ClientReady]
        );
        assert_eq!(
            effects(RunStage::CharacterSelected, RunStage::CharacterSelectReached, LaunchMode::Collect, true),
            vec![]
        );
    }

    #[test]
    fn test_exit_completion_depends_on_previous() {
        let fx = effects(RunStage::Exited, RunStage::WorldEntered, LaunchMode::Collect, true);
        assert_eq!(fx, vec![RecordCompletion, ClientClosed, Succeed]);

        let fx = effects(RunStage::Exited, RunStage::CharacterSelected, LaunchMode::LoginOnly, true);
        assert_eq!(fx, vec![RecordCompletion, ClientClosed, Succeed]);

        let fx = effects(RunStage::Exited, RunStage::Playing, LaunchMode::LoginOnly, true);
        assert_eq!(fx, vec![ClientClosed, FailExitedEarly]);
    }
}
