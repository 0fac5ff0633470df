//! Per-attempt client state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RunStage;
use crate::error::LaunchError;

/// When an attempt passed each milestone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeline {
    pub started: Option<DateTime<Utc>>,
    pub authenticated: Option<DateTime<Utc>>,
    pub logged_in: Option<DateTime<Utc>>,
    pub entered: Option<DateTime<Utc>>,
    pub exited: Option<DateTime<Utc>>,
}

/// One launch attempt of one account
#[derive(Debug, Clone)]
pub struct Client {
    account: String,
    stage: RunStage,
    previous: RunStage,
    timeline: ClientTimeline,
    success_reported: bool,
}

impl Client {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            stage: RunStage::NotRun,
            previous: RunStage::NotRun,
            timeline: ClientTimeline::default(),
            success_reported: false,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn previous(&self) -> RunStage {
        self.previous
    }

    pub fn timeline(&self) -> &ClientTimeline {
        &self.timeline
    }

    /// Move to `to`, stamping the matching milestone
    ///
    /// Re-reporting the current stage changes nothing.
    pub fn advance(&mut self, to: RunStage, at: DateTime<Utc>) -> Result<(), LaunchError> {
        debug!(account = %self.account, from = %self.stage, %to, "Client::advance: called");
        if to == self.stage {
            return Ok(());
        }
        let next = RunStage::transition(self.stage, to)?;
        self.previous = self.stage;
        self.stage = next;
        let stamp = match next {
            RunStage::Started => Some(&mut self.timeline.started),
            RunStage::Authenticated => Some(&mut self.timeline.authenticated),
            RunStage::Playing => Some(&mut self.timeline.logged_in),
            RunStage::WorldEntered => Some(&mut self.timeline.entered),
            RunStage::Exited => Some(&mut self.timeline.exited),
            _ => None,
        };
        if let Some(slot) = stamp {
            *slot = Some(at);
        }
        Ok(())
    }

    pub fn success_reported(&self) -> bool {
        self.success_reported
    }

    /// Note that success was reported; false if it already had been
    pub fn mark_success_reported(&mut self) -> bool {
        !std::mem::replace(&mut self.success_reported, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_stamps_milestones() {
        let mut client = Client::new("alice");
        let t0 = Utc::now();
        for stage in [
            RunStage::Started,
            RunStage::Authenticated,
            RunStage::ReadyToPlay,
            RunStage::Playing,
            RunStage::CharacterSelectReached,
            RunStage::CharacterSelected,
            RunStage::WorldEntered,
            RunStage::Exited,
        ] {
            client.advance(stage, t0).unwrap();
        }
        assert_eq!(client.stage(), RunStage::Exited);
        assert_eq!(client.previous(), RunStage::WorldEntered);

        let timeline = client.timeline();
        assert_eq!(timeline.started, Some(t0));
        assert_eq!(timeline.authenticated, Some(t0));
        assert_eq!(timeline.logged_in, Some(t0));
        assert_eq!(timeline.entered, Some(t0));
        assert_eq!(timeline.exited, Some(t0));
    }

    #[test]
    fn test_invalid_advance_keeps_state() {
        let mut client = Client::new("bob");
        client.advance(RunStage::Started, Utc::now()).unwrap();
        let err = client.advance(RunStage::WorldEntered, Utc::now()).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidTransition { .. }));
        assert_eq!(client.stage(), RunStage::Started);
        assert_eq!(client.previous(), RunStage::NotRun);
    }

    #[test]
    fn test_repeated_stage_is_noop() {
        let mut client = Client::new("dave");
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        client.advance(RunStage::Started, t0).unwrap();
        client.advance(RunStage::Authenticated, t0).unwrap();
        client.advance(RunStage::Authenticated, t1).unwrap();
        assert_eq!(client.stage(), RunStage::Authenticated);
        assert_eq!(client.previous(), RunStage::Started);
        assert_eq!(client.timeline().authenticated, Some(t0));
    }

    #[test]
    fn test_success_reported_once() {
        let mut client = Client::new("carol");
        assert!(!client.success_reported());
        assert!(client.mark_success_reported());
        assert!(!client.mark_success_reported());
        assert!(client.success_reported());
    }
}
