//! RunStage - where one launch attempt currently is

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

/// A point in one account's attempt lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    #[default]
    NotRun,
    Started,
    Authenticated,
    LoginFailed,
    ReadyToPlay,
    Playing,
    CharacterSelectReached,
    CharacterSelected,
    EntryFailed,
    WorldEntered,
    Exited,
}

impl RunStage {
    pub const ALL: [RunStage; 11] = [
        RunStage::NotRun,
        RunStage::Started,
        RunStage::Authenticated,
        RunStage::LoginFailed,
        RunStage::ReadyToPlay,
        RunStage::Playing,
        RunStage::CharacterSelectReached,
        RunStage::CharacterSelected,
        RunStage::EntryFailed,
        RunStage::WorldEntered,
        RunStage::Exited,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRun => "not-run",
            Self::Started => "started",
            Self::Authenticated => "authenticated",
            Self::LoginFailed => "login-failed",
            Self::ReadyToPlay => "ready-to-play",
            Self::Playing => "playing",
            Self::CharacterSelectReached => "character-select-reached",
            Self::CharacterSelected => "character-selected",
            Self::EntryFailed => "entry-failed",
            Self::WorldEntered => "world-entered",
            Self::Exited => "exited",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Exited
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::LoginFailed | Self::EntryFailed)
    }

    /// Stages after which a clean exit counts as a completed attempt
    pub fn completes_on_exit(self) -> bool {
        matches!(self, Self::CharacterSelected | Self::WorldEntered)
    }

    /// Whether `self` may directly follow `from`
    pub fn can_follow(self, from: RunStage) -> bool {
        use RunStage::*;
        match self {
            NotRun => false,
            Started => from == NotRun,
            Authenticated => from == Started,
            LoginFailed => matches!(from, Started | Authenticated),
            ReadyToPlay => from == Authenticated,
            Playing => from == ReadyToPlay,
            CharacterSelectReached => from == Playing,
            CharacterSelected | EntryFailed => from == CharacterSelectReached,
            WorldEntered => from == CharacterSelected,
            Exited => from != Exited,
        }
    }

    /// Pure transition function
    pub fn transition(from: RunStage, to: RunStage) -> Result<RunStage, LaunchError> {
        if to.can_follow(from) {
            Ok(to)
        } else {
            Err(LaunchError::InvalidTransition { from, to })
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown run stage '{}'", s))
    }
}
