//! Launch error types

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::RunStage;

/// The three counting slots an attempt passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Exclusive access to the shared credential file
    Login,
    /// Budget of simultaneously running client processes
    Exe,
    /// Global pacing gate around authentication
    Auth,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Exe => write!(f, "exe"),
            Self::Auth => write!(f, "auth"),
        }
    }
}

/// Errors that end a single launch attempt
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Timed out after {waited:?} waiting for the {slot} slot")]
    SlotTimeout { slot: SlotKind, waited: Duration },

    #[error("Attempt cancelled")]
    Cancelled,

    #[error("Client reported {stage}")]
    LifecycleFailed { stage: RunStage },

    #[error("Invalid stage transition {from} -> {to}")]
    InvalidTransition { from: RunStage, to: RunStage },

    #[error("Client exited at {stage} before entering the world")]
    ExitedEarly { stage: RunStage },

    #[error("Attempt exceeded {0:?}")]
    AttemptTimeout(Duration),

    #[error("Credential staging failed: {0}")]
    Staging(String),

    #[error("Client launch failed: {0}")]
    Launch(String),

    #[error("Client control failed: {0}")]
    Control(String),
}

impl LaunchError {
    /// Cancellation never penalizes the identity
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LaunchError::Cancelled)
    }

    /// Local failures say nothing about the identity the attempt ran through
    pub fn is_local(&self) -> bool {
        matches!(self, LaunchError::SlotTimeout { .. } | LaunchError::Cancelled)
    }

    /// Lifecycle failures have already been reported to the throttle
    pub fn is_reported(&self) -> bool {
        matches!(self, LaunchError::LifecycleFailed { .. })
    }
}

/// Which side of a connection the dialer was asked to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialAction {
    Connect,
    Disconnect,
}

impl std::fmt::Display for DialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Failure of the external dialer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    #[error("{action} of '{connection}' failed: dialer process did not start")]
    NotStarted { action: DialAction, connection: String },

    #[error("{action} of '{connection}' failed: dialer exited with code {code}")]
    ExitCode {
        action: DialAction,
        connection: String,
        code: i32,
    },
}
