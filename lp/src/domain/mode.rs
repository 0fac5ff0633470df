//! Launch mode

use serde::{Deserialize, Serialize};

/// What a launched client does once it reaches the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// Log in, select a character, then shut down
    #[default]
    LoginOnly,
    /// Stay in the world for collection work
    Collect,
    /// Only let the client patch; no authentication pacing
    UpdateOnly,
}

impl std::fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoginOnly => write!(f, "login-only"),
            Self::Collect => write!(f, "collect"),
            Self::UpdateOnly => write!(f, "update-only"),
        }
    }
}

impl std::str::FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login-only" | "login" => Ok(Self::LoginOnly),
            "collect" => Ok(Self::Collect),
            "update-only" | "update" => Ok(Self::UpdateOnly),
            other => Err(format!("unknown launch mode '{}'", other)),
        }
    }
}
