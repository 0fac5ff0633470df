//! Launchpool configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::LaunchMode;

/// Main launchpool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduling policy for a run
    pub launch: LaunchConfig,

    /// Slot acquisition timeouts
    pub slots: SlotConfig,

    /// Authentication pacing policy
    pub throttle: ThrottleConfig,

    /// External dialer invocation
    pub dialer: DialerConfig,

    /// Client process invocation
    pub client: ClientConfig,

    /// Shared credential file staging
    pub credentials: CredentialsConfig,

    /// Account, identity and metrics file locations
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.launch.max_instances == 0 {
            return Err(eyre::eyre!("launch.max-instances must be at least 1"));
        }
        if self.launch.accounts_per_batch == 0 {
            return Err(eyre::eyre!("launch.accounts-per-batch must be at least 1"));
        }
        let bands = &self.throttle.bands;
        if !bands.windows(2).all(|w| w[0].threshold <= w[1].threshold) {
            return Err(eyre::eyre!("throttle.bands thresholds must be non-decreasing"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .launchpool.yml
        let local_config = PathBuf::from(".launchpool.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/launchpool/launchpool.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("launchpool").join("launchpool.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialised
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Scheduling policy for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Maximum simultaneously running client processes
    #[serde(rename = "max-instances")]
    pub max_instances: usize,

    /// Accounts launched per identity batch
    #[serde(rename = "accounts-per-batch")]
    pub accounts_per_batch: usize,

    /// What a launched client should do once in the world
    pub mode: LaunchMode,

    /// Attempts per account per run before it is left for the next run
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Connect failures per identity per run before it is retired
    #[serde(rename = "max-connect-failures")]
    pub max_connect_failures: u32,

    /// One-time grace period before the first batch is let through
    #[serde(rename = "stagger-ms")]
    pub stagger_ms: u64,

    /// Upper bound on a single launch attempt
    #[serde(rename = "attempt-timeout-secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            max_instances: 4,
            accounts_per_batch: 8,
            mode: LaunchMode::LoginOnly,
            max_attempts: 3,
            max_connect_failures: 3,
            stagger_ms: 3000,
            attempt_timeout_secs: 900,
        }
    }
}

impl LaunchConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Slot acquisition timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    #[serde(rename = "login-timeout-secs")]
    pub login_timeout_secs: u64,

    #[serde(rename = "exe-timeout-secs")]
    pub exe_timeout_secs: u64,

    #[serde(rename = "auth-timeout-secs")]
    pub auth_timeout_secs: u64,

    /// Wait on the login slot before restoring the credential file
    #[serde(rename = "restore-timeout-secs")]
    pub restore_timeout_secs: u64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: 180,
            exe_timeout_secs: 300,
            auth_timeout_secs: 300,
            restore_timeout_secs: 60,
        }
    }
}

impl SlotConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn exe_timeout(&self) -> Duration {
        Duration::from_secs(self.exe_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}

/// One step of the attempt-count cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    /// Calls in the window below which this band applies
    pub threshold: u32,

    #[serde(rename = "delay-secs")]
    pub delay_secs: u64,
}

/// Authentication pacing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub bands: [Band; 3],

    /// Extra delay per call beyond the third band
    #[serde(rename = "overflow-penalty-secs")]
    pub overflow_penalty_secs: u64,

    /// Window over which attempts count toward the band
    #[serde(rename = "call-window-secs")]
    pub call_window_secs: u64,

    /// Window over which attempts penalize an identity's priority
    #[serde(rename = "priority-window-secs")]
    pub priority_window_secs: u64,

    #[serde(rename = "fail-base-secs")]
    pub fail_base_secs: u64,

    #[serde(rename = "fail-step-secs")]
    pub fail_step_secs: u64,

    /// Abort the rest of an identity's batch when a login fails through it
    #[serde(rename = "cancel-identity-on-login-failure")]
    pub cancel_identity_on_login_failure: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            bands: [
                Band {
                    threshold: 5,
                    delay_secs: 10,
                },
                Band {
                    threshold: 10,
                    delay_secs: 30,
                },
                Band {
                    threshold: 15,
                    delay_secs: 60,
                },
            ],
            overflow_penalty_secs: 30,
            call_window_secs: 3600,
            priority_window_secs: 600,
            fail_base_secs: 40,
            fail_step_secs: 20,
            cancel_identity_on_login_failure: true,
        }
    }
}

/// External dialer invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    pub command: String,

    /// Arguments for connecting; `{name}` is replaced by the connection name
    #[serde(rename = "connect-args")]
    pub connect_args: Vec<String>,

    #[serde(rename = "disconnect-args")]
    pub disconnect_args: Vec<String>,

    /// Phonebook file listing dialable connections
    pub phonebook: Option<PathBuf>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            command: "rasdial".to_string(),
            connect_args: vec!["{name}".to_string()],
            disconnect_args: vec!["{name}".to_string(), "/disconnect".to_string()],
            phonebook: None,
        }
    }
}

/// Client process invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub command: String,

    /// Arguments; `{account}` is replaced by the account name
    pub args: Vec<String>,

    /// Optional command that brings an account's window forward
    #[serde(rename = "focus-command")]
    pub focus_command: Option<Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: "client".to_string(),
            args: vec!["--account".to_string(), "{account}".to_string()],
            focus_command: None,
        }
    }
}

/// Shared credential file staging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// The single credential file the client reads
    pub target: PathBuf,

    /// Directory holding one sub-directory per account
    #[serde(rename = "accounts-dir")]
    pub accounts_dir: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .map(|d| d.join("launchpool"))
            .unwrap_or_else(|| PathBuf::from(".launchpool"));
        Self {
            target: base.join("credentials").join("login.dat"),
            accounts_dir: base.join("accounts"),
        }
    }
}

/// Account, identity and metrics file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "accounts-file")]
    pub accounts_file: PathBuf,

    #[serde(rename = "identities-file")]
    pub identities_file: PathBuf,

    #[serde(rename = "metrics-dir")]
    pub metrics_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/launchpool on Linux)
        let base = dirs::data_dir()
            .map(|d| d.join("launchpool"))
            .unwrap_or_else(|| PathBuf::from(".launchpool"));
        Self {
            accounts_file: base.join("accounts.json"),
            identities_file: base.join("identities.json"),
            metrics_dir: base.join("metrics"),
        }
    }
}
