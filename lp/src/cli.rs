//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::LaunchMode;

/// Launchpool - throttled multi-account client launcher
#[derive(Parser)]
#[command(
    name = "lp",
    about = "Launch many client accounts through pooled network identities",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch every account that is not done yet
    Run {
        /// Override the configured launch mode (login-only, collect, update-only)
        #[arg(short, long)]
        mode: Option<LaunchMode>,

        /// Only launch these accounts (repeatable)
        #[arg(short, long = "account", value_name = "NAME")]
        accounts: Vec<String>,
    },

    /// Show accounts grouped by identity
    Groups,

    /// List identities, optionally importing connections from a phonebook
    Identities {
        /// Phonebook file to import connection names from
        #[arg(short, long, value_name = "PHONEBOOK")]
        import: Option<PathBuf>,
    },

    /// Show the most recent run's metrics
    Metrics {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for the metrics command
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Where the log file lives
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("launchpool")
        .join("logs")
        .join("launchpool.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["lp", "run", "--mode", "collect", "-a", "alice", "-a", "bob"]);
        match cli.command {
            Command::Run { mode, accounts } => {
                assert_eq!(mode, Some(LaunchMode::Collect));
                assert_eq!(accounts, vec!["alice".to_string(), "bob".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["lp", "groups", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Groups));
    }

    #[test]
    fn test_output_format() {
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("launchpool/logs/launchpool.log"));
    }
}
