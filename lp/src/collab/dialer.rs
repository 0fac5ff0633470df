//! Network dialer seam and the command-line adapter

use std::path::Path;

use async_trait::async_trait;
use eyre::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::DialerConfig;

/// Outcome of one dialer invocation; `None` means the process never started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialStatus {
    pub exit_code: Option<i32>,
}

impl DialStatus {
    pub fn exited(code: i32) -> Self {
        Self { exit_code: Some(code) }
    }

    pub fn not_started() -> Self {
        Self { exit_code: None }
    }
}

/// Brings a named network connection up or down
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, connection: &str) -> DialStatus;

    async fn hang_up(&self, connection: &str) -> DialStatus;
}

/// Runs an external dial executable (rasdial by default)
#[derive(Debug, Clone)]
pub struct CommandDialer {
    command: String,
    connect_args: Vec<String>,
    disconnect_args: Vec<String>,
}

impl CommandDialer {
    pub fn new(config: &DialerConfig) -> Self {
        debug!(command = %config.command, "CommandDialer::new: called");
        Self {
            command: config.command.clone(),
            connect_args: config.connect_args.clone(),
            disconnect_args: config.disconnect_args.clone(),
        }
    }

    async fn run(&self, args: &[String], connection: &str) -> DialStatus {
        let args: Vec<String> = args.iter().map(|a| a.replace("{name}", connection)).collect();
        debug!(command = %self.command, ?args, "CommandDialer::run: spawning");
        match Command::new(&self.command).args(&args).kill_on_drop(true).status().await {
            // Killed by a signal: report as a failure code rather than "not started"
            Ok(status) => DialStatus::exited(status.code().unwrap_or(-1)),
            Err(e) => {
                warn!(command = %self.command, error = %e, "Dialer failed to start");
                DialStatus::not_started()
            }
        }
    }
}

#[async_trait]
impl Dialer for CommandDialer {
    async fn dial(&self, connection: &str) -> DialStatus {
        self.run(&self.connect_args, connection).await
    }

    async fn hang_up(&self, connection: &str) -> DialStatus {
        self.run(&self.disconnect_args, connection).await
    }
}

/// Extract dialable connection names from phonebook text
///
/// A `[Name]` section counts only when a non-empty `PhoneNumber=` line
/// follows it before the next section header.
pub fn connection_names(content: Option<&str>) -> Vec<String> {
    let Some(content) = content else {
        return Vec::new();
    };
    // Patterns are literals; compilation cannot fail
    let (Ok(header), Ok(phone)) = (Regex::new(r"^\[(.+)\]$"), Regex::new(r"^PhoneNumber=(.+)$")) else {
        return Vec::new();
    };

    let mut names = Vec::new();
    let mut pending: Option<String> = None;
    for line in content.lines().map(str::trim) {
        if let Some(caps) = header.captures(line) {
            pending = Some(caps[1].trim().to_string());
        } else if let Some(caps) = phone.captures(line)
            && !caps[1].trim().is_empty()
            && let Some(name) = pending.take()
        {
            names.push(name);
        }
    }
    debug!(count = names.len(), "connection_names: parsed");
    names
}

/// Read a phonebook file and list its connection names
pub fn read_phonebook(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).context(format!("Failed to read phonebook {}", path.display()))?;
    Ok(connection_names(Some(&content)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_and_empty_yield_nothing() {
        assert!(connection_names(None).is_empty());
        assert!(connection_names(Some("")).is_empty());
    }

    #[test]
    fn test_name_without_phone_line() {
        let content = "[Frankfurt]\nDevice=WAN Miniport\n";
        assert!(connection_names(Some(content)).is_empty());
    }

    #[test]
    fn test_single_pair() {
        let content = "[Frankfurt]\nPhoneNumber=de.example.net\n";
        assert_eq!(connection_names(Some(content)), vec!["Frankfurt".to_string()]);
    }

    #[test]
    fn test_two_pairs_in_order() {
        let content = "[Frankfurt]\nMEDIA=rastapi\nPhoneNumber=de.example.net\n\n[Oslo]\nPhoneNumber=no.example.net\n";
        assert_eq!(
            connection_names(Some(content)),
            vec!["Frankfurt".to_string(), "Oslo".to_string()]
        );
    }

    #[test]
    fn test_pair_then_unmatched_name() {
        let content = "[Frankfurt]\nPhoneNumber=de.example.net\n[Oslo]\nDevice=x\n";
        assert_eq!(connection_names(Some(content)), vec!["Frankfurt".to_string()]);
    }

    #[test]
    fn test_phone_line_belongs_to_latest_header() {
        let content = "[Dangling]\n[Oslo]\nPhoneNumber=no.example.net\n";
        assert_eq!(connection_names(Some(content)), vec!["Oslo".to_string()]);
    }

    #[test]
    fn test_empty_phone_number_does_not_count() {
        let content = "[Oslo]\nPhoneNumber=\n";
        assert!(connection_names(Some(content)).is_empty());
    }

    #[test]
    fn test_read_phonebook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rasphone.pbk");
        std::fs::write(&path, "[Oslo]\r\nPhoneNumber=no.example.net\r\n").unwrap();
        assert_eq!(read_phonebook(&path).unwrap(), vec!["Oslo".to_string()]);
    }

    #[tokio::test]
    async fn test_command_dialer_missing_binary() {
        let dialer = CommandDialer::new(&DialerConfig {
            command: "/nonexistent/launchpool-dialer".to_string(),
            ..Default::default()
        });
        assert_eq!(dialer.dial("x").await, DialStatus::not_started());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_dialer_exit_codes() {
        let dialer = CommandDialer::new(&DialerConfig {
            command: "sh".to_string(),
            connect_args: vec!["-c".to_string(), "exit 0".to_string()],
            disconnect_args: vec!["-c".to_string(), "exit 3".to_string()],
            phonebook: None,
        });
        assert_eq!(dialer.dial("x").await, DialStatus::exited(0));
        assert_eq!(dialer.hang_up("x").await, DialStatus::exited(3));
    }
}
