//! Client process seam and the stdio line-protocol adapter
//!
//! Detecting lifecycle milestones (window scraping, memory polling) lives
//! outside this crate. A detector reports them as `stage <name>` lines on the
//! client wrapper's stdout and accepts one-word commands on its stdin:
//!
//! ```text
//! stdout: stage started | stage authenticated | ... | stage exited
//! stdin:  confirm | select | minimize | shutdown
//! ```
//!
//! A failure stage may carry the client's error code: `stage login-failed 4012`.

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::lifecycle::RunStage;

/// One running client process
#[async_trait]
pub trait ClientProcess: Send {
    /// OS process id, when known
    fn id(&self) -> Option<u32>;

    /// Next reported stage transition; `None` once reporting has ended
    async fn next_stage(&mut self) -> Option<RunStage>;

    /// Inject the confirmatory input on the ready-to-play screen
    async fn confirm(&mut self) -> Result<()>;

    async fn select_character(&mut self) -> Result<()>;

    async fn minimize(&mut self) -> Result<()>;

    /// Ask the client to close itself
    async fn shutdown(&mut self) -> Result<()>;

    /// Terminate the process forcibly
    async fn kill(&mut self) -> Result<()>;

    fn has_exited(&mut self) -> bool;

    /// Error code that came with the last reported failure stage
    fn failure_code(&self) -> Option<i32>;
}

/// Starts client processes and manages their windows
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Start a client for `account`; the credential file is already staged
    async fn launch(&self, account: &str) -> Result<Box<dyn ClientProcess>>;

    /// Bring `account`'s client window to the foreground
    async fn focus(&self, account: &str) -> Result<()>;
}

/// Spawns the configured client command and speaks the line protocol
#[derive(Debug, Clone)]
pub struct CommandClientHost {
    config: ClientConfig,
}

impl CommandClientHost {
    pub fn new(config: &ClientConfig) -> Self {
        debug!(command = %config.command, "CommandClientHost::new: called");
        Self { config: config.clone() }
    }
}

fn substitute(args: &[String], account: &str) -> Vec<String> {
    args.iter().map(|a| a.replace("{account}", account)).collect()
}

#[async_trait]
impl ClientHost for CommandClientHost {
    async fn launch(&self, account: &str) -> Result<Box<dyn ClientProcess>> {
        let args = substitute(&self.config.args, account);
        debug!(command = %self.config.command, ?args, "CommandClientHost::launch: spawning");
        let mut child = Command::new(&self.config.command)
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("Failed to start client for {}", account))?;

        let stdin = child.stdin.take().ok_or_else(|| eyre::eyre!("Client stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| eyre::eyre!("Client stdout unavailable"))?;

        Ok(Box::new(LineProcess {
            account: account.to_string(),
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            failure_code: None,
        }))
    }

    async fn focus(&self, account: &str) -> Result<()> {
        let Some(command) = &self.config.focus_command else {
            debug!(%account, "CommandClientHost::focus: no focus command configured");
            return Ok(());
        };
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let status = Command::new(program)
            .args(substitute(args, account))
            .status()
            .await
            .context("Failed to run focus command")?;
        if !status.success() {
            warn!(%account, ?status, "Focus command failed");
        }
        Ok(())
    }
}

struct LineProcess {
    account: String,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    failure_code: Option<i32>,
}

impl LineProcess {
    async fn send(&mut self, command: &str) -> Result<()> {
        debug!(account = %self.account, %command, "LineProcess::send: called");
        self.stdin
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .context(format!("Failed to send '{}' to client", command))?;
        self.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ClientProcess for LineProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn next_stage(&mut self) -> Option<RunStage> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(account = %self.account, error = %e, "Client output unreadable");
                    return None;
                }
            };
            let Some(rest) = line.trim().strip_prefix("stage ") else {
                debug!(account = %self.account, %line, "LineProcess::next_stage: ignoring line");
                continue;
            };
            let mut words = rest.split_whitespace();
            let name = words.next().unwrap_or_default();
            match name.parse::<RunStage>() {
                Ok(stage) => {
                    if stage.is_failure() {
                        self.failure_code = words.next().and_then(|code| code.parse().ok());
                    }
                    return Some(stage);
                }
                Err(e) => warn!(account = %self.account, error = %e, "Unknown stage reported"),
            }
        }
    }

    async fn confirm(&mut self) -> Result<()> {
        self.send("confirm").await
    }

    async fn select_character(&mut self) -> Result<()> {
        self.send("select").await
    }

    async fn minimize(&mut self) -> Result<()> {
        self.send("minimize").await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.send("shutdown").await
    }

    async fn kill(&mut self) -> Result<()> {
        debug!(account = %self.account, "LineProcess::kill: called");
        self.child.kill().await.context("Failed to kill client")
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn failure_code(&self) -> Option<i32> {
        self.failure_code
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn host(script: &str) -> CommandClientHost {
        CommandClientHost::new(&ClientConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "{account}".to_string()],
            focus_command: None,
        })
    }

    #[tokio::test]
    async fn test_line_protocol_stages() {
        let host = host("echo 'stage started'; echo noise; echo 'stage authenticated'; echo 'stage exited'");
        let mut process = host.launch("alice").await.unwrap();

        assert_eq!(process.next_stage().await, Some(RunStage::Started));
        assert_eq!(process.next_stage().await, Some(RunStage::Authenticated));
        assert_eq!(process.next_stage().await, Some(RunStage::Exited));
        assert_eq!(process.next_stage().await, None);
    }

    #[tokio::test]
    async fn test_failure_stage_carries_code() {
        let host = host("echo 'stage started'; echo 'stage login-failed 4012'");
        let mut process = host.launch("alice").await.unwrap();

        assert_eq!(process.next_stage().await, Some(RunStage::Started));
        assert_eq!(process.failure_code(), None);
        assert_eq!(process.next_stage().await, Some(RunStage::LoginFailed));
        assert_eq!(process.failure_code(), Some(4012));
    }

    #[tokio::test]
    async fn test_commands_reach_stdin() {
        let host = host("read cmd; [ \"$cmd\" = confirm ] && echo 'stage playing'");
        let mut process = host.launch("alice").await.unwrap();
        process.confirm().await.unwrap();
        assert_eq!(process.next_stage().await, Some(RunStage::Playing));
    }

    #[tokio::test]
    async fn test_kill_ends_process() {
        let host = host("sleep 30");
        let mut process = host.launch("alice").await.unwrap();
        assert!(!process.has_exited());
        process.kill().await.unwrap();
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_focus_without_command_is_noop() {
        host("true").focus("alice").await.unwrap();
    }
}
