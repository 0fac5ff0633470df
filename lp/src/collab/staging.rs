//! Shared credential file staging

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result};
use tracing::{debug, info};

use crate::config::CredentialsConfig;

/// Points the client's single credential file at one account at a time
///
/// Callers serialize `stage` through the login slot; implementations do not
/// need their own locking.
#[async_trait]
pub trait CredentialStager: Send + Sync {
    /// Save the user's credential file before a run touches it
    async fn backup(&self) -> Result<()>;

    /// Replace the shared credential file with `account`'s copy
    async fn stage(&self, account: &str) -> Result<()>;

    /// Put the backed-up credential file back
    async fn restore(&self) -> Result<()>;
}

/// Copies `<accounts-dir>/<account>/<file-name>` over the shared file
#[derive(Debug, Clone)]
pub struct FileStager {
    target: PathBuf,
    accounts_dir: PathBuf,
}

impl FileStager {
    pub fn new(config: &CredentialsConfig) -> Self {
        debug!(target = ?config.target, accounts_dir = ?config.accounts_dir, "FileStager::new: called");
        Self {
            target: config.target.clone(),
            accounts_dir: config.accounts_dir.clone(),
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".bak");
        self.target.with_file_name(name)
    }

    fn source_for(&self, account: &str) -> PathBuf {
        let file_name = self.target.file_name().map(PathBuf::from).unwrap_or_default();
        self.accounts_dir.join(account).join(file_name)
    }

    /// Write via a sibling temp file and rename so the client never reads a torn file
    async fn replace(target: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create credential directory")?;
        }
        let mut tmp_name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = target.with_file_name(tmp_name);
        tokio::fs::write(&tmp, content)
            .await
            .context(format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, target)
            .await
            .context(format!("Failed to move credential file into {}", target.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStager for FileStager {
    async fn backup(&self) -> Result<()> {
        debug!(target = ?self.target, "FileStager::backup: called");
        if !tokio::fs::try_exists(&self.target).await.unwrap_or(false) {
            debug!("FileStager::backup: no credential file to back up");
            return Ok(());
        }
        let content = tokio::fs::read(&self.target)
            .await
            .context("Failed to read credential file")?;
        Self::replace(&self.backup_path(), &content).await?;
        info!(backup = ?self.backup_path(), "Credential file backed up");
        Ok(())
    }

    async fn stage(&self, account: &str) -> Result<()> {
        let source = self.source_for(account);
        debug!(%account, ?source, "FileStager::stage: called");
        let content = tokio::fs::read(&source)
            .await
            .context(format!("No credential file for account {} at {}", account, source.display()))?;
        Self::replace(&self.target, &content).await
    }

    async fn restore(&self) -> Result<()> {
        let backup = self.backup_path();
        debug!(?backup, "FileStager::restore: called");
        if !tokio::fs::try_exists(&backup).await.unwrap_or(false) {
            debug!("FileStager::restore: no backup present");
            return Ok(());
        }
        tokio::fs::rename(&backup, &self.target)
            .await
            .context("Failed to restore credential file")?;
        info!(target = ?self.target, "Credential file restored");
        Ok(())
    }
}
