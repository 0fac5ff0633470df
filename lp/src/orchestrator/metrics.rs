//! Run metrics - per-account and per-identity timelines of one run
//!
//! Offsets are milliseconds from run start. Each run is written to a
//! timestamped file and to `latest.json` in the metrics directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Identity, LaunchMode};
use crate::events::AttemptOutcome;
use crate::lifecycle::AttemptRecord;

pub const LATEST_FILE: &str = "latest.json";

/// One attempt's milestones as offsets from run start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTimeline {
    pub account: String,
    pub identity: String,
    pub outcome: AttemptOutcome,
    pub started_ms: Option<i64>,
    pub authenticated_ms: Option<i64>,
    pub logged_in_ms: Option<i64>,
    pub entered_ms: Option<i64>,
    pub exited_ms: Option<i64>,
}

/// One connect/disconnect cycle as offsets from run start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOffsets {
    pub connect_started_ms: Option<i64>,
    pub connect_finished_ms: Option<i64>,
    pub disconnect_started_ms: Option<i64>,
    pub disconnect_finished_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTimeline {
    pub id: String,
    pub connections: Vec<ConnectionOffsets>,
}

/// Everything recorded about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub mode: LaunchMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub accounts: Vec<AccountTimeline>,
    pub identities: Vec<IdentityTimeline>,
}

fn offset_ms(start: DateTime<Utc>, at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|t| (t - start).num_milliseconds())
}

impl RunMetrics {
    pub fn new(run_id: impl Into<String>, mode: LaunchMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            started_at,
            finished_at: None,
            cancelled: false,
            accounts: Vec::new(),
            identities: Vec::new(),
        }
    }

    pub fn record_attempt(&mut self, record: &AttemptRecord) {
        debug!(account = %record.account, "RunMetrics::record_attempt: called");
        let start = self.started_at;
        let t = &record.timeline;
        self.accounts.push(AccountTimeline {
            account: record.account.clone(),
            identity: record.identity.clone(),
            outcome: record.outcome.clone(),
            started_ms: offset_ms(start, t.started),
            authenticated_ms: offset_ms(start, t.authenticated),
            logged_in_ms: offset_ms(start, t.logged_in),
            entered_ms: offset_ms(start, t.entered),
            exited_ms: offset_ms(start, t.exited),
        });
    }

    /// Record the identity's connections made since run start; skips idle ones
    pub fn record_identity(&mut self, identity: &Identity) {
        let start = self.started_at;
        let connections: Vec<ConnectionOffsets> = identity
            .connections()
            .into_iter()
            .filter(|c| {
                c.connect_started
                    .or(c.disconnect_started)
                    .is_some_and(|t| t >= start)
            })
            .map(|c| ConnectionOffsets {
                connect_started_ms: offset_ms(start, c.connect_started),
                connect_finished_ms: offset_ms(start, c.connect_finished),
                disconnect_started_ms: offset_ms(start, c.disconnect_started),
                disconnect_finished_ms: offset_ms(start, c.disconnect_finished),
            })
            .collect();
        if connections.is_empty() {
            return;
        }
        debug!(id = %identity.id(), count = connections.len(), "RunMetrics::record_identity: recorded");
        self.identities.push(IdentityTimeline {
            id: identity.id().to_string(),
            connections,
        });
    }

    pub fn finish(&mut self, at: DateTime<Utc>, cancelled: bool) {
        self.finished_at = Some(at);
        self.cancelled = cancelled;
    }

    /// Write `run-<timestamp>.json` and `latest.json`; returns the timestamped path
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).context(format!("Failed to create metrics directory {}", dir.display()))?;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run metrics")?;

        let name = format!("run-{}.json", self.started_at.format("%Y%m%dT%H%M%S%.3fZ"));
        let path = dir.join(name);
        fs::write(&path, &json).context(format!("Failed to write {}", path.display()))?;

        let latest = dir.join(LATEST_FILE);
        let tmp = dir.join(format!("{}.tmp", LATEST_FILE));
        fs::write(&tmp, &json).context(format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &latest).context(format!("Failed to replace {}", latest.display()))?;

        info!(path = %path.display(), "Run metrics written");
        Ok(path)
    }

    /// Read `latest.json`, if a run has been recorded
    pub fn load_latest(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
        let metrics = serde_json::from_str(&content).context(format!("Failed to parse {}", path.display()))?;
        Ok(Some(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::MockDialer;
    use crate::domain::DelayPolicy;
    use crate::lifecycle::ClientTimeline;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn record(start: DateTime<Utc>) -> AttemptRecord {
        AttemptRecord {
            account: "alice".to_string(),
            identity: "vpn-de".to_string(),
            timeline: ClientTimeline {
                started: Some(start + chrono::Duration::milliseconds(100)),
                authenticated: Some(start + chrono::Duration::milliseconds(250)),
                logged_in: None,
                entered: None,
                exited: Some(start + chrono::Duration::seconds(2)),
            },
            outcome: AttemptOutcome::Succeeded,
        }
    }

    #[test]
    fn test_attempt_offsets() {
        let start = Utc::now();
        let mut metrics = RunMetrics::new("run-1", LaunchMode::LoginOnly, start);
        metrics.record_attempt(&record(start));

        let timeline = &metrics.accounts[0];
        assert_eq!(timeline.started_ms, Some(100));
        assert_eq!(timeline.authenticated_ms, Some(250));
        assert_eq!(timeline.logged_in_ms, None);
        assert_eq!(timeline.exited_ms, Some(2000));
    }

    #[tokio::test]
    async fn test_identity_connections_since_start() {
        let start = Utc::now();
        let identity = Identity::new("vpn-de", "vpn-de", Arc::new(DelayPolicy::immediate()));
        let dialer = MockDialer::succeeding();
        identity.connect(&dialer).await.unwrap();
        identity.disconnect(&dialer).await.unwrap();

        let mut metrics = RunMetrics::new("run-1", LaunchMode::Collect, start);
        metrics.record_identity(&identity);
        metrics.record_identity(&Identity::new("idle", "idle", Arc::new(DelayPolicy::immediate())));

        assert_eq!(metrics.identities.len(), 1);
        let offsets = &metrics.identities[0].connections[0];
        assert!(offsets.connect_started_ms.is_some_and(|ms| ms >= 0));
        assert!(offsets.disconnect_finished_ms.is_some());
    }

    #[test]
    fn test_write_and_load_latest() {
        let temp = tempdir().unwrap();
        let start = Utc::now();
        let mut metrics = RunMetrics::new("run-7", LaunchMode::LoginOnly, start);
        metrics.record_attempt(&record(start));
        metrics.finish(Utc::now(), true);

        let path = metrics.write(temp.path()).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("run-"));

        let latest = RunMetrics::load_latest(temp.path()).unwrap().unwrap();
        assert_eq!(latest.run_id, "run-7");
        assert!(latest.cancelled);
        assert_eq!(latest.accounts.len(), 1);
    }

    #[test]
    fn test_load_latest_missing() {
        let temp = tempdir().unwrap();
        assert!(RunMetrics::load_latest(temp.path()).unwrap().is_none());
    }
}
