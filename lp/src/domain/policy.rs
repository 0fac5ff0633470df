//! Cooldown policy shared by identities and the authentication throttle

use std::time::Duration;

use tracing::debug;

use crate::config::{Band, ThrottleConfig};

/// Banded, fail-streak aware cooldown
///
/// The same formula decides both when an identity may be used again and how
/// long the authentication slot stays closed after an account authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPolicy {
    bands: [Band; 3],
    overflow_penalty_secs: u64,
    fail_base_secs: u64,
    fail_step_secs: u64,
    call_window: Duration,
    priority_window: Duration,
}

impl DelayPolicy {
    pub fn from_config(config: &ThrottleConfig) -> Self {
        debug!(?config.bands, "DelayPolicy::from_config: called");
        Self {
            bands: config.bands,
            overflow_penalty_secs: config.overflow_penalty_secs,
            fail_base_secs: config.fail_base_secs,
            fail_step_secs: config.fail_step_secs,
            call_window: Duration::from_secs(config.call_window_secs),
            priority_window: Duration::from_secs(config.priority_window_secs),
        }
    }

    /// A policy that never waits (tests and update-only runs)
    pub fn immediate() -> Self {
        let zero = Band {
            threshold: u32::MAX,
            delay_secs: 0,
        };
        Self {
            bands: [zero; 3],
            overflow_penalty_secs: 0,
            fail_base_secs: 0,
            fail_step_secs: 0,
            call_window: Duration::from_secs(3600),
            priority_window: Duration::from_secs(600),
        }
    }

    /// Step function over the configured bands
    pub fn band_delay_secs(&self, calls: u32) -> u64 {
        for band in &self.bands {
            if calls < band.threshold {
                return band.delay_secs;
            }
        }
        let last = self.bands[2];
        let overflow = u64::from(calls - last.threshold) + 1;
        last.delay_secs
            .saturating_add(self.overflow_penalty_secs.saturating_mul(overflow))
    }

    /// Cooldown after the most recent attempt
    pub fn delay_secs(&self, calls: u32, consecutive_fails: u32) -> u64 {
        let band = self.band_delay_secs(calls);
        if consecutive_fails == 0 {
            return band;
        }
        let streak = self
            .fail_base_secs
            .saturating_add(self.fail_step_secs.saturating_mul(u64::from(consecutive_fails)));
        band.max(streak)
    }

    pub fn delay(&self, calls: u32, consecutive_fails: u32) -> Duration {
        Duration::from_secs(self.delay_secs(calls, consecutive_fails))
    }

    pub fn call_window(&self) -> Duration {
        self.call_window
    }

    pub fn priority_window(&self) -> Duration {
        self.priority_window
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}
