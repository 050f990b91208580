//! Liveness protocol configuration.
//!
//! All durations are in seconds so the config round-trips through TOML and
//! JSON unchanged.

use lifeline_core::KdfParams;
use lifeline_inherit::{PolicyError, Timelock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PolError;
use crate::heartbeat::HeartbeatConfig;

const DAY: u64 = 86_400;

/// Exponential backoff for retryable check-in failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per tick, including the first
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempts + 1`: base × 2^(failed − 1), capped
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(32);
        let secs = self
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Worst-case time spent sleeping between attempts
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

/// Proof-of-Life timing and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolConfig {
    /// Time between scheduled check-ins (default 7 days)
    pub check_in_interval_secs: u64,
    /// How long `Missed` (and each escalation level) lasts before escalating (default 3 days)
    pub grace_period_secs: u64,
    /// Misses tolerated before the wallet is marked `Missed`
    pub missed_threshold: u32,
    /// Escalation levels passed through before recovery is triggered
    pub final_escalation_level: u32,
    /// Timeout for every server call
    pub request_timeout_secs: u64,
    /// A tick that has not recorded a proof within this window is missed
    pub tick_window_secs: u64,
    pub retry: RetryPolicy,
    /// Accepted clock skew on proof timestamps
    pub drift_window_secs: u64,
    pub challenge_ttl_secs: u64,
    /// Argon2id cost for the device key at rest
    pub kdf: KdfParams,
    pub heartbeat: HeartbeatConfig,
}

impl Default for PolConfig {
    fn default() -> Self {
        Self {
            check_in_interval_secs: 7 * DAY,
            grace_period_secs: 3 * DAY,
            missed_threshold: 0,
            final_escalation_level: 1,
            request_timeout_secs: 30,
            tick_window_secs: 600,
            retry: RetryPolicy::default(),
            drift_window_secs: 300,
            challenge_ttl_secs: 300,
            kdf: KdfParams::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl PolConfig {
    pub fn check_in_interval(&self) -> Duration {
        Duration::from_secs(self.check_in_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tick_window(&self) -> Duration {
        Duration::from_secs(self.tick_window_secs)
    }

    pub fn validate(&self) -> Result<(), PolError> {
        let invalid = |msg: &str| Err(PolError::Validation(msg.to_string()));

        if self.check_in_interval_secs == 0 {
            return invalid("check_in_interval_secs must be > 0");
        }
        if self.grace_period_secs == 0 {
            return invalid("grace_period_secs must be > 0");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be > 0");
        }
        if self.tick_window_secs < self.request_timeout_secs
            || self.tick_window_secs > self.check_in_interval_secs
        {
            return invalid(
                "tick_window_secs must lie between request_timeout_secs and check_in_interval_secs",
            );
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1");
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            return invalid("retry.base_delay_secs must not exceed retry.max_delay_secs");
        }
        if self.drift_window_secs == 0 || self.challenge_ttl_secs == 0 {
            return invalid("drift_window_secs and challenge_ttl_secs must be > 0");
        }
        self.heartbeat
            .validate()
            .map_err(|e| PolError::Validation(e.to_string()))?;
        Ok(())
    }

    /// Worst-case time from the last proof until recovery is triggered.
    ///
    /// `interval × (missed_threshold + 1)` until the wallet is marked missed,
    /// then one grace period per escalation level plus the final one.
    pub fn escalation_deadline_secs(&self) -> u64 {
        let missed = self
            .check_in_interval_secs
            .saturating_mul(self.missed_threshold as u64 + 1);
        let escalation = self
            .grace_period_secs
            .saturating_mul(self.final_escalation_level as u64 + 1);
        missed.saturating_add(escalation)
    }

    /// CSV timelock for the guardian recovery leaf, so the script path only
    /// opens after the liveness protocol has run out.
    pub fn recovery_timelock(&self) -> Result<Timelock, PolicyError> {
        Timelock::covering_secs(self.escalation_deadline_secs())
    }
}
