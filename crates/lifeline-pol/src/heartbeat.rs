//! Heartbeat urgency evaluation.
//!
//! Pure logic: takes a status and the current time, returns how far into
//! the check-in interval the wallet is and what the owner should do.
//!
//! ```text
//! |--- Healthy ---|--- CheckinRecommended ---|--- CheckinRequired ---|--- Overdue
//! 0%             50%                        90%                    100%
//! ```
//!
//! A wallet already in `Missed` or later is always `Overdue`.

use serde::{Deserialize, Serialize};

use crate::types::{PolState, PolStatus};

/// When to nudge the owner, as fractions of the check-in interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Default: 0.5
    pub checkin_threshold: f64,
    /// Default: 0.9
    pub critical_threshold: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            checkin_threshold: 0.5,
            critical_threshold: 0.9,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<(), HeartbeatError> {
        if self.checkin_threshold <= 0.0 || self.checkin_threshold >= 1.0 {
            return Err(HeartbeatError::InvalidThreshold(
                "checkin_threshold must be between 0.0 and 1.0 exclusive".into(),
            ));
        }
        if self.critical_threshold <= self.checkin_threshold || self.critical_threshold >= 1.0 {
            return Err(HeartbeatError::InvalidThreshold(
                "critical_threshold must be between checkin_threshold and 1.0 exclusive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatAction {
    Healthy,
    CheckinRecommended,
    CheckinRequired,
    /// Check-in is late; escalation is running or about to
    Overdue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub wallet_id: String,
    pub state: PolState,
    /// Fraction of the interval elapsed (0.0–1.0+)
    pub elapsed_fraction: f64,
    /// Negative once the check-in is late
    pub secs_until_due: i64,
    pub action: HeartbeatAction,
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

/// Evaluate how urgent the next check-in is.
///
/// The interval is measured back from `status.next_check_in`; a wallet with
/// no schedule yet is `Healthy`.
pub fn evaluate_heartbeat(
    status: &PolStatus,
    interval_secs: u64,
    now: u64,
    config: &HeartbeatConfig,
) -> HeartbeatStatus {
    let (elapsed_fraction, secs_until_due) = match status.next_check_in {
        Some(due) if interval_secs > 0 => {
            let start = due.saturating_sub(interval_secs);
            let elapsed = now.saturating_sub(start);
            (
                elapsed as f64 / interval_secs as f64,
                due as i64 - now as i64,
            )
        }
        _ => (0.0, 0),
    };

    let late = matches!(
        status.state,
        PolState::Missed | PolState::Escalated | PolState::RecoveryTriggered
    );

    let action = if late || elapsed_fraction >= 1.0 {
        HeartbeatAction::Overdue
    } else if elapsed_fraction >= config.critical_threshold {
        HeartbeatAction::CheckinRequired
    } else if elapsed_fraction >= config.checkin_threshold {
        HeartbeatAction::CheckinRecommended
    } else {
        HeartbeatAction::Healthy
    };

    HeartbeatStatus {
        wallet_id: status.wallet_id.clone(),
        state: status.state,
        elapsed_fraction,
        secs_until_due,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: u64 = 1_000;

    fn active_status(next_check_in: u64) -> PolStatus {
        let mut status = PolStatus::new("wallet-1");
        status.state = PolState::Active;
        status.next_check_in = Some(next_check_in);
        status
    }

    #[test]
    fn test_healthy_status() {
        let status = active_status(2_000);
        let hb = evaluate_heartbeat(&status, INTERVAL, 1_100, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::Healthy);
        assert!((hb.elapsed_fraction - 0.1).abs() < 0.001);
        assert_eq!(hb.secs_until_due, 900);
    }

    #[test]
    fn test_checkin_recommended() {
        let status = active_status(2_000);
        let hb = evaluate_heartbeat(&status, INTERVAL, 1_600, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::CheckinRecommended);
    }

    #[test]
    fn test_checkin_required() {
        let status = active_status(2_000);
        let hb = evaluate_heartbeat(&status, INTERVAL, 1_950, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::CheckinRequired);
    }

    #[test]
    fn test_overdue() {
        let status = active_status(2_000);
        let hb = evaluate_heartbeat(&status, INTERVAL, 2_010, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::Overdue);
        assert_eq!(hb.secs_until_due, -10);

        // Missed is overdue whatever the clock says
        let mut missed = active_status(5_000);
        missed.state = PolState::Missed;
        let hb = evaluate_heartbeat(&missed, INTERVAL, 4_001, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::Overdue);
    }

    #[test]
    fn test_unscheduled_is_healthy() {
        let status = PolStatus::new("wallet-1");
        let hb = evaluate_heartbeat(&status, INTERVAL, 9_999, &HeartbeatConfig::default());
        assert_eq!(hb.action, HeartbeatAction::Healthy);
        assert_eq!(hb.elapsed_fraction, 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(HeartbeatConfig::default().validate().is_ok());
        let inverted = HeartbeatConfig {
            checkin_threshold: 0.9,
            critical_threshold: 0.5,
        };
        assert!(inverted.validate().is_err());
        let out_of_range = HeartbeatConfig {
            checkin_threshold: 0.0,
            critical_threshold: 0.5,
        };
        assert!(out_of_range.validate().is_err());
    }
}
