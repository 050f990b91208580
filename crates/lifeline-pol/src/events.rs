//! Events published by the manager.
//!
//! Consumers (guardian notification, daemon logging) subscribe through a
//! `tokio::sync::broadcast` channel. Events for one wallet are sent in the
//! order the state changes happened.

use serde::{Deserialize, Serialize};

use crate::types::{ProofKind, RecoveryTrigger};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolEvent {
    CheckInSucceeded {
        wallet_id: String,
        proof_id: String,
        kind: ProofKind,
        timestamp: u64,
    },

    /// A scheduled check-in ended without a proof
    CheckInFailed {
        wallet_id: String,
        error: String,
        /// Whether it was a transport failure
        retryable: bool,
    },

    Missed {
        wallet_id: String,
        missed_count: u32,
        since: u64,
    },

    Escalated {
        wallet_id: String,
        level: u32,
        /// Guardians to notify
        guardians: Vec<String>,
    },

    RecoveryTriggered {
        wallet_id: String,
        trigger: RecoveryTrigger,
    },

    GuardianAdded {
        wallet_id: String,
        guardian_id: String,
    },

    GuardianRemoved {
        wallet_id: String,
        guardian_id: String,
    },

    Revoked {
        wallet_id: String,
    },
}

impl PolEvent {
    pub fn wallet_id(&self) -> &str {
        match self {
            PolEvent::CheckInSucceeded { wallet_id, .. }
            | PolEvent::CheckInFailed { wallet_id, .. }
            | PolEvent::Missed { wallet_id, .. }
            | PolEvent::Escalated { wallet_id, .. }
            | PolEvent::RecoveryTriggered { wallet_id, .. }
            | PolEvent::GuardianAdded { wallet_id, .. }
            | PolEvent::GuardianRemoved { wallet_id, .. }
            | PolEvent::Revoked { wallet_id } => wallet_id,
        }
    }

    /// Events guardians act on
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            PolEvent::Missed { .. }
                | PolEvent::Escalated { .. }
                | PolEvent::RecoveryTriggered { .. }
        )
    }
}
