//! Proof-of-Life data model.
//!
//! Everything here is plain serde data: proofs, challenges, status, triggers
//! and the records the manager persists through a [`StorageBackend`].
//!
//! [`StorageBackend`]: crate::storage::StorageBackend

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::PolConfig;

/// Signature scheme used for device keys
pub const KEY_ALGORITHM: &str = "schnorr-secp256k1";

/// Random 128-bit identifier, hex encoded
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Why a proof was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    /// Scheduled heartbeat tick
    Automatic,
    /// Owner pressed "check in"
    Manual,
    /// Owner is responding to an escalation
    Emergency,
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofKind::Automatic => write!(f, "automatic"),
            ProofKind::Manual => write!(f, "manual"),
            ProofKind::Emergency => write!(f, "emergency"),
        }
    }
}

/// A signed statement that the owner's device was live at `timestamp`.
///
/// The signature is BIP-340 Schnorr over `SHA256(challenge ‖ timestamp_be)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolProof {
    pub id: String,
    pub wallet_id: String,
    /// Unix seconds
    pub timestamp: u64,
    /// Challenge id the proof answers
    pub challenge: String,
    /// 64-byte Schnorr signature, hex
    pub signature: String,
    /// x-only device key, hex
    pub public_key: String,
    pub proof_type: ProofKind,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PolProof {
    /// Bytes the device signs for a proof
    pub fn signed_message(challenge: &str, timestamp: u64) -> Vec<u8> {
        let mut msg = Vec::with_capacity(challenge.len() + 8);
        msg.extend_from_slice(challenge.as_bytes());
        msg.extend_from_slice(&timestamp.to_be_bytes());
        msg
    }
}

/// Liveness state of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolState {
    Uninitialized,
    Initialized,
    Enrolled,
    Active,
    Missed,
    Escalated,
    RecoveryTriggered,
    Revoked,
}

impl PolState {
    /// No further transitions out of this state
    pub fn is_terminal(self) -> bool {
        matches!(self, PolState::RecoveryTriggered | PolState::Revoked)
    }

    /// Enrolled and still being monitored
    pub fn is_enrolled(self) -> bool {
        matches!(
            self,
            PolState::Enrolled | PolState::Active | PolState::Missed | PolState::Escalated
        )
    }
}

impl fmt::Display for PolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolState::Uninitialized => "uninitialized",
            PolState::Initialized => "initialized",
            PolState::Enrolled => "enrolled",
            PolState::Active => "active",
            PolState::Missed => "missed",
            PolState::Escalated => "escalated",
            PolState::RecoveryTriggered => "recovery_triggered",
            PolState::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Current liveness status of a wallet.
///
/// `missed_count` and `escalation_level` only grow until a proof lands,
/// which resets both to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolStatus {
    pub wallet_id: String,
    pub state: PolState,
    pub last_proof_timestamp: Option<u64>,
    pub next_check_in: Option<u64>,
    pub missed_count: u32,
    pub escalation_level: u32,
    /// Guardian notifications fanned out since the last proof
    pub guardian_notifications: u32,
    /// When the wallet entered `Missed`
    pub missed_since: Option<u64>,
    /// When the last escalation level was reached
    pub last_escalation_at: Option<u64>,
}

impl PolStatus {
    pub fn new(wallet_id: impl Into<String>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            state: PolState::Uninitialized,
            last_proof_timestamp: None,
            next_check_in: None,
            missed_count: 0,
            escalation_level: 0,
            guardian_notifications: 0,
            missed_since: None,
            last_escalation_at: None,
        }
    }
}

/// Single-use nonce the device must sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// `hex(SHA256(wallet_id ‖ issued_at_be ‖ random128))`
    pub id: String,
    pub wallet_id: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Challenge {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Request to start guardian recovery for a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTrigger {
    pub trigger_id: String,
    pub wallet_id: String,
    pub reason: String,
    pub timestamp: u64,
}

impl RecoveryTrigger {
    pub fn new(wallet_id: impl Into<String>, reason: impl Into<String>, timestamp: u64) -> Self {
        Self {
            trigger_id: random_id(),
            wallet_id: wallet_id.into(),
            reason: reason.into(),
            timestamp,
        }
    }
}

/// How thoroughly a guardian's identity was checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    #[default]
    Unverified,
    Email,
    Identity,
}

/// Which escalation events a guardian wants to hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub email: Option<String>,
    pub on_missed: bool,
    pub on_escalated: bool,
    pub on_recovery: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: None,
            on_missed: false,
            on_escalated: true,
            on_recovery: true,
        }
    }
}

/// A guardian of one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianConfig {
    pub guardian_id: String,
    /// x-only secp256k1 key, hex. Used for share sealing and recovery signing.
    pub public_key: String,
    #[serde(default)]
    pub verification_level: VerificationLevel,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
}

impl GuardianConfig {
    pub fn new(guardian_id: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            guardian_id: guardian_id.into(),
            public_key: public_key.into(),
            verification_level: VerificationLevel::default(),
            notification_preferences: NotificationPreferences::default(),
        }
    }
}

/// Public view of the device key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub key_id: String,
    /// x-only public key, hex
    pub public_key: String,
    pub algorithm: String,
    pub created_at: u64,
}

/// Device key as persisted. The private key is only ever stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyPair {
    pub wallet_id: String,
    pub key_id: String,
    pub public_key: String,
    pub algorithm: String,
    pub created_at: u64,
    /// `lifeline_core::EncryptedBlob` bytes, hex
    pub encrypted_private_key: String,
}

impl StoredKeyPair {
    pub fn public_view(&self) -> KeyPair {
        KeyPair {
            key_id: self.key_id.clone(),
            public_key: self.public_key.clone(),
            algorithm: self.algorithm.clone(),
            created_at: self.created_at,
        }
    }
}

/// Enrollment request sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub wallet_id: String,
    pub display_name: String,
    pub public_key: String,
    pub key_id: String,
    pub verified: bool,
    pub enrolled_at: u64,
}

/// Everything the manager persists about a wallet besides keys, proofs and triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub pol: PolConfig,
    pub enrollment: Option<Enrollment>,
    pub status: Option<PolStatus>,
    #[serde(default)]
    pub guardians: Vec<GuardianConfig>,
}
