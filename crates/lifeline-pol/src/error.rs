//! Error taxonomy for the liveness protocol.

use lifeline_core::CryptoError;
use lifeline_inherit::RecoveryError;
use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;
use crate::types::PolState;

#[derive(Error, Debug)]
pub enum PolError {
    /// Malformed input: missing fields, bad hex, timestamps outside the drift window
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad signature or challenge response
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Transport failure or timeout. The only retryable kind.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Challenge {0} has expired")]
    ChallengeExpired(String),

    #[error("Challenge {0} was already used")]
    ChallengeAlreadyUsed(String),

    /// Stored key exists but cannot be decrypted with this device's passphrase
    #[error("Failed to load device key: {0}")]
    KeyLoad(String),

    #[error("Device cannot enroll: {0}")]
    EnrollmentUnsupported(String),

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: PolState, action: &'static str },

    #[error("Wallet {0} is not enrolled")]
    NotEnrolled(String),

    #[error("A check-in is already in progress for {0}")]
    CheckInInProgress(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
}

impl PolError {
    /// Whether the scheduler may retry the failed attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, PolError::Network(_))
    }
}

impl From<CryptoError> for PolError {
    fn from(e: CryptoError) -> Self {
        PolError::Crypto(e.to_string())
    }
}

impl From<TransportError> for PolError {
    fn from(e: TransportError) -> Self {
        PolError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_retryable() {
        assert!(PolError::Network("down".into()).is_retryable());
        assert!(PolError::from(TransportError::Timeout(30)).is_retryable());
        assert!(!PolError::Authentication("bad sig".into()).is_retryable());
        assert!(!PolError::Validation("x".into()).is_retryable());
        assert!(!PolError::KeyLoad("x".into()).is_retryable());
        assert!(!PolError::CheckInInProgress("w".into()).is_retryable());
    }

    #[test]
    fn test_transition_message() {
        let err = PolError::InvalidTransition {
            from: PolState::Revoked,
            action: "check in",
        };
        assert_eq!(err.to_string(), "Cannot check in while revoked");
    }
}
