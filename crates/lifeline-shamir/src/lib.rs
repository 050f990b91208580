//! Lifeline Shamir Module
//!
//! Split a wallet master secret into guardian shares and reconstruct it once
//! a quorum cooperates.
//!
//! Arithmetic is over the prime field GF(2^61 - 1). Secrets of any length are
//! split chunk by chunk, so a 256-bit seed never has to fit in one field
//! element.
//!
//! Each share can be sealed to its guardian's own public key
//! ([`guardian::wrap_share`]). Only that guardian's secret key opens it.
//!
//! # Example
//!
//! ```
//! use lifeline_shamir::{reconstruct_secret, split_secret};
//!
//! let secret = b"correct horse battery staple";
//! let shares = split_secret(secret, 3, 5).unwrap();
//!
//! let recovered =
//!     reconstruct_secret(&[shares[0].clone(), shares[2].clone(), shares[4].clone()]).unwrap();
//! assert_eq!(recovered, secret);
//! ```

pub mod field;
pub mod guardian;
pub mod shamir;

// Re-exports
pub use guardian::{split_for_guardians, unwrap_share, wrap_share, GuardianShare};
pub use shamir::{reconstruct_secret, split_secret, verify_shares, Share};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShamirError {
    #[error("Invalid threshold: need at least 2")]
    InvalidThreshold,
    #[error("Threshold exceeds share count")]
    ThresholdExceedsShares,
    #[error("Not enough shares to reconstruct: need {needed}, got {got}")]
    InsufficientShares { needed: u8, got: usize },
    #[error("Share verification failed")]
    VerificationFailed,
    #[error("Invalid share format: {0}")]
    InvalidShare(String),
}

/// Configuration for Shamir split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShamirConfig {
    /// Minimum shares needed to reconstruct (M)
    pub threshold: u8,
    /// Total shares to generate (N)
    pub total_shares: u8,
}

impl ShamirConfig {
    /// Common 2-of-3 setup
    pub fn two_of_three() -> Self {
        Self {
            threshold: 2,
            total_shares: 3,
        }
    }

    /// Common 3-of-5 setup
    pub fn three_of_five() -> Self {
        Self {
            threshold: 3,
            total_shares: 5,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ShamirError> {
        if self.threshold < 2 {
            return Err(ShamirError::InvalidThreshold);
        }
        if self.threshold > self.total_shares {
            return Err(ShamirError::ThresholdExceedsShares);
        }
        Ok(())
    }
}
