//! Recovery policy construction
//!
//! Guardian threshold and CSV timelock for the script-path recovery leaf.
//!
//! # Policy Structure
//!
//! ```text
//! and_v(v:multi_a(k, G1..Gn), older(TIMELOCK))
//! ```
//!
//! Guardian keys are sorted so the same guardian set always yields the same
//! script, whatever order the caller supplied them in.

use bitcoin::key::XOnlyPublicKey;
use bitcoin::Sequence;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Seconds per block used when converting liveness deadlines to CSV heights
pub const SECS_PER_BLOCK: u64 = 600;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Timelock must be positive and less than 2^16 blocks, got {0}")]
    InvalidTimelock(u64),

    #[error("No guardians configured")]
    NoGuardians,

    #[error("Invalid threshold: {0} of {1} guardians")]
    InvalidThreshold(usize, usize),

    #[error("Duplicate guardian key {0}")]
    DuplicateKey(XOnlyPublicKey),
}

/// Timelock duration in blocks (~10 min each)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timelock(u16);

impl Timelock {
    /// Create a timelock from a number of blocks
    pub fn from_blocks(blocks: u16) -> Result<Self, PolicyError> {
        if blocks == 0 {
            return Err(PolicyError::InvalidTimelock(0));
        }
        Ok(Self(blocks))
    }

    /// Smallest timelock whose expected duration covers `secs`
    pub fn covering_secs(secs: u64) -> Result<Self, PolicyError> {
        let blocks = secs.div_ceil(SECS_PER_BLOCK);
        let blocks = u16::try_from(blocks).map_err(|_| PolicyError::InvalidTimelock(blocks))?;
        Self::from_blocks(blocks)
    }

    /// 6 months (~26,280 blocks)
    pub fn six_months() -> Self {
        Self(26_280)
    }

    /// 1 year (~52,560 blocks)
    pub fn one_year() -> Self {
        Self(52_560)
    }

    /// Custom duration in days
    pub fn days(days: u16) -> Result<Self, PolicyError> {
        let blocks = (days as u64) * 144; // ~144 blocks per day
        if blocks > u16::MAX as u64 {
            return Err(PolicyError::InvalidTimelock(blocks));
        }
        Self::from_blocks(blocks as u16)
    }

    /// Get the block count
    pub fn blocks(&self) -> u16 {
        self.0
    }

    /// Convert to Bitcoin sequence value for CSV
    pub fn to_sequence(&self) -> Sequence {
        Sequence::from_height(self.0)
    }
}

impl fmt::Display for Timelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.0 / 144;
        if days >= 365 {
            write!(f, "~{:.1} years ({} blocks)", days as f32 / 365.0, self.0)
        } else if days >= 30 {
            write!(f, "~{:.1} months ({} blocks)", days as f32 / 30.0, self.0)
        } else {
            write!(f, "~{} days ({} blocks)", days, self.0)
        }
    }
}

impl Ord for Timelock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Timelock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A k-of-n guardian set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianPolicy {
    threshold: usize,
    /// Sorted, unique
    keys: Vec<XOnlyPublicKey>,
}

impl GuardianPolicy {
    /// Create a guardian policy. Keys are sorted; duplicates are rejected.
    pub fn new(threshold: usize, mut keys: Vec<XOnlyPublicKey>) -> Result<Self, PolicyError> {
        if keys.is_empty() {
            return Err(PolicyError::NoGuardians);
        }
        if threshold == 0 || threshold > keys.len() {
            return Err(PolicyError::InvalidThreshold(threshold, keys.len()));
        }

        keys.sort();
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(PolicyError::DuplicateKey(pair[0]));
        }

        Ok(Self { threshold, keys })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Guardian keys in script order
    pub fn keys(&self) -> &[XOnlyPublicKey] {
        &self.keys
    }

    /// Miniscript source for the recovery leaf
    pub fn recovery_miniscript(&self, timelock: Timelock) -> String {
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        format!(
            "and_v(v:multi_a({},{}),older({}))",
            self.threshold,
            keys.join(","),
            timelock.blocks()
        )
    }
}
