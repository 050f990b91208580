//! Single-use, time-bounded challenges.
//!
//! Each manager owns one store. Verification looks up, checks and removes a
//! challenge under a single lock, so two concurrent verifications of the same
//! challenge cannot both succeed.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::PolError;
use crate::signature::expected_response;
use crate::types::Challenge;

/// How long a spent challenge id is remembered past its expiry
pub const DEFAULT_TOMBSTONE_RETENTION_SECS: u64 = 7 * 86_400;

/// Upper bound on remembered spent ids; the oldest go first
pub const MAX_TOMBSTONES: usize = 10_000;

#[derive(Default)]
struct Entries {
    active: HashMap<String, Challenge>,
    /// Spent challenge id -> expiry of the challenge it answered
    used: HashMap<String, u64>,
}

pub struct ChallengeStore {
    ttl: u64,
    retention: u64,
    entries: Mutex<Entries>,
}

impl ChallengeStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: ttl_secs,
            retention: DEFAULT_TOMBSTONE_RETENTION_SECS,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Remember spent ids for `secs` past their expiry, so replays keep
    /// failing as `ChallengeAlreadyUsed` rather than as unknown challenges.
    pub fn with_tombstone_retention(mut self, secs: u64) -> Self {
        self.retention = secs;
        self
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a challenge valid for the store's TTL
    pub fn generate_challenge(&self, wallet_id: &str, now: u64) -> Challenge {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(wallet_id.as_bytes());
        hasher.update(now.to_be_bytes());
        hasher.update(nonce);
        let id = hex::encode(hasher.finalize());

        let challenge = Challenge {
            id: id.clone(),
            wallet_id: wallet_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.entries().active.insert(id, challenge.clone());
        challenge
    }

    /// Check a response to a challenge and consume it.
    ///
    /// The response must equal `SHA256(signature ‖ challenge_id ‖ timestamp_be)`.
    /// On success the challenge is removed and the consumed challenge returned.
    /// A wrong response leaves the challenge in place.
    pub fn verify_challenge_response(
        &self,
        challenge_id: &str,
        response: &[u8],
        signature: &[u8],
        timestamp: u64,
        now: u64,
    ) -> Result<Challenge, PolError> {
        if challenge_id.is_empty() || response.is_empty() || signature.is_empty() {
            return Err(PolError::Validation(
                "Challenge id, response and signature are required".into(),
            ));
        }

        let mut entries = self.entries();

        if entries.used.contains_key(challenge_id) {
            return Err(PolError::ChallengeAlreadyUsed(challenge_id.to_string()));
        }

        let expired = match entries.active.get(challenge_id) {
            Some(c) => c.is_expired(now),
            None => {
                return Err(PolError::Validation(format!(
                    "Unknown challenge {}",
                    challenge_id
                )))
            }
        };

        if expired {
            entries.active.remove(challenge_id);
            return Err(PolError::ChallengeExpired(challenge_id.to_string()));
        }

        let expected = expected_response(signature, challenge_id, timestamp);
        if response != expected.as_slice() {
            return Err(PolError::Authentication(format!(
                "Response does not match challenge {}",
                challenge_id
            )));
        }

        let Some(challenge) = entries.active.remove(challenge_id) else {
            return Err(PolError::Validation(format!(
                "Unknown challenge {}",
                challenge_id
            )));
        };
        if entries.used.len() >= MAX_TOMBSTONES {
            let oldest = entries
                .used
                .iter()
                .min_by_key(|(_, expires_at)| **expires_at)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                entries.used.remove(&id);
            }
        }
        entries
            .used
            .insert(challenge_id.to_string(), challenge.expires_at);
        Ok(challenge)
    }

    /// Drop expired challenges, and tombstones past their retention.
    /// Returns how many active challenges were dropped.
    pub fn purge_expired(&self, now: u64) -> usize {
        let retention = self.retention;
        let mut entries = self.entries();
        let before = entries.active.len();
        entries.active.retain(|_, c| !c.is_expired(now));
        entries
            .used
            .retain(|_, expires_at| now <= expires_at.saturating_add(retention));
        before - entries.active.len()
    }

    /// Outstanding challenges
    pub fn active_count(&self) -> usize {
        self.entries().active.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.active.clear();
        entries.used.clear();
    }
}
