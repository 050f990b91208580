//! Schnorr signing and verification for proofs.
//!
//! Proof signatures are BIP-340 Schnorr over `SHA256(challenge ‖ timestamp_be)`.
//! The challenge response binds the signature to the challenge id:
//!
//! ```text
//! response = SHA256(signature ‖ challenge_id ‖ timestamp_be)
//! ```

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::PolError;
use crate::types::PolProof;

/// Message digest signed for `data`
pub fn message_digest(data: &[u8]) -> Message {
    Message::from_digest(Sha256::digest(data).into())
}

/// Schnorr-sign `SHA256(data)`
pub fn sign_data(data: &[u8], keypair: &Keypair) -> Signature {
    let secp = Secp256k1::signing_only();
    secp.sign_schnorr(&message_digest(data), keypair)
}

/// Expected challenge response for a signature over a challenge at `timestamp`
pub fn expected_response(signature: &[u8], challenge_id: &str, timestamp: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signature);
    hasher.update(challenge_id.as_bytes());
    hasher.update(timestamp.to_be_bytes());
    hasher.finalize().into()
}

/// Parse a hex x-only public key
pub fn parse_public_key(hex_key: &str) -> Result<XOnlyPublicKey, PolError> {
    XOnlyPublicKey::from_str(hex_key)
        .map_err(|e| PolError::Validation(format!("Invalid public key: {}", e)))
}

/// Parse a hex Schnorr signature
pub fn parse_signature(hex_sig: &str) -> Result<Signature, PolError> {
    let bytes = hex::decode(hex_sig)
        .map_err(|e| PolError::Validation(format!("Invalid signature hex: {}", e)))?;
    Signature::from_slice(&bytes)
        .map_err(|e| PolError::Validation(format!("Invalid signature: {}", e)))
}

/// Verifies proofs against their embedded public key and the drift window
pub struct SignatureVerifier {
    secp: Secp256k1<VerifyOnly>,
    drift_window: u64,
}

impl SignatureVerifier {
    pub fn new(drift_window_secs: u64) -> Self {
        Self {
            secp: Secp256k1::verification_only(),
            drift_window: drift_window_secs,
        }
    }

    /// Check a signature over `SHA256(data)`
    pub fn verify(&self, data: &[u8], signature: &Signature, public_key: &XOnlyPublicKey) -> bool {
        self.secp
            .verify_schnorr(signature, &message_digest(data), public_key)
            .is_ok()
    }

    /// Verify a proof's signature and timestamp.
    ///
    /// Malformed fields or a timestamp outside the drift window are
    /// `Validation` errors; a signature that doesn't verify is `Authentication`.
    pub fn verify_proof(&self, proof: &PolProof, now: u64) -> Result<(), PolError> {
        if proof.challenge.is_empty() {
            return Err(PolError::Validation("Proof has no challenge".into()));
        }
        if proof.timestamp.abs_diff(now) > self.drift_window {
            return Err(PolError::Validation(format!(
                "Proof timestamp {} is outside the {}s drift window around {}",
                proof.timestamp, self.drift_window, now
            )));
        }

        let public_key = parse_public_key(&proof.public_key)?;
        let signature = parse_signature(&proof.signature)?;
        let message = PolProof::signed_message(&proof.challenge, proof.timestamp);

        if !self.verify(&message, &signature, &public_key) {
            return Err(PolError::Authentication(format!(
                "Signature on proof {} does not verify",
                proof.id
            )));
        }
        Ok(())
    }
}
