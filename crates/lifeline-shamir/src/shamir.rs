//! Core Shamir's Secret Sharing implementation
//!
//! Split a secret into N shares where any M can reconstruct it.
//!
//! The secret is cut into 7-byte chunks. Every chunk is below 2^56, so it is a
//! valid element of GF(2^61 - 1), and each chunk gets its own random
//! polynomial. A share carries one field element per chunk.

use crate::field::{self, lagrange_interpolate, lagrange_interpolate_at, poly_eval, MODULUS};
use crate::ShamirError;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Bytes of secret packed into one field element
pub const CHUNK_BYTES: usize = 7;

/// index (1) + threshold (1) + secret_len (4)
const SHARE_HEADER_LEN: usize = 6;

/// A single share of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Share index (1..=N, never 0)
    pub index: u8,
    /// Shares needed to reconstruct
    pub threshold: u8,
    /// Length of the original secret in bytes
    pub secret_len: u32,
    /// One field element per 7-byte chunk of the secret
    pub values: Vec<u64>,
}

impl Share {
    /// `[index][threshold][secret_len BE (4)][value BE (8)]*`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SHARE_HEADER_LEN + self.values.len() * 8);
        bytes.push(self.index);
        bytes.push(self.threshold);
        bytes.extend_from_slice(&self.secret_len.to_be_bytes());
        for value in &self.values {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        if bytes.len() < SHARE_HEADER_LEN || (bytes.len() - SHARE_HEADER_LEN) % 8 != 0 {
            return Err(ShamirError::InvalidShare("Malformed share encoding".into()));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[2..SHARE_HEADER_LEN]);

        let values = bytes[SHARE_HEADER_LEN..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_be_bytes(word)
            })
            .collect();

        let share = Self {
            index: bytes[0],
            threshold: bytes[1],
            secret_len: u32::from_be_bytes(len),
            values,
        };
        share.check_well_formed()?;
        Ok(share)
    }

    fn check_well_formed(&self) -> Result<(), ShamirError> {
        if self.index == 0 {
            return Err(ShamirError::InvalidShare("Share index 0 is reserved".into()));
        }
        if self.threshold < 2 {
            return Err(ShamirError::InvalidShare("Share threshold below 2".into()));
        }
        if self.values.len() != chunk_count(self.secret_len as usize) {
            return Err(ShamirError::InvalidShare(
                "Chunk count does not match secret length".into(),
            ));
        }
        if self.values.iter().any(|&v| v >= MODULUS) {
            return Err(ShamirError::InvalidShare(
                "Field element out of range".into(),
            ));
        }
        Ok(())
    }
}

fn chunk_count(secret_len: usize) -> usize {
    secret_len.div_ceil(CHUNK_BYTES)
}

fn chunk_to_element(chunk: &[u8]) -> u64 {
    chunk.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Split a secret into shares using Shamir's Secret Sharing
///
/// # Arguments
/// * `secret` - The secret bytes to split
/// * `threshold` - Minimum shares needed to reconstruct (M)
/// * `total` - Total shares to generate (N)
///
/// # Returns
/// Vector of N shares, any M of which can reconstruct the secret
pub fn split_secret(secret: &[u8], threshold: u8, total: u8) -> Result<Vec<Share>, ShamirError> {
    if threshold < 2 {
        return Err(ShamirError::InvalidThreshold);
    }
    if threshold > total {
        return Err(ShamirError::ThresholdExceedsShares);
    }
    if secret.is_empty() {
        return Err(ShamirError::InvalidShare("Empty secret".into()));
    }
    let secret_len = u32::try_from(secret.len())
        .map_err(|_| ShamirError::InvalidShare("Secret too large".into()))?;

    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=total)
        .map(|i| Share {
            index: i,
            threshold,
            secret_len,
            values: Vec::with_capacity(chunk_count(secret.len())),
        })
        .collect();

    let mut coefficients = vec![0u64; threshold as usize];
    for chunk in secret.chunks(CHUNK_BYTES) {
        // p(x) = chunk + c1*x + ... + c_{t-1}*x^{t-1}
        coefficients[0] = chunk_to_element(chunk);
        for coef in coefficients.iter_mut().skip(1) {
            *coef = field::random_element(&mut rng);
        }

        for share in &mut shares {
            let y = poly_eval(&coefficients, share.index as u64);
            share.values.push(y);
        }
    }

    coefficients.zeroize();

    Ok(shares)
}

/// Check that shares belong to the same split and can be interpolated
fn check_compatible(shares: &[Share]) -> Result<(u8, u32), ShamirError> {
    let first = shares.first().ok_or(ShamirError::InsufficientShares {
        needed: 2,
        got: 0,
    })?;

    for share in shares {
        share.check_well_formed()?;
        if share.threshold != first.threshold || share.secret_len != first.secret_len {
            return Err(ShamirError::InvalidShare(
                "Shares come from different splits".into(),
            ));
        }
    }

    // Check for duplicate indices
    let mut indices: Vec<u8> = shares.iter().map(|s| s.index).collect();
    indices.sort();
    indices.dedup();
    if indices.len() != shares.len() {
        return Err(ShamirError::InvalidShare("Duplicate share indices".into()));
    }

    Ok((first.threshold, first.secret_len))
}

/// Reconstruct a secret from shares
///
/// # Arguments
/// * `shares` - At least threshold shares, in any order
///
/// # Returns
/// The original secret bytes
pub fn reconstruct_secret(shares: &[Share]) -> Result<Vec<u8>, ShamirError> {
    let (threshold, secret_len) = check_compatible(shares)?;
    if shares.len() < threshold as usize {
        return Err(ShamirError::InsufficientShares {
            needed: threshold,
            got: shares.len(),
        });
    }

    let secret_len = secret_len as usize;
    let mut secret = Vec::with_capacity(secret_len);
    for chunk_idx in 0..chunk_count(secret_len) {
        let points: Vec<(u64, u64)> = shares
            .iter()
            .map(|s| (s.index as u64, s.values[chunk_idx]))
            .collect();

        let value = lagrange_interpolate(&points)
            .ok_or_else(|| ShamirError::InvalidShare("Degenerate share set".into()))?;

        let width = CHUNK_BYTES.min(secret_len - chunk_idx * CHUNK_BYTES);
        let bytes = value.to_be_bytes();
        let (high, low) = bytes.split_at(8 - width);
        if high.iter().any(|&b| b != 0) {
            return Err(ShamirError::InvalidShare(
                "Reconstructed chunk out of range".into(),
            ));
        }
        secret.extend_from_slice(low);
    }

    Ok(secret)
}

/// Verify that shares are consistent (all lie on the same polynomials)
///
/// Interpolates through the first `threshold` shares and checks every
/// remaining share against it. Useful for detecting corrupted shares.
pub fn verify_shares(shares: &[Share], threshold: u8) -> Result<bool, ShamirError> {
    if shares.len() < threshold as usize {
        return Err(ShamirError::InsufficientShares {
            needed: threshold,
            got: shares.len(),
        });
    }
    let (share_threshold, _) = check_compatible(shares)?;
    if share_threshold != threshold {
        return Ok(false);
    }

    let (basis, rest) = shares.split_at(threshold as usize);
    for chunk_idx in 0..basis[0].values.len() {
        let points: Vec<(u64, u64)> = basis
            .iter()
            .map(|s| (s.index as u64, s.values[chunk_idx]))
            .collect();

        for share in rest {
            let expected = lagrange_interpolate_at(&points, share.index as u64)
                .ok_or(ShamirError::VerificationFailed)?;
            if expected != share.values[chunk_idx] {
                return Ok(false);
            }
        }
    }

    // The basis alone must decode to in-range chunks
    Ok(reconstruct_secret(basis).is_ok())
}
