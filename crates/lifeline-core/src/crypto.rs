//! Cryptographic utilities
//!
//! Password-based encryption for device key storage using Argon2id + AES-256-GCM.
//!
//! # Security Notes
//!
//! - Argon2id is memory-hard (resistant to GPU/ASIC attacks)
//! - AES-256-GCM provides authenticated encryption
//! - Each encryption uses a random salt and nonce
//! - The passphrase is never stored

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// 256 bits for AES-256
const KEY_LEN: usize = 32;

/// Salt length for Argon2
const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length
const TAG_LEN: usize = 16;

/// Blob format version
const BLOB_VERSION: u8 = 1;

/// version (1) + m_cost (4) + t_cost (4) + p_cost (4)
const HEADER_LEN: usize = 13;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid ciphertext format")]
    InvalidFormat,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Parallel lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// OWASP recommendations for 2024+: 64 MiB, 3 iterations, 4 lanes.
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }
}

/// Encrypted secret format:
/// [version (1)][m_cost (4)][t_cost (4)][p_cost (4)][salt (16)][nonce (12)][ciphertext + tag]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    params: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// KDF parameters this blob was written with.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(HEADER_LEN + SALT_LEN + NONCE_LEN + self.ciphertext.len());
        bytes.push(BLOB_VERSION);
        bytes.extend_from_slice(&self.params.m_cost.to_le_bytes());
        bytes.extend_from_slice(&self.params.t_cost.to_le_bytes());
        bytes.extend_from_slice(&self.params.p_cost.to_le_bytes());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        // Minimum size: header + salt + nonce + at least 1 byte ciphertext + tag
        if bytes.len() < HEADER_LEN + SALT_LEN + NONCE_LEN + TAG_LEN + 1 {
            return Err(CryptoError::InvalidFormat);
        }
        if bytes[0] != BLOB_VERSION {
            return Err(CryptoError::InvalidFormat);
        }

        let read_u32 = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(word)
        };
        let params = KdfParams::new(read_u32(1), read_u32(5), read_u32(9));

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let salt_at = HEADER_LEN;
        let nonce_at = salt_at + SALT_LEN;
        salt.copy_from_slice(&bytes[salt_at..nonce_at]);
        nonce.copy_from_slice(&bytes[nonce_at..nonce_at + NONCE_LEN]);

        Ok(Self {
            params,
            salt,
            nonce,
            ciphertext: bytes[nonce_at + NONCE_LEN..].to_vec(),
        })
    }
}

/// Derive an encryption key from a passphrase using Argon2id
fn derive_key(
    passphrase: &str,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

/// Encrypt a secret with a passphrase.
///
/// Each call generates a new random salt and nonce.
pub fn encrypt_secret(
    secret: &[u8],
    passphrase: &str,
    params: &KdfParams,
) -> Result<EncryptedBlob, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EncryptionFailed("empty secret".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&nonce_arr);

    let key = derive_key(passphrase, &salt, params)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedBlob {
        params: *params,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a secret with a passphrase.
///
/// # Errors
/// Returns error if the passphrase is wrong or the ciphertext is tampered
pub fn decrypt_secret(
    encrypted: &EncryptedBlob,
    passphrase: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = derive_key(passphrase, &encrypted.salt, &encrypted.params)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&encrypted.nonce),
            encrypted.ciphertext.as_slice(),
        )
        .map_err(|_| {
            CryptoError::DecryptionFailed("Invalid passphrase or corrupted data".to_string())
        })?;

    Ok(Zeroizing::new(plaintext))
}

/// SHA-256 over a domain tag followed by each part in order.
pub fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
