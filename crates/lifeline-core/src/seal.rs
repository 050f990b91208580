//! Sealing data to a guardian's public key.
//!
//! An ephemeral secp256k1 key is generated per message. The AES-256-GCM key is
//! derived from the x coordinate of the ECDH point, so sealing works against an
//! x-only (BIP-340) guardian key regardless of the parity of the full key.
//! Only the guardian's secret key can open the box.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use secp256k1::{ecdh, Parity, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::Zeroizing;

use crate::crypto::{tagged_hash, CryptoError};

const SEAL_TAG: &[u8] = b"lifeline/seal/v1";

/// Compressed ephemeral pubkey (33) + nonce (12)
const HEADER_LEN: usize = 33 + 12;

/// Ciphertext sealed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ephemeral_pubkey: PublicKey,
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    /// `[ephemeral pubkey (33)][nonce (12)][ciphertext + tag]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.ephemeral_pubkey.serialize());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        // At least one byte of plaintext plus the 16-byte tag
        if bytes.len() < HEADER_LEN + 17 {
            return Err(CryptoError::InvalidFormat);
        }
        let ephemeral_pubkey =
            PublicKey::from_slice(&bytes[..33]).map_err(|_| CryptoError::InvalidFormat)?;
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[33..HEADER_LEN]);
        Ok(Self {
            ephemeral_pubkey,
            nonce,
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

fn derive_seal_key(
    shared_point: &[u8; 64],
    ephemeral: &PublicKey,
    recipient: &XOnlyPublicKey,
) -> Zeroizing<[u8; 32]> {
    let shared_x = Zeroizing::new(shared_point[..32].to_vec());
    Zeroizing::new(tagged_hash(
        SEAL_TAG,
        &[
            shared_x.as_slice(),
            &ephemeral.serialize(),
            &recipient.serialize(),
        ],
    ))
}

/// Seal `plaintext` so only the holder of `recipient`'s secret key can read it.
///
/// `aad` is authenticated but not encrypted (e.g. the guardian id).
pub fn seal_to(
    recipient: &XOnlyPublicKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedBox, CryptoError> {
    let secp = Secp256k1::new();
    let ephemeral_secret = SecretKey::new(&mut rand::thread_rng());
    let ephemeral_pubkey = PublicKey::from_secret_key(&secp, &ephemeral_secret);

    let recipient_point = PublicKey::from_x_only_public_key(*recipient, Parity::Even);
    let shared = Zeroizing::new(ecdh::shared_secret_point(
        &recipient_point,
        &ephemeral_secret,
    ));
    let key = derive_seal_key(&shared, &ephemeral_pubkey, recipient);

    let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&nonce_arr);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(SealedBox {
        ephemeral_pubkey,
        nonce,
        ciphertext,
    })
}

/// Open a box sealed to the x-only key of `secret`.
pub fn open_sealed(
    sealed: &SealedBox,
    secret: &SecretKey,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let secp = Secp256k1::new();
    let (recipient, _parity) = secret.x_only_public_key(&secp);

    let shared = Zeroizing::new(ecdh::shared_secret_point(&sealed.ephemeral_pubkey, secret));
    let key = derive_seal_key(&shared, &sealed.ephemeral_pubkey, &recipient);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: sealed.ciphertext.as_slice(),
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed("wrong key or corrupted box".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
