//! Lifeline Core
//!
//! Shared cryptographic primitives for Lifeline.
//!
//! # Encrypted Storage
//!
//! Device signing keys are encrypted at rest using Argon2id + AES-256-GCM.
//! The KDF cost parameters travel inside the blob so a key written with one
//! configuration can always be read back.
//!
//! # Sealing
//!
//! Guardian shares are sealed to the guardian's own x-only public key
//! (ephemeral ECDH + AES-256-GCM). Only the guardian's secret key opens them.

pub mod crypto;
pub mod seal;

pub use crypto::{
    decrypt_secret, encrypt_secret, tagged_hash, CryptoError, EncryptedBlob, KdfParams,
};
pub use seal::{open_sealed, seal_to, SealedBox};
