//! Device signing key.
//!
//! One Schnorr keypair per wallet, generated on first use. The secret is
//! encrypted with Argon2id + AES-256-GCM under the device passphrase before
//! it reaches storage. A stored key that fails to decrypt is an error: the
//! manager never generates a replacement, since that would orphan the
//! enrollment the guardians know about.

use lifeline_core::{decrypt_secret, encrypt_secret, EncryptedBlob, KdfParams};
use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zeroize::Zeroizing;

use crate::error::PolError;
use crate::signature::{parse_public_key, sign_data, SignatureVerifier};
use crate::storage::StorageBackend;
use crate::types::{KeyPair, StoredKeyPair, KEY_ALGORITHM};

struct LoadedKey {
    wallet_id: String,
    keypair: Keypair,
    public: KeyPair,
}

impl Drop for LoadedKey {
    fn drop(&mut self) {
        self.keypair.non_secure_erase();
    }
}

pub struct KeyPairManager {
    storage: Arc<dyn StorageBackend>,
    passphrase: Zeroizing<String>,
    kdf: KdfParams,
    loaded: Mutex<Option<LoadedKey>>,
}

/// Short identifier for a public key
fn key_id(public_key: &XOnlyPublicKey) -> String {
    hex::encode(&Sha256::digest(public_key.serialize())[..8])
}

impl KeyPairManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        passphrase: impl Into<String>,
        kdf: KdfParams,
    ) -> Self {
        Self {
            storage,
            passphrase: Zeroizing::new(passphrase.into()),
            kdf,
            loaded: Mutex::new(None),
        }
    }

    fn loaded(&self) -> MutexGuard<'_, Option<LoadedKey>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the wallet's device key, generating and persisting one if none exists.
    pub async fn get_or_generate_key_pair(
        &self,
        wallet_id: &str,
        now: u64,
    ) -> Result<KeyPair, PolError> {
        if let Some(key) = self.loaded().as_ref() {
            if key.wallet_id == wallet_id {
                return Ok(key.public.clone());
            }
        }

        let loaded = match self.storage.retrieve_key_pair(wallet_id).await? {
            Some(stored) => self.unlock(&stored)?,
            None => self.generate(wallet_id, now).await?,
        };
        let public = loaded.public.clone();
        *self.loaded() = Some(loaded);
        Ok(public)
    }

    /// Load the wallet's stored device key. A missing key is a `KeyLoad` error.
    pub async fn load_key_pair(&self, wallet_id: &str) -> Result<KeyPair, PolError> {
        let stored = self
            .storage
            .retrieve_key_pair(wallet_id)
            .await?
            .ok_or_else(|| PolError::KeyLoad(format!("No device key stored for {}", wallet_id)))?;
        let loaded = self.unlock(&stored)?;
        let public = loaded.public.clone();
        *self.loaded() = Some(loaded);
        Ok(public)
    }

    fn unlock(&self, stored: &StoredKeyPair) -> Result<LoadedKey, PolError> {
        if stored.algorithm != KEY_ALGORITHM {
            return Err(PolError::KeyLoad(format!(
                "Unsupported key algorithm {}",
                stored.algorithm
            )));
        }
        let blob_bytes = hex::decode(&stored.encrypted_private_key)
            .map_err(|e| PolError::KeyLoad(format!("Corrupt key record: {}", e)))?;
        let blob =
            EncryptedBlob::from_bytes(&blob_bytes).map_err(|e| PolError::KeyLoad(e.to_string()))?;
        let secret = decrypt_secret(&blob, &self.passphrase)
            .map_err(|e| PolError::KeyLoad(e.to_string()))?;
        let secret_key =
            SecretKey::from_slice(&secret).map_err(|e| PolError::KeyLoad(e.to_string()))?;

        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let expected = parse_public_key(&stored.public_key)
            .map_err(|e| PolError::KeyLoad(e.to_string()))?;
        if keypair.x_only_public_key().0 != expected {
            return Err(PolError::KeyLoad(
                "Decrypted key does not match the stored public key".into(),
            ));
        }

        log::debug!("Loaded device key {} for {}", stored.key_id, stored.wallet_id);
        Ok(LoadedKey {
            wallet_id: stored.wallet_id.clone(),
            keypair,
            public: stored.public_view(),
        })
    }

    async fn generate(&self, wallet_id: &str, now: u64) -> Result<LoadedKey, PolError> {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let (xonly, _) = keypair.x_only_public_key();

        let secret = Zeroizing::new(keypair.secret_bytes());
        let blob = encrypt_secret(secret.as_slice(), &self.passphrase, &self.kdf)?;

        let stored = StoredKeyPair {
            wallet_id: wallet_id.to_string(),
            key_id: key_id(&xonly),
            public_key: xonly.to_string(),
            algorithm: KEY_ALGORITHM.to_string(),
            created_at: now,
            encrypted_private_key: hex::encode(blob.to_bytes()),
        };
        self.storage.store_key_pair(&stored).await?;
        log::info!("Generated device key {} for {}", stored.key_id, wallet_id);

        Ok(LoadedKey {
            wallet_id: wallet_id.to_string(),
            keypair,
            public: stored.public_view(),
        })
    }

    /// Public half of the loaded key
    pub fn public_key(&self) -> Option<XOnlyPublicKey> {
        self.loaded()
            .as_ref()
            .map(|k| k.keypair.x_only_public_key().0)
    }

    /// Schnorr signature over `SHA256(data)` with the loaded key
    pub fn sign(&self, data: &[u8]) -> Result<Signature, PolError> {
        let loaded = self.loaded();
        let key = loaded
            .as_ref()
            .ok_or_else(|| PolError::Crypto("No device key loaded".into()))?;
        Ok(sign_data(data, &key.keypair))
    }

    /// Check a signature over `SHA256(data)` against a hex x-only key
    pub fn verify(&self, data: &[u8], signature: &Signature, public_key: &str) -> bool {
        match parse_public_key(public_key) {
            Ok(pk) => SignatureVerifier::new(0).verify(data, signature, &pk),
            Err(_) => false,
        }
    }

    /// Drop the in-memory key
    pub fn forget(&self) {
        *self.loaded() = None;
    }
}
