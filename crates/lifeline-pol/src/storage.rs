//! Persistence for keys, proofs, wallet config and recovery triggers.
//!
//! [`MemoryStorage`] for tests and ephemeral use; [`FileStorage`] keeps one
//! JSON file per record kind under a directory per wallet.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::types::{PolProof, RecoveryTrigger, StoredKeyPair, WalletConfig};

/// Proof history kept per wallet (newest retained)
pub const MAX_PROOF_HISTORY: usize = 500;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid wallet id: {0:?}")]
    InvalidWalletId(String),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn store_key_pair(&self, key: &StoredKeyPair) -> Result<(), StorageError>;

    async fn retrieve_key_pair(&self, wallet_id: &str)
        -> Result<Option<StoredKeyPair>, StorageError>;

    async fn store_proof(&self, proof: &PolProof) -> Result<(), StorageError>;

    /// Up to `limit` proofs, newest first
    async fn retrieve_proofs(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<Vec<PolProof>, StorageError>;

    async fn store_config(&self, wallet_id: &str, config: &WalletConfig)
        -> Result<(), StorageError>;

    async fn retrieve_config(&self, wallet_id: &str) -> Result<Option<WalletConfig>, StorageError>;

    async fn store_trigger(&self, trigger: &RecoveryTrigger) -> Result<(), StorageError>;

    async fn retrieve_trigger(
        &self,
        wallet_id: &str,
    ) -> Result<Option<RecoveryTrigger>, StorageError>;

    /// Remove everything stored for the wallet
    async fn clear_storage(&self, wallet_id: &str) -> Result<(), StorageError>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default, Clone)]
struct WalletRecords {
    key: Option<StoredKeyPair>,
    /// Oldest first
    proofs: Vec<PolProof>,
    config: Option<WalletConfig>,
    trigger: Option<RecoveryTrigger>,
}

#[derive(Default)]
pub struct MemoryStorage {
    wallets: Mutex<HashMap<String, WalletRecords>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallets(&self) -> MutexGuard<'_, HashMap<String, WalletRecords>> {
        self.wallets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_proof(proofs: &mut Vec<PolProof>, proof: PolProof) {
    proofs.push(proof);
    if proofs.len() > MAX_PROOF_HISTORY {
        let excess = proofs.len() - MAX_PROOF_HISTORY;
        proofs.drain(..excess);
    }
}

fn newest_first(proofs: &[PolProof], limit: usize) -> Vec<PolProof> {
    proofs.iter().rev().take(limit).cloned().collect()
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn store_key_pair(&self, key: &StoredKeyPair) -> Result<(), StorageError> {
        self.wallets()
            .entry(key.wallet_id.clone())
            .or_default()
            .key = Some(key.clone());
        Ok(())
    }

    async fn retrieve_key_pair(
        &self,
        wallet_id: &str,
    ) -> Result<Option<StoredKeyPair>, StorageError> {
        Ok(self.wallets().get(wallet_id).and_then(|w| w.key.clone()))
    }

    async fn store_proof(&self, proof: &PolProof) -> Result<(), StorageError> {
        let mut wallets = self.wallets();
        let records = wallets.entry(proof.wallet_id.clone()).or_default();
        push_proof(&mut records.proofs, proof.clone());
        Ok(())
    }

    async fn retrieve_proofs(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<Vec<PolProof>, StorageError> {
        Ok(self
            .wallets()
            .get(wallet_id)
            .map(|w| newest_first(&w.proofs, limit))
            .unwrap_or_default())
    }

    async fn store_config(
        &self,
        wallet_id: &str,
        config: &WalletConfig,
    ) -> Result<(), StorageError> {
        self.wallets()
            .entry(wallet_id.to_string())
            .or_default()
            .config = Some(config.clone());
        Ok(())
    }

    async fn retrieve_config(&self, wallet_id: &str) -> Result<Option<WalletConfig>, StorageError> {
        Ok(self.wallets().get(wallet_id).and_then(|w| w.config.clone()))
    }

    async fn store_trigger(&self, trigger: &RecoveryTrigger) -> Result<(), StorageError> {
        self.wallets()
            .entry(trigger.wallet_id.clone())
            .or_default()
            .trigger = Some(trigger.clone());
        Ok(())
    }

    async fn retrieve_trigger(
        &self,
        wallet_id: &str,
    ) -> Result<Option<RecoveryTrigger>, StorageError> {
        Ok(self.wallets().get(wallet_id).and_then(|w| w.trigger.clone()))
    }

    async fn clear_storage(&self, wallet_id: &str) -> Result<(), StorageError> {
        self.wallets().remove(wallet_id);
        Ok(())
    }
}

// ============================================================================
// File-backed
// ============================================================================

const KEY_FILE: &str = "key.json";
const PROOFS_FILE: &str = "proofs.json";
const CONFIG_FILE: &str = "config.json";
const TRIGGER_FILE: &str = "trigger.json";

/// JSON files under `<root>/<wallet_id>/`
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn wallet_dir(&self, wallet_id: &str) -> Result<PathBuf, StorageError> {
        let valid = !wallet_id.is_empty()
            && wallet_id != "."
            && wallet_id != ".."
            && wallet_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidWalletId(wallet_id.to_string()));
        }
        Ok(self.root.join(wallet_id))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so a crash never leaves half a record.
    /// Each write gets its own temp file so concurrent writers never share one.
    async fn write_json<T: Serialize + ?Sized>(
        path: &Path,
        value: &T,
    ) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_vec_pretty(value)?;
        let tmp = temp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, contents).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{:016x}.tmp", name, rand::random::<u64>()))
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn store_key_pair(&self, key: &StoredKeyPair) -> Result<(), StorageError> {
        let path = self.wallet_dir(&key.wallet_id)?.join(KEY_FILE);
        Self::write_json(&path, key).await
    }

    async fn retrieve_key_pair(
        &self,
        wallet_id: &str,
    ) -> Result<Option<StoredKeyPair>, StorageError> {
        Self::read_json(&self.wallet_dir(wallet_id)?.join(KEY_FILE)).await
    }

    async fn store_proof(&self, proof: &PolProof) -> Result<(), StorageError> {
        let path = self.wallet_dir(&proof.wallet_id)?.join(PROOFS_FILE);
        let mut proofs: Vec<PolProof> = Self::read_json(&path).await?.unwrap_or_default();
        push_proof(&mut proofs, proof.clone());
        Self::write_json(&path, &proofs).await
    }

    async fn retrieve_proofs(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<Vec<PolProof>, StorageError> {
        let path = self.wallet_dir(wallet_id)?.join(PROOFS_FILE);
        let proofs: Vec<PolProof> = Self::read_json(&path).await?.unwrap_or_default();
        Ok(newest_first(&proofs, limit))
    }

    async fn store_config(
        &self,
        wallet_id: &str,
        config: &WalletConfig,
    ) -> Result<(), StorageError> {
        let path = self.wallet_dir(wallet_id)?.join(CONFIG_FILE);
        Self::write_json(&path, config).await
    }

    async fn retrieve_config(&self, wallet_id: &str) -> Result<Option<WalletConfig>, StorageError> {
        Self::read_json(&self.wallet_dir(wallet_id)?.join(CONFIG_FILE)).await
    }

    async fn store_trigger(&self, trigger: &RecoveryTrigger) -> Result<(), StorageError> {
        let path = self.wallet_dir(&trigger.wallet_id)?.join(TRIGGER_FILE);
        Self::write_json(&path, trigger).await
    }

    async fn retrieve_trigger(
        &self,
        wallet_id: &str,
    ) -> Result<Option<RecoveryTrigger>, StorageError> {
        Self::read_json(&self.wallet_dir(wallet_id)?.join(TRIGGER_FILE)).await
    }

    async fn clear_storage(&self, wallet_id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.wallet_dir(wallet_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
