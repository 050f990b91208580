//! Lifeline Proof-of-Life
//!
//! Periodic, signed liveness proofs for a wallet owner. When the owner stops
//! checking in, guardians are escalated once per grace period and finally
//! recovery is triggered, which opens the guardians' timelocked script path.
//!
//! # Flow
//!
//! 1. [`PolManager::initialize`] loads any persisted enrollment
//! 2. [`PolManager::enroll`] creates the device key and registers it
//! 3. [`PolManager::start_monitoring`] checks in every interval
//! 4. Missed check-ins move the wallet to `Missed`, then `Escalated`, then
//!    `RecoveryTriggered`
//!
//! Each proof is a BIP-340 Schnorr signature over
//! `SHA256(challenge || timestamp_be)` with the device key.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lifeline_pol::{FileStorage, InMemoryServer, PolManager, ProofKind, SystemClock};
//!
//! # async fn run() -> Result<(), lifeline_pol::PolError> {
//! let manager = PolManager::builder("wallet-1")
//!     .transport(Arc::new(InMemoryServer::new(Arc::new(SystemClock))))
//!     .storage(Arc::new(FileStorage::new("/var/lib/lifeline")))
//!     .passphrase("device passphrase")
//!     .build()?;
//!
//! manager.initialize().await?;
//! manager.enroll("Alice", true).await?;
//! manager.perform_check_in(ProofKind::Manual).await?;
//! manager.start_monitoring().await?;
//! # Ok(())
//! # }
//! ```

pub mod challenge;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod guardians;
pub mod heartbeat;
pub mod keys;
pub mod manager;
pub mod scheduler;
pub mod signature;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports
pub use lifeline_core::KdfParams;
pub use challenge::ChallengeStore;
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{PolConfig, RetryPolicy};
pub use error::PolError;
pub use events::PolEvent;
pub use guardians::GuardianRegistry;
pub use heartbeat::{evaluate_heartbeat, HeartbeatAction, HeartbeatConfig, HeartbeatStatus};
pub use keys::KeyPairManager;
pub use manager::{DeviceCapabilities, PolManager, PolManagerBuilder};
pub use signature::SignatureVerifier;
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};
pub use transport::{ApiResponse, InMemoryServer, ProofTransport, TransportError};
pub use types::{
    Challenge, Enrollment, GuardianConfig, KeyPair, NotificationPreferences, PolProof, PolState,
    PolStatus, ProofKind, RecoveryTrigger, VerificationLevel, WalletConfig,
};
