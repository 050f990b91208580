//! Server API seam.
//!
//! The manager talks to the liveness server only through [`ProofTransport`].
//! [`InMemoryServer`] is a scriptable implementation that verifies proofs the
//! way a real server would.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::clock::Clock;
use crate::signature::SignatureVerifier;
use crate::types::{Enrollment, PolProof, RecoveryTrigger};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Reply to every server call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    /// Call-specific payload (status, proof list)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[async_trait]
pub trait ProofTransport: Send + Sync {
    async fn submit_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError>;

    async fn get_status(&self, wallet_id: &str) -> Result<ApiResponse, TransportError>;

    async fn get_proofs(&self, wallet_id: &str, limit: usize)
        -> Result<ApiResponse, TransportError>;

    async fn enroll_wallet(&self, enrollment: &Enrollment) -> Result<ApiResponse, TransportError>;

    async fn revoke_enrollment(&self, wallet_id: &str) -> Result<ApiResponse, TransportError>;

    async fn trigger_recovery(&self, trigger: &RecoveryTrigger)
        -> Result<ApiResponse, TransportError>;

    async fn verify_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError>;
}

// ============================================================================
// In-memory server
// ============================================================================

#[derive(Default)]
struct ServerState {
    enrollments: HashMap<String, Enrollment>,
    proofs: HashMap<String, Vec<PolProof>>,
    seen_challenges: HashSet<String>,
    triggers: HashMap<String, Vec<RecoveryTrigger>>,
    offline: bool,
    fail_submissions: bool,
    failures_remaining: usize,
    delay: Option<Duration>,
}

/// Server double with scriptable outages.
///
/// Proofs are checked against the enrolled key, the drift window and
/// challenge reuse, so a broken client is rejected here too.
pub struct InMemoryServer {
    clock: Arc<dyn Clock>,
    verifier: SignatureVerifier,
    state: Mutex<ServerState>,
    submit_attempts: AtomicUsize,
}

impl InMemoryServer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            verifier: SignatureVerifier::new(300),
            state: Mutex::new(ServerState::default()),
            submit_attempts: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call fails with a connection error while offline
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Only proof submission fails; enrollment and triggers still go through
    pub fn fail_submissions(&self, fail: bool) {
        self.state().fail_submissions = fail;
    }

    /// The next `n` calls fail with a connection error
    pub fn fail_next(&self, n: usize) {
        self.state().failures_remaining = n;
    }

    /// Delay every reply
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn accepted_proofs(&self, wallet_id: &str) -> Vec<PolProof> {
        self.state().proofs.get(wallet_id).cloned().unwrap_or_default()
    }

    pub fn triggers(&self, wallet_id: &str) -> Vec<RecoveryTrigger> {
        self.state().triggers.get(wallet_id).cloned().unwrap_or_default()
    }

    pub fn is_enrolled(&self, wallet_id: &str) -> bool {
        self.state().enrollments.contains_key(wallet_id)
    }

    /// Simulated latency and outages, applied before each call
    async fn gate(&self, submission: bool) -> Result<(), TransportError> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.offline {
            return Err(TransportError::Connection("server unreachable".into()));
        }
        if submission && state.fail_submissions {
            return Err(TransportError::Connection("proof endpoint unreachable".into()));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransportError::Connection("injected failure".into()));
        }
        Ok(())
    }

    fn check_proof(&self, state: &ServerState, proof: &PolProof) -> Result<(), String> {
        let enrollment = state
            .enrollments
            .get(&proof.wallet_id)
            .ok_or_else(|| format!("wallet {} is not enrolled", proof.wallet_id))?;
        if enrollment.public_key != proof.public_key {
            return Err("proof key does not match enrollment".into());
        }
        self.verifier
            .verify_proof(proof, self.clock.now())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ProofTransport for InMemoryServer {
    async fn submit_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        self.gate(true).await?;

        let mut state = self.state();
        if let Err(reason) = self.check_proof(&state, proof) {
            return Ok(ApiResponse::rejected(reason));
        }
        if !state.seen_challenges.insert(proof.challenge.clone()) {
            return Ok(ApiResponse::rejected("challenge already answered"));
        }
        state
            .proofs
            .entry(proof.wallet_id.clone())
            .or_default()
            .push(proof.clone());
        Ok(ApiResponse::ok("proof accepted"))
    }

    async fn get_status(&self, wallet_id: &str) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let state = self.state();
        let Some(enrollment) = state.enrollments.get(wallet_id) else {
            return Ok(ApiResponse::rejected("not enrolled"));
        };
        let last_proof = state
            .proofs
            .get(wallet_id)
            .and_then(|p| p.last())
            .map(|p| p.timestamp);
        let triggered = state.triggers.contains_key(wallet_id);
        Ok(ApiResponse::ok("status").with_data(serde_json::json!({
            "wallet_id": wallet_id,
            "display_name": enrollment.display_name,
            "last_proof_timestamp": last_proof,
            "recovery_triggered": triggered,
        })))
    }

    async fn get_proofs(
        &self,
        wallet_id: &str,
        limit: usize,
    ) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let state = self.state();
        let proofs: Vec<&PolProof> = state
            .proofs
            .get(wallet_id)
            .map(|p| p.iter().rev().take(limit).collect())
            .unwrap_or_default();
        let data = serde_json::to_value(proofs).map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(ApiResponse::ok("proofs").with_data(data))
    }

    async fn enroll_wallet(&self, enrollment: &Enrollment) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let mut state = self.state();
        if let Some(existing) = state.enrollments.get(&enrollment.wallet_id) {
            if existing.public_key != enrollment.public_key {
                return Ok(ApiResponse::rejected("wallet already enrolled with another key"));
            }
        }
        state
            .enrollments
            .insert(enrollment.wallet_id.clone(), enrollment.clone());
        Ok(ApiResponse::ok("enrolled"))
    }

    async fn revoke_enrollment(&self, wallet_id: &str) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let mut state = self.state();
        if state.enrollments.remove(wallet_id).is_none() {
            return Ok(ApiResponse::rejected("not enrolled"));
        }
        state.proofs.remove(wallet_id);
        Ok(ApiResponse::ok("revoked"))
    }

    async fn trigger_recovery(
        &self,
        trigger: &RecoveryTrigger,
    ) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let mut state = self.state();
        if !state.enrollments.contains_key(&trigger.wallet_id) {
            return Ok(ApiResponse::rejected("not enrolled"));
        }
        state
            .triggers
            .entry(trigger.wallet_id.clone())
            .or_default()
            .push(trigger.clone());
        Ok(ApiResponse::ok("recovery triggered"))
    }

    async fn verify_proof(&self, proof: &PolProof) -> Result<ApiResponse, TransportError> {
        self.gate(false).await?;
        let state = self.state();
        match self.check_proof(&state, proof) {
            Ok(()) => Ok(ApiResponse::ok("valid")),
            Err(reason) => Ok(ApiResponse::rejected(reason)),
        }
    }
}
