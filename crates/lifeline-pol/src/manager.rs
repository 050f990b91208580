//! Proof-of-Life state machine.
//!
//! ```text
//! Uninitialized → Initialized → Enrolled → Active ⇄ Missed → Escalated → RecoveryTriggered
//!                                   │
//!                                   └────────────── Missed (no proof ever landed)
//! any non-terminal enrolled state → Revoked
//! ```
//!
//! A [`PolManager`] is a cheap handle; clones share one wallet session.
//! Check-ins for the wallet are serialized by a gate that rejects a second
//! concurrent attempt. Status lives behind a plain mutex that is never held
//! across an await, and events are published while it is held so subscribers
//! see them in the order the state changed.

use async_trait::async_trait;
use lifeline_inherit::{build_recovery_script, RecoveryError, RecoveryScriptSpec, Timelock};
use secp256k1::XOnlyPublicKey;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use zeroize::Zeroizing;

use crate::challenge::ChallengeStore;
use crate::clock::{Clock, SystemClock};
use crate::config::PolConfig;
use crate::error::PolError;
use crate::events::{PolEvent, EVENT_CHANNEL_CAPACITY};
use crate::guardians::GuardianRegistry;
use crate::heartbeat::{evaluate_heartbeat, HeartbeatStatus};
use crate::keys::KeyPairManager;
use crate::scheduler::{self, CheckInTarget, HeartbeatScheduler, MissCause};
use crate::signature::{expected_response, SignatureVerifier};
use crate::storage::StorageBackend;
use crate::transport::{ApiResponse, ProofTransport, TransportError};
use crate::types::{
    random_id, Challenge, Enrollment, GuardianConfig, PolProof, PolState, PolStatus, ProofKind,
    RecoveryTrigger, WalletConfig,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the device can do. Enrollment needs both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Somewhere to keep the encrypted device key
    pub secure_storage: bool,
    /// secp256k1 Schnorr signing
    pub schnorr_signing: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            secure_storage: true,
            schnorr_signing: true,
        }
    }
}

impl DeviceCapabilities {
    pub fn supports_enrollment(&self) -> bool {
        self.missing().is_none()
    }

    fn missing(&self) -> Option<&'static str> {
        if !self.secure_storage {
            Some("no secure key storage")
        } else if !self.schnorr_signing {
            Some("no Schnorr signing support")
        } else {
            None
        }
    }
}

struct Inner {
    wallet_id: String,
    config: PolConfig,
    transport: Arc<dyn ProofTransport>,
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    capabilities: DeviceCapabilities,
    keys: KeyPairManager,
    verifier: SignatureVerifier,
    challenges: ChallengeStore,
    scheduler: HeartbeatScheduler,
    status: Mutex<PolStatus>,
    enrollment: Mutex<Option<Enrollment>>,
    guardians: Mutex<GuardianRegistry>,
    check_in_gate: tokio::sync::Mutex<()>,
    trigger: tokio::sync::Mutex<Option<RecoveryTrigger>>,
    /// Serializes config writes so the newest snapshot is written last
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<PolEvent>,
}

impl Inner {
    fn emit(&self, event: PolEvent) {
        // No subscribers is fine
        self.events.send(event).ok();
    }

    fn state(&self) -> PolState {
        lock(&self.status).state
    }

    /// Fails unless the wallet is enrolled and not finished
    fn require_enrolled(&self, action: &'static str) -> Result<PolState, PolError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(PolError::InvalidTransition {
                from: state,
                action,
            });
        }
        if !state.is_enrolled() {
            return Err(PolError::NotEnrolled(self.wallet_id.clone()));
        }
        Ok(state)
    }

    /// Server call with the request timeout. A rejected reply maps through `rejected`.
    async fn request<F>(
        &self,
        op: &str,
        rejected: fn(String) -> PolError,
        call: F,
    ) -> Result<ApiResponse, PolError>
    where
        F: Future<Output = Result<ApiResponse, TransportError>>,
    {
        let response = tokio::time::timeout(self.config.request_timeout(), call)
            .await
            .map_err(|_| TransportError::Timeout(self.config.request_timeout_secs))??;
        if !response.success {
            return Err(rejected(format!("{} rejected: {}", op, response.message)));
        }
        Ok(response)
    }

    fn snapshot(&self) -> WalletConfig {
        let enrollment = lock(&self.enrollment).clone();
        let status = lock(&self.status).clone();
        let guardians = lock(&self.guardians).list();
        WalletConfig {
            pol: self.config.clone(),
            enrollment,
            status: Some(status),
            guardians,
        }
    }

    async fn persist(&self) -> Result<(), PolError> {
        let _writing = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        self.storage.store_config(&self.wallet_id, &snapshot).await?;
        Ok(())
    }

    async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            log::error!("[{}] Failed to persist status: {}", self.wallet_id, e);
        }
    }

    fn record_success(&self, proof: &PolProof) {
        let mut status = lock(&self.status);
        if status.state.is_terminal() {
            log::warn!(
                "[{}] Proof {} landed after monitoring ended ({})",
                self.wallet_id,
                proof.id,
                status.state
            );
            return;
        }
        status.state = PolState::Active;
        status.last_proof_timestamp = Some(proof.timestamp);
        status.next_check_in = Some(proof.timestamp + self.config.check_in_interval_secs);
        status.missed_count = 0;
        status.escalation_level = 0;
        status.guardian_notifications = 0;
        status.missed_since = None;
        status.last_escalation_at = None;
        self.emit(PolEvent::CheckInSucceeded {
            wallet_id: self.wallet_id.clone(),
            proof_id: proof.id.clone(),
            kind: proof.proof_type,
            timestamp: proof.timestamp,
        });
    }

    /// Raise the escalation level once per elapsed grace period and trigger
    /// recovery when it passes the final level.
    async fn evaluate_escalation(&self, now: u64) -> Result<(), PolError> {
        let grace = self.config.grace_period_secs;
        let final_level = self.config.final_escalation_level;

        let (changed, exhausted, level) = {
            let recipients = lock(&self.guardians).escalation_recipients();
            let mut status = lock(&self.status);
            if !matches!(status.state, PolState::Missed | PolState::Escalated) {
                return Ok(());
            }

            let mut changed = false;
            while status.escalation_level <= final_level {
                let Some(base) = status.last_escalation_at.or(status.missed_since) else {
                    break;
                };
                let due = base + grace;
                if now < due {
                    break;
                }
                status.escalation_level += 1;
                status.last_escalation_at = Some(due);
                status.state = PolState::Escalated;
                status.guardian_notifications += recipients.len() as u32;
                changed = true;

                log::warn!(
                    "[{}] Escalated to level {} ({} guardians notified)",
                    self.wallet_id,
                    status.escalation_level,
                    recipients.len()
                );
                self.emit(PolEvent::Escalated {
                    wallet_id: self.wallet_id.clone(),
                    level: status.escalation_level,
                    guardians: recipients.clone(),
                });
            }
            (changed, status.escalation_level > final_level, status.escalation_level)
        };

        if changed {
            self.persist().await?;
        }
        if exhausted {
            let reason = format!(
                "escalation level {} passed final level {} without proof of life",
                level, final_level
            );
            self.trigger_on_exhaustion(&reason).await?;
        }
        Ok(())
    }

    fn escalation_exhausted(&self) -> bool {
        let status = lock(&self.status);
        status.state == PolState::Escalated
            && status.escalation_level > self.config.final_escalation_level
    }

    /// Trigger recovery for an exhausted escalation, unless a proof landed
    /// since the level was raised.
    ///
    /// Holds the check-in gate, so no proof can be accepted between the
    /// recheck and the trigger reaching the server.
    async fn trigger_on_exhaustion(&self, reason: &str) -> Result<(), PolError> {
        let _gate = self.check_in_gate.lock().await;
        let mut slot = self.trigger.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        if !self.escalation_exhausted() {
            log::info!(
                "[{}] Proof landed before recovery was due; not triggering",
                self.wallet_id
            );
            return Ok(());
        }
        self.fire_trigger(&mut slot, reason).await?;
        Ok(())
    }

    async fn trigger_recovery(&self, reason: &str) -> Result<RecoveryTrigger, PolError> {
        let mut slot = self.trigger.lock().await;
        if let Some(existing) = slot.as_ref() {
            log::debug!(
                "[{}] Recovery already triggered ({})",
                self.wallet_id,
                existing.trigger_id
            );
            return Ok(existing.clone());
        }
        self.fire_trigger(&mut slot, reason).await
    }

    async fn fire_trigger(
        &self,
        slot: &mut Option<RecoveryTrigger>,
        reason: &str,
    ) -> Result<RecoveryTrigger, PolError> {
        self.require_enrolled("trigger recovery")?;

        let trigger = RecoveryTrigger::new(&self.wallet_id, reason, self.clock.now());
        self.request(
            "trigger recovery",
            PolError::Validation,
            self.transport.trigger_recovery(&trigger),
        )
        .await?;
        self.storage.store_trigger(&trigger).await?;
        *slot = Some(trigger.clone());

        {
            let mut status = lock(&self.status);
            status.state = PolState::RecoveryTriggered;
            status.next_check_in = None;
            self.emit(PolEvent::RecoveryTriggered {
                wallet_id: self.wallet_id.clone(),
                trigger: trigger.clone(),
            });
        }
        log::warn!(
            "[{}] Recovery triggered ({}): {}",
            self.wallet_id,
            trigger.trigger_id,
            reason
        );
        self.persist().await?;
        Ok(trigger)
    }
}

#[async_trait]
impl CheckInTarget for Inner {
    fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Challenge, sign, verify locally, submit, record.
    async fn check_in_once(&self, kind: ProofKind) -> Result<PolProof, PolError> {
        let _gate = self
            .check_in_gate
            .try_lock()
            .map_err(|_| PolError::CheckInInProgress(self.wallet_id.clone()))?;
        self.require_enrolled("check in")?;

        let now = self.clock.now();
        self.challenges.purge_expired(now);
        let challenge = self.challenges.generate_challenge(&self.wallet_id, now);

        let signature = self
            .keys
            .sign(&PolProof::signed_message(&challenge.id, now))?
            .serialize();
        let response = expected_response(&signature, &challenge.id, now);
        self.challenges
            .verify_challenge_response(&challenge.id, &response, &signature, now, now)?;

        let public_key = self
            .keys
            .public_key()
            .ok_or_else(|| PolError::Crypto("No device key loaded".into()))?;
        let mut metadata = BTreeMap::new();
        if let Some(enrollment) = lock(&self.enrollment).as_ref() {
            metadata.insert("key_id".to_string(), enrollment.key_id.clone());
        }

        let proof = PolProof {
            id: random_id(),
            wallet_id: self.wallet_id.clone(),
            timestamp: now,
            challenge: challenge.id,
            signature: hex::encode(signature),
            public_key: public_key.to_string(),
            proof_type: kind,
            metadata,
        };
        self.verifier.verify_proof(&proof, now)?;

        self.request(
            "submit proof",
            PolError::Authentication,
            self.transport.submit_proof(&proof),
        )
        .await?;
        self.storage.store_proof(&proof).await?;
        {
            // A trigger in flight finishes first; the proof then lands on a terminal state
            let _trigger = self.trigger.lock().await;
            self.record_success(&proof);
        }
        self.persist_or_log().await;

        log::info!("[{}] {} check-in recorded ({})", self.wallet_id, kind, proof.id);
        Ok(proof)
    }

    async fn tick_missed(&self, cause: MissCause) {
        if !self.state().is_enrolled() {
            return;
        }
        let now = self.clock.now();

        let (error, retryable) = match &cause {
            MissCause::TimedOut => ("tick window elapsed without a proof".to_string(), true),
            MissCause::Failed(e) => (e.to_string(), e.is_retryable()),
        };
        if retryable {
            log::warn!("[{}] Scheduled check-in missed: {}", self.wallet_id, error);
        } else {
            log::error!("[{}] Scheduled check-in failed: {}", self.wallet_id, error);
        }

        {
            let mut status = lock(&self.status);
            self.emit(PolEvent::CheckInFailed {
                wallet_id: self.wallet_id.clone(),
                error,
                retryable,
            });

            status.missed_count += 1;
            status.next_check_in = Some(now + self.config.check_in_interval_secs);
            if status.missed_count > self.config.missed_threshold
                && matches!(status.state, PolState::Active | PolState::Enrolled)
            {
                status.state = PolState::Missed;
                status.missed_since = Some(now);
                log::warn!(
                    "[{}] Marked missed after {} missed check-ins",
                    self.wallet_id,
                    status.missed_count
                );
                self.emit(PolEvent::Missed {
                    wallet_id: self.wallet_id.clone(),
                    missed_count: status.missed_count,
                    since: now,
                });
            }
        }
        self.persist_or_log().await;

        if let Err(e) = self.evaluate_escalation(now).await {
            log::error!("[{}] Escalation failed: {}", self.wallet_id, e);
        }
    }
}

/// Handle to one wallet's liveness session
#[derive(Clone)]
pub struct PolManager {
    inner: Arc<Inner>,
}

impl PolManager {
    pub fn builder(wallet_id: impl Into<String>) -> PolManagerBuilder {
        PolManagerBuilder::new(wallet_id)
    }

    pub fn wallet_id(&self) -> &str {
        &self.inner.wallet_id
    }

    pub fn config(&self) -> &PolConfig {
        &self.inner.config
    }

    /// Load persisted state. Restores an existing enrollment, its device key,
    /// guardians and any outstanding recovery trigger.
    pub async fn initialize(&self) -> Result<PolState, PolError> {
        let inner = &self.inner;
        let state = inner.state();
        if state != PolState::Uninitialized {
            return Err(PolError::InvalidTransition {
                from: state,
                action: "initialize",
            });
        }

        let stored = inner.storage.retrieve_config(&inner.wallet_id).await?;
        let Some(stored) = stored.filter(|c| c.enrollment.is_some()) else {
            lock(&inner.status).state = PolState::Initialized;
            log::info!("[{}] Initialized (not enrolled)", inner.wallet_id);
            return Ok(PolState::Initialized);
        };

        // Never generate here: a missing or unreadable key must surface
        inner.keys.load_key_pair(&inner.wallet_id).await?;
        let guardians = GuardianRegistry::from_configs(stored.guardians)?;
        let trigger = inner.storage.retrieve_trigger(&inner.wallet_id).await?;

        if stored.pol != inner.config {
            log::warn!(
                "[{}] Stored PoL config differs from the configured one; using the configured one",
                inner.wallet_id
            );
        }

        let mut status = stored
            .status
            .unwrap_or_else(|| PolStatus::new(&inner.wallet_id));
        if !status.state.is_enrolled() && !status.state.is_terminal() {
            status.state = PolState::Enrolled;
        }
        if trigger.is_some() {
            status.state = PolState::RecoveryTriggered;
        }
        let state = status.state;

        *inner.trigger.lock().await = trigger;
        *lock(&inner.guardians) = guardians;
        *lock(&inner.enrollment) = stored.enrollment;
        *lock(&inner.status) = status;

        log::info!("[{}] Restored enrollment ({})", inner.wallet_id, state);
        Ok(state)
    }

    /// Enroll this device for the wallet
    pub async fn enroll(
        &self,
        display_name: &str,
        verified: bool,
    ) -> Result<Enrollment, PolError> {
        let inner = &self.inner;
        let state = inner.state();
        if state != PolState::Initialized {
            return Err(PolError::InvalidTransition {
                from: state,
                action: "enroll",
            });
        }
        if let Some(missing) = inner.capabilities.missing() {
            return Err(PolError::EnrollmentUnsupported(missing.to_string()));
        }

        let key = inner
            .keys
            .get_or_generate_key_pair(&inner.wallet_id, inner.clock.now())
            .await?;
        let enrollment = Enrollment {
            wallet_id: inner.wallet_id.clone(),
            display_name: display_name.to_string(),
            public_key: key.public_key,
            key_id: key.key_id,
            verified,
            enrolled_at: inner.clock.now(),
        };
        inner
            .request(
                "enroll wallet",
                PolError::Validation,
                inner.transport.enroll_wallet(&enrollment),
            )
            .await?;

        *lock(&inner.enrollment) = Some(enrollment.clone());
        {
            let mut status = lock(&inner.status);
            *status = PolStatus::new(&inner.wallet_id);
            status.state = PolState::Enrolled;
        }
        inner.persist().await?;

        log::info!(
            "[{}] Enrolled device key {} as '{}'",
            inner.wallet_id,
            enrollment.key_id,
            display_name
        );
        Ok(enrollment)
    }

    /// Start scheduled check-ins. Returns `false` if already running.
    pub async fn start_monitoring(&self) -> Result<bool, PolError> {
        self.inner.require_enrolled("start monitoring")?;
        let started = self.inner.scheduler.start(&self.inner);
        if started {
            lock(&self.inner.status).next_check_in = Some(self.inner.clock.now());
            log::info!(
                "[{}] Monitoring started (every {}s)",
                self.inner.wallet_id,
                self.inner.config.check_in_interval_secs
            );
        }
        Ok(started)
    }

    /// Cancel pending ticks. Status is left as it is.
    pub fn stop_monitoring(&self) -> bool {
        let stopped = self.inner.scheduler.stop();
        if stopped {
            log::info!("[{}] Monitoring stopped", self.inner.wallet_id);
        }
        stopped
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    /// One check-in attempt, no retries
    pub async fn perform_check_in(&self, kind: ProofKind) -> Result<PolProof, PolError> {
        self.inner.check_in_once(kind).await
    }

    /// Check in, retrying transport failures per the retry policy
    pub async fn check_in_with_retry(&self, kind: ProofKind) -> Result<PolProof, PolError> {
        scheduler::perform_check_in(&*self.inner, kind, &self.inner.config.retry).await
    }

    pub async fn perform_emergency_check_in(&self) -> Result<PolProof, PolError> {
        scheduler::perform_emergency_check_in(&*self.inner, &self.inner.config.retry).await
    }

    /// Current status, after applying any escalation that is due
    pub async fn status(&self) -> Result<PolStatus, PolError> {
        self.inner.evaluate_escalation(self.inner.clock.now()).await?;
        Ok(lock(&self.inner.status).clone())
    }

    pub fn heartbeat(&self) -> HeartbeatStatus {
        let status = lock(&self.inner.status).clone();
        evaluate_heartbeat(
            &status,
            self.inner.config.check_in_interval_secs,
            self.inner.clock.now(),
            &self.inner.config.heartbeat,
        )
    }

    /// Start guardian recovery. Returns the outstanding trigger if there is one.
    pub async fn trigger_recovery(&self, reason: &str) -> Result<RecoveryTrigger, PolError> {
        self.inner.trigger_recovery(reason).await
    }

    pub async fn recovery_trigger(&self) -> Option<RecoveryTrigger> {
        self.inner.trigger.lock().await.clone()
    }

    /// Revoke the enrollment and wipe local state. Irreversible.
    pub async fn revoke_enrollment(&self) -> Result<(), PolError> {
        let inner = &self.inner;
        inner.require_enrolled("revoke enrollment")?;

        let was_monitoring = inner.scheduler.stop();
        let revoked = inner
            .request(
                "revoke enrollment",
                PolError::Validation,
                inner.transport.revoke_enrollment(&inner.wallet_id),
            )
            .await;
        if let Err(e) = revoked {
            if was_monitoring {
                inner.scheduler.start(inner);
            }
            return Err(e);
        }

        inner.storage.clear_storage(&inner.wallet_id).await?;
        inner.keys.forget();
        inner.challenges.clear();
        *lock(&inner.enrollment) = None;
        lock(&inner.guardians).clear();
        {
            let mut status = lock(&inner.status);
            *status = PolStatus::new(&inner.wallet_id);
            status.state = PolState::Revoked;
            inner.emit(PolEvent::Revoked {
                wallet_id: inner.wallet_id.clone(),
            });
        }
        log::warn!("[{}] Enrollment revoked", inner.wallet_id);
        Ok(())
    }

    /// Stored proofs, newest first
    pub async fn proofs(&self, limit: usize) -> Result<Vec<PolProof>, PolError> {
        Ok(self
            .inner
            .storage
            .retrieve_proofs(&self.inner.wallet_id, limit)
            .await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PolEvent> {
        self.inner.events.subscribe()
    }

    pub fn generate_challenge(&self) -> Challenge {
        self.inner
            .challenges
            .generate_challenge(&self.inner.wallet_id, self.inner.clock.now())
    }

    pub fn verify_challenge_response(
        &self,
        challenge_id: &str,
        response: &[u8],
        signature: &[u8],
        timestamp: u64,
    ) -> Result<Challenge, PolError> {
        self.inner.challenges.verify_challenge_response(
            challenge_id,
            response,
            signature,
            timestamp,
            self.inner.clock.now(),
        )
    }

    pub async fn add_guardian(&self, guardian: GuardianConfig) -> Result<(), PolError> {
        let state = self.inner.state();
        if state.is_terminal() {
            return Err(PolError::InvalidTransition {
                from: state,
                action: "add a guardian",
            });
        }
        let guardian_id = guardian.guardian_id.clone();
        lock(&self.inner.guardians).add(guardian)?;
        self.inner.emit(PolEvent::GuardianAdded {
            wallet_id: self.inner.wallet_id.clone(),
            guardian_id: guardian_id.clone(),
        });
        self.inner.persist().await?;
        log::info!("[{}] Guardian {} added", self.inner.wallet_id, guardian_id);
        Ok(())
    }

    pub async fn remove_guardian(&self, guardian_id: &str) -> Result<GuardianConfig, PolError> {
        let removed = lock(&self.inner.guardians).remove(guardian_id)?;
        self.inner.emit(PolEvent::GuardianRemoved {
            wallet_id: self.inner.wallet_id.clone(),
            guardian_id: guardian_id.to_string(),
        });
        self.inner.persist().await?;
        log::info!("[{}] Guardian {} removed", self.inner.wallet_id, guardian_id);
        Ok(removed)
    }

    pub fn guardians(&self) -> Vec<GuardianConfig> {
        lock(&self.inner.guardians).list()
    }

    /// CSV timelock matching this wallet's escalation deadline
    pub fn recovery_timelock(&self) -> Result<Timelock, PolError> {
        self.inner
            .config
            .recovery_timelock()
            .map_err(|e| PolError::Recovery(RecoveryError::from(e)))
    }

    /// Recovery output for the current guardian set, timelocked to the
    /// escalation deadline
    pub fn recovery_script(
        &self,
        owner_internal_key: XOnlyPublicKey,
        threshold: usize,
    ) -> Result<RecoveryScriptSpec, PolError> {
        let guardian_keys = lock(&self.inner.guardians).public_keys()?;
        let timelock = self.recovery_timelock()?;
        Ok(build_recovery_script(
            owner_internal_key,
            &guardian_keys,
            threshold,
            timelock,
        )?)
    }

    /// Status as the server sees it
    pub async fn remote_status(&self) -> Result<ApiResponse, PolError> {
        self.inner
            .request(
                "get status",
                PolError::Validation,
                self.inner.transport.get_status(&self.inner.wallet_id),
            )
            .await
    }

    /// Proofs as the server has them
    pub async fn remote_proofs(&self, limit: usize) -> Result<ApiResponse, PolError> {
        self.inner
            .request(
                "get proofs",
                PolError::Validation,
                self.inner.transport.get_proofs(&self.inner.wallet_id, limit),
            )
            .await
    }

    /// Ask the server to check a proof
    pub async fn remote_verify(&self, proof: &PolProof) -> Result<(), PolError> {
        self.inner
            .request(
                "verify proof",
                PolError::Authentication,
                self.inner.transport.verify_proof(proof),
            )
            .await
            .map(|_| ())
    }
}

/// Wires a [`PolManager`] to its collaborators
pub struct PolManagerBuilder {
    wallet_id: String,
    config: PolConfig,
    transport: Option<Arc<dyn ProofTransport>>,
    storage: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
    passphrase: Option<Zeroizing<String>>,
    capabilities: DeviceCapabilities,
}

impl PolManagerBuilder {
    pub fn new(wallet_id: impl Into<String>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            config: PolConfig::default(),
            transport: None,
            storage: None,
            clock: None,
            passphrase: None,
            capabilities: DeviceCapabilities::default(),
        }
    }

    pub fn config(mut self, config: PolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ProofTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Passphrase protecting the device key at rest
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn build(self) -> Result<PolManager, PolError> {
        if self.wallet_id.trim().is_empty() {
            return Err(PolError::Validation("wallet_id must not be empty".into()));
        }
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| PolError::Validation("a proof transport is required".into()))?;
        let storage = self
            .storage
            .ok_or_else(|| PolError::Validation("a storage backend is required".into()))?;
        let passphrase = self
            .passphrase
            .ok_or_else(|| PolError::Validation("a device passphrase is required".into()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let config = self.config;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            keys: KeyPairManager::new(storage.clone(), passphrase.as_str(), config.kdf),
            verifier: SignatureVerifier::new(config.drift_window_secs),
            challenges: ChallengeStore::new(config.challenge_ttl_secs)
                .with_tombstone_retention(config.drift_window_secs + config.check_in_interval_secs),
            scheduler: HeartbeatScheduler::new(
                config.check_in_interval(),
                config.tick_window(),
                config.retry,
            ),
            status: Mutex::new(PolStatus::new(&self.wallet_id)),
            enrollment: Mutex::new(None),
            guardians: Mutex::new(GuardianRegistry::new()),
            check_in_gate: tokio::sync::Mutex::new(()),
            trigger: tokio::sync::Mutex::new(None),
            persist_lock: tokio::sync::Mutex::new(()),
            events,
            wallet_id: self.wallet_id,
            config,
            transport,
            storage,
            clock,
            capabilities: self.capabilities,
        };
        Ok(PolManager {
            inner: Arc::new(inner),
        })
    }
}
