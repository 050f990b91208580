//! Periodic check-in driver.
//!
//! One tokio task per wallet. Ticks run one after another: a tick that has not
//! produced a proof within the tick window is dropped and reported as missed,
//! so a slow server can never leave two check-ins outstanding.
//!
//! The task only holds a `Weak` to its target and exits once the target is
//! gone or has reached a terminal state.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::RetryPolicy;
use crate::error::PolError;
use crate::types::{PolProof, ProofKind};

/// Why a tick produced no proof
#[derive(Debug)]
pub enum MissCause {
    /// The tick window ran out
    TimedOut,
    /// The last attempt failed
    Failed(PolError),
}

/// What the scheduler drives
#[async_trait]
pub trait CheckInTarget: Send + Sync + 'static {
    fn wallet_id(&self) -> &str;

    /// Monitoring has ended for good (recovery triggered, revoked)
    fn is_finished(&self) -> bool;

    /// A single check-in attempt
    async fn check_in_once(&self, kind: ProofKind) -> Result<PolProof, PolError>;

    /// Record a tick that produced no proof
    async fn tick_missed(&self, cause: MissCause);
}

/// Run a check-in, retrying transport failures with exponential backoff.
///
/// Only retryable errors are retried; anything else returns at once.
pub async fn perform_check_in<T: CheckInTarget + ?Sized>(
    target: &T,
    kind: ProofKind,
    retry: &RetryPolicy,
) -> Result<PolProof, PolError> {
    let mut attempt = 1;
    loop {
        match target.check_in_once(kind).await {
            Ok(proof) => return Ok(proof),
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                log::warn!(
                    "[{}] Check-in attempt {}/{} failed: {}. Retrying in {}s",
                    target.wallet_id(),
                    attempt,
                    retry.max_attempts,
                    e,
                    delay.as_secs()
                );
                drop(e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Emergency check-in with the same retry rules
pub async fn perform_emergency_check_in<T: CheckInTarget + ?Sized>(
    target: &T,
    retry: &RetryPolicy,
) -> Result<PolProof, PolError> {
    perform_check_in(target, ProofKind::Emergency, retry).await
}

pub struct HeartbeatScheduler {
    interval: Duration,
    tick_window: Duration,
    retry: RetryPolicy,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration, tick_window: Duration, retry: RetryPolicy) -> Self {
        Self {
            interval,
            tick_window,
            retry,
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Start ticking. The first tick fires immediately.
    ///
    /// Returns `false` if already running.
    pub fn start<T: CheckInTarget>(&self, target: &Arc<T>) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let weak = Arc::downgrade(target);
        let interval = self.interval;
        let window = self.tick_window;
        let retry = self.retry;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(target) = weak.upgrade() else {
                    log::debug!("Check-in target dropped; scheduler exiting");
                    break;
                };
                if target.is_finished() {
                    log::info!("[{}] Monitoring finished; scheduler exiting", target.wallet_id());
                    break;
                }

                let attempt = perform_check_in(&*target, ProofKind::Automatic, &retry);
                match tokio::time::timeout(window, attempt).await {
                    Ok(Ok(proof)) => {
                        log::debug!(
                            "[{}] Scheduled check-in {} recorded",
                            target.wallet_id(),
                            proof.id
                        );
                    }
                    Ok(Err(PolError::CheckInInProgress(_))) => {
                        log::debug!(
                            "[{}] Check-in already in flight; skipping tick",
                            target.wallet_id()
                        );
                    }
                    Ok(Err(e)) => target.tick_missed(MissCause::Failed(e)).await,
                    Err(_) => target.tick_missed(MissCause::TimedOut).await,
                }
            }
        }));
        true
    }

    /// Cancel the pending tick. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        match self.task().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }
}
