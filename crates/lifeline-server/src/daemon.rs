//! The daemon loop: keeps one wallet checked in and logs what happens.

use crate::config::ServerConfig;
use crate::http::HttpTransport;
use anyhow::{Context, Result};
use lifeline_inherit::derive_address;
use lifeline_pol::{
    Enrollment, FileStorage, HeartbeatAction, PolEvent, PolManager, PolState, ProofKind,
    ProofTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Wire a manager to the configured server and data directory
pub fn build_manager(
    config: &ServerConfig,
    transport: Arc<dyn ProofTransport>,
) -> Result<PolManager> {
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data dir: {}",
            config.server.data_dir.display()
        )
    })?;

    let manager = PolManager::builder(&config.wallet.wallet_id)
        .config(config.pol.clone())
        .transport(transport)
        .storage(Arc::new(FileStorage::new(&config.server.data_dir)))
        .passphrase(config.wallet.passphrase.as_str())
        .build()?;
    Ok(manager)
}

fn http_transport(config: &ServerConfig) -> Result<Arc<dyn ProofTransport>> {
    let transport = HttpTransport::new(
        &config.api.base_url,
        config.api.auth_token.clone(),
        config.pol.request_timeout(),
    )?;
    Ok(Arc::new(transport))
}

/// Load persisted state and register configured guardians that are missing
async fn open(config: &ServerConfig, transport: Arc<dyn ProofTransport>) -> Result<PolManager> {
    let manager = build_manager(config, transport)?;
    let state = manager
        .initialize()
        .await
        .context("Failed to load wallet state")?;
    log::info!("[{}] Loaded ({})", config.wallet.wallet_id, state);

    if !state.is_terminal() {
        let known: Vec<String> = manager
            .guardians()
            .into_iter()
            .map(|g| g.guardian_id)
            .collect();
        for guardian in &config.recovery.guardians {
            if !known.contains(&guardian.guardian_id) {
                manager
                    .add_guardian(guardian.clone())
                    .await
                    .with_context(|| format!("Failed to add guardian {}", guardian.guardian_id))?;
            }
        }
    }
    Ok(manager)
}

/// Run the daemon. Returns once monitoring has ended (recovery triggered or revoked).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("Lifeline server starting…");
    log::info!("  Wallet:     {}", config.wallet.wallet_id);
    log::info!("  API:        {}", config.api.base_url);
    log::info!(
        "  Interval:   {} seconds ({:.1} days)",
        config.pol.check_in_interval_secs,
        config.pol.check_in_interval_secs as f64 / 86_400.0
    );
    log::info!(
        "  Grace:      {} seconds × {} levels",
        config.pol.grace_period_secs,
        config.pol.final_escalation_level + 1
    );
    log::info!("  Data dir:   {}", config.server.data_dir.display());

    let manager = open(&config, http_transport(&config)?).await?;
    serve(&config, manager).await
}

/// Monitor an opened manager until it reaches a terminal state
pub async fn serve(config: &ServerConfig, manager: PolManager) -> Result<()> {
    let state = manager.status().await?.state;
    if state.is_terminal() {
        log::warn!("[{}] Nothing to monitor ({})", manager.wallet_id(), state);
        return Ok(());
    }
    anyhow::ensure!(
        state.is_enrolled(),
        "Wallet {} is not enrolled. Run with --enroll first.",
        manager.wallet_id()
    );

    let events = tokio::spawn(log_events(manager.subscribe()));
    manager.start_monitoring().await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(config.server.status_interval_secs));
    loop {
        ticker.tick().await;
        let status = match manager.status().await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Status check failed: {}", e);
                continue;
            }
        };
        if status.state.is_terminal() {
            log::warn!("[{}] Monitoring ended ({})", manager.wallet_id(), status.state);
            break;
        }
        log_heartbeat(&manager);
    }

    manager.stop_monitoring();
    events.abort();
    Ok(())
}

fn log_heartbeat(manager: &PolManager) {
    let hb = manager.heartbeat();
    let days = hb.secs_until_due as f64 / 86_400.0;
    match hb.action {
        HeartbeatAction::Healthy => {
            log::info!("[{}] Healthy: next check-in in {:.1} days", hb.wallet_id, days)
        }
        HeartbeatAction::CheckinRecommended => log::info!(
            "[{}] Check-in recommended ({:.0}% of interval elapsed)",
            hb.wallet_id,
            hb.elapsed_fraction * 100.0
        ),
        HeartbeatAction::CheckinRequired => log::warn!(
            "[{}] Check-in required: due in {:.1} days",
            hb.wallet_id,
            days
        ),
        HeartbeatAction::Overdue => {
            log::warn!("[{}] Overdue ({}), guardians are being escalated", hb.wallet_id, hb.state)
        }
    }
}

/// Log every event until the channel closes
async fn log_events(mut rx: broadcast::Receiver<PolEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Event log lagged; {} events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &PolEvent) {
    match event {
        PolEvent::CheckInSucceeded {
            wallet_id,
            proof_id,
            kind,
            ..
        } => log::info!("[{}] ✅ {} check-in accepted ({})", wallet_id, kind, proof_id),
        PolEvent::CheckInFailed {
            wallet_id,
            error,
            retryable,
        } => {
            if *retryable {
                log::warn!("[{}] Check-in failed: {}", wallet_id, error);
            } else {
                log::error!("[{}] Check-in failed: {}", wallet_id, error);
            }
        }
        PolEvent::Missed {
            wallet_id,
            missed_count,
            ..
        } => log::warn!("[{}] ⚠️  Marked missed ({} missed)", wallet_id, missed_count),
        PolEvent::Escalated {
            wallet_id,
            level,
            guardians,
        } => log::warn!(
            "[{}] ⚠️  Escalation level {}: notify {}",
            wallet_id,
            level,
            guardians.join(", ")
        ),
        PolEvent::RecoveryTriggered { wallet_id, trigger } => log::warn!(
            "[{}] 🔴 Recovery triggered ({}): {}",
            wallet_id,
            trigger.trigger_id,
            trigger.reason
        ),
        PolEvent::GuardianAdded {
            wallet_id,
            guardian_id,
        } => log::info!("[{}] Guardian {} added", wallet_id, guardian_id),
        PolEvent::GuardianRemoved {
            wallet_id,
            guardian_id,
        } => log::info!("[{}] Guardian {} removed", wallet_id, guardian_id),
        PolEvent::Revoked { wallet_id } => log::warn!("[{}] Enrollment revoked", wallet_id),
    }
}

/// Check in once and exit
pub async fn run_check(config: &ServerConfig) -> Result<()> {
    let manager = open(config, http_transport(config)?).await?;
    check_once(&manager).await
}

async fn check_once(manager: &PolManager) -> Result<()> {
    let proof = manager
        .check_in_with_retry(ProofKind::Manual)
        .await
        .context("Check-in failed")?;
    log::info!("[{}] Proof {} accepted", manager.wallet_id(), proof.id);
    log_heartbeat(manager);
    Ok(())
}

/// Enroll this device for the configured wallet
pub async fn run_enroll(config: &ServerConfig) -> Result<Enrollment> {
    let manager = open(config, http_transport(config)?).await?;
    enroll(config, &manager).await
}

async fn enroll(config: &ServerConfig, manager: &PolManager) -> Result<Enrollment> {
    let state = manager.status().await?.state;
    anyhow::ensure!(
        state == PolState::Initialized,
        "Wallet {} is already enrolled ({})",
        manager.wallet_id(),
        state
    );
    let enrollment = manager
        .enroll(&config.wallet.display_name, config.wallet.verified)
        .await
        .context("Enrollment failed")?;
    Ok(enrollment)
}

/// Recovery address for the configured owner key and guardians
pub async fn recovery_address(config: &ServerConfig) -> Result<bitcoin::Address> {
    let owner = config
        .recovery
        .owner_key
        .as_deref()
        .context("recovery.owner_key is required for --address")?
        .parse::<bitcoin::XOnlyPublicKey>()
        .context("recovery.owner_key is not a valid x-only public key")?;
    anyhow::ensure!(
        !config.recovery.guardians.is_empty(),
        "No guardians configured in [recovery]"
    );

    let manager = open(config, http_transport(config)?).await?;
    let spec = manager.recovery_script(owner, config.recovery.threshold)?;
    log::info!(
        "Recovery leaf: {}-of-{} guardians after {} blocks",
        spec.guardians.threshold(),
        spec.guardians.keys().len(),
        spec.timelock.blocks()
    );
    Ok(derive_address(&spec, config.network()))
}
