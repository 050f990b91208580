//! End-to-end inheritance flow.
//!
//! 1. Owner enrolls a device and registers three guardians
//! 2. A wallet secret is split 2-of-3 and each share sealed to its guardian
//! 3. The recovery address is timelocked to the liveness deadline and funded
//! 4. The owner goes silent; missed check-ins escalate until recovery triggers
//! 5. Two guardians open their shares and rebuild the secret
//! 6. The same two guardians sweep the recovery address once the CSV matures

use bitcoin::consensus::Encodable;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, TxOut, Txid};
use std::sync::Arc;
use std::time::Duration;

use lifeline_inherit::{
    assemble_recovery_spend, derive_address, plan_recovery_spend, sign_recovery_input,
    RecoveryError, RecoveryUtxo,
};
use lifeline_pol::{
    Clock, GuardianConfig, InMemoryServer, KdfParams, MemoryStorage, PolConfig, PolEvent,
    PolManager, PolState, TokioClock,
};
use lifeline_shamir::{reconstruct_secret, split_for_guardians, unwrap_share};

const ORIGIN: u64 = 1_700_000_000;
const DAY: u64 = 86_400;
const FUNDING_HEIGHT: u32 = 850_000;

fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[0] = 0x02;
    bytes[31] = seed;
    Keypair::from_secret_key(&secp, &SecretKey::from_slice(&bytes).unwrap())
}

fn consensus_verify(tx_bytes: &[u8], spent_outputs: &[TxOut], input_index: usize) {
    let txout = &spent_outputs[input_index];
    let all_utxos: Vec<bitcoinconsensus::Utxo> = spent_outputs
        .iter()
        .map(|o| {
            let sb = o.script_pubkey.as_bytes();
            bitcoinconsensus::Utxo {
                script_pubkey: sb.as_ptr(),
                script_pubkey_len: sb.len() as u32,
                value: o.value.to_sat() as i64,
            }
        })
        .collect();

    let result = bitcoinconsensus::verify(
        txout.script_pubkey.as_bytes(),
        txout.value.to_sat(),
        tx_bytes,
        Some(&all_utxos),
        input_index,
    );
    assert!(
        result.is_ok(),
        "consensus verification failed for input {}: {:?}",
        input_index,
        result.err()
    );
}

// ============================================================================
// Full flow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_owner_guardians_recover() {
    // ------------------------------------------------------------------
    // 1. Enrollment
    // ------------------------------------------------------------------
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(ORIGIN));
    let server = Arc::new(InMemoryServer::new(clock.clone()));
    let manager = PolManager::builder("family-vault")
        .config(PolConfig {
            kdf: KdfParams::new(256, 1, 1),
            ..PolConfig::default()
        })
        .transport(server.clone())
        .storage(Arc::new(MemoryStorage::new()))
        .clock(clock)
        .passphrase("owner device passphrase")
        .build()
        .unwrap();

    manager.initialize().await.unwrap();

    let names = ["bob", "carol", "dave"];
    let guardian_keys: Vec<Keypair> = (1..=3).map(keypair).collect();
    for (name, kp) in names.iter().zip(&guardian_keys) {
        manager
            .add_guardian(GuardianConfig::new(*name, kp.x_only_public_key().0.to_string()))
            .await
            .unwrap();
    }
    manager.enroll("Alice", true).await.unwrap();
    assert!(server.is_enrolled("family-vault"));

    // ------------------------------------------------------------------
    // 2. Secret split and sealed
    // ------------------------------------------------------------------
    let secret: Vec<u8> = (0u8..32).map(|b| b.wrapping_mul(7).wrapping_add(3)).collect();
    let holders: Vec<(String, _)> = names
        .iter()
        .zip(&guardian_keys)
        .map(|(name, kp)| (name.to_string(), kp.x_only_public_key().0))
        .collect();
    let sealed = split_for_guardians(&secret, 2, &holders).unwrap();
    assert_eq!(sealed.len(), 3);
    for share in &sealed {
        assert!(
            !share.sealed.windows(secret.len()).any(|w| w == secret.as_slice()),
            "sealed share leaks the secret"
        );
    }

    // ------------------------------------------------------------------
    // 3. Recovery address
    // ------------------------------------------------------------------
    let owner = keypair(0x50);
    let spec = manager
        .recovery_script(owner.x_only_public_key().0, 2)
        .unwrap();
    assert_eq!(spec.timelock.blocks(), 1872);

    let address = derive_address(&spec, Network::Regtest);
    assert!(address.to_string().starts_with("bcrt1p"));

    let utxos: Vec<RecoveryUtxo> = [(0x31u8, 400_000u64), (0x32, 250_000)]
        .iter()
        .map(|(fill, sats)| RecoveryUtxo {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([*fill; 32]),
                vout: 0,
            },
            txout: TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: address.script_pubkey(),
            },
            confirmation_height: FUNDING_HEIGHT,
        })
        .collect();

    // ------------------------------------------------------------------
    // 4. Owner goes silent
    // ------------------------------------------------------------------
    let mut events = manager.subscribe();
    assert!(manager.start_monitoring().await.unwrap());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.status().await.unwrap().state, PolState::Active);

    server.fail_submissions(true);
    tokio::time::sleep(Duration::from_secs(14 * DAY + 60)).await;

    let status = manager.status().await.unwrap();
    assert_eq!(status.state, PolState::RecoveryTriggered);
    let trigger = manager.recovery_trigger().await.unwrap();
    assert_eq!(trigger.wallet_id, "family-vault");
    assert_eq!(server.triggers("family-vault"), vec![trigger]);

    let mut escalations = Vec::new();
    let mut triggered = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PolEvent::Escalated { level, guardians, .. } => {
                assert_eq!(guardians.len(), 3);
                escalations.push(level);
            }
            PolEvent::RecoveryTriggered { .. } => triggered += 1,
            _ => {}
        }
    }
    assert_eq!(escalations, vec![1, 2]);
    assert_eq!(triggered, 1);

    // ------------------------------------------------------------------
    // 5. Bob and Dave rebuild the secret
    // ------------------------------------------------------------------
    let opened = vec![
        unwrap_share(&sealed[0], &guardian_keys[0].secret_key()).unwrap(),
        unwrap_share(&sealed[2], &guardian_keys[2].secret_key()).unwrap(),
    ];
    assert_eq!(reconstruct_secret(&opened).unwrap(), secret);

    // ------------------------------------------------------------------
    // 6. Bob and Dave sweep the recovery address
    // ------------------------------------------------------------------
    let secp = Secp256k1::new();
    let heir_wallet = Address::p2tr(
        &secp,
        keypair(0x60).x_only_public_key().0,
        None,
        Network::Regtest,
    );
    let plan = plan_recovery_spend(&spec, &utxos, &heir_wallet, None, 2.0).unwrap();
    assert_eq!(plan.inputs.len(), 2);
    assert!(plan.change.is_none());

    let signatures: Vec<_> = [&guardian_keys[0], &guardian_keys[2]]
        .iter()
        .flat_map(|kp| (0..plan.inputs.len()).map(|i| sign_recovery_input(&plan, i, kp).unwrap()))
        .collect();

    let mature = FUNDING_HEIGHT + spec.timelock.blocks() as u32;
    assert!(matches!(
        assemble_recovery_spend(&spec, &plan, &signatures, mature - 2),
        Err(RecoveryError::TimelockNotExpired { required: 1872, .. })
    ));

    let tx = assemble_recovery_spend(&spec, &plan, &signatures, mature).unwrap();
    assert_eq!(tx.output.len(), 1);
    assert_eq!(tx.output[0].script_pubkey, heir_wallet.script_pubkey());

    let mut tx_bytes = Vec::new();
    tx.consensus_encode(&mut tx_bytes).unwrap();
    let prevouts = plan.prevouts();
    for input in 0..tx.input.len() {
        consensus_verify(&tx_bytes, &prevouts, input);
    }
}

// ============================================================================
// Owner stays alive
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_live_owner_never_triggers() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(ORIGIN));
    let server = Arc::new(InMemoryServer::new(clock.clone()));
    let manager = PolManager::builder("family-vault")
        .config(PolConfig {
            kdf: KdfParams::new(256, 1, 1),
            ..PolConfig::default()
        })
        .transport(server.clone())
        .storage(Arc::new(MemoryStorage::new()))
        .clock(clock)
        .passphrase("owner device passphrase")
        .build()
        .unwrap();

    manager.initialize().await.unwrap();
    manager
        .add_guardian(GuardianConfig::new(
            "bob",
            keypair(1).x_only_public_key().0.to_string(),
        ))
        .await
        .unwrap();
    manager.enroll("Alice", true).await.unwrap();
    manager.start_monitoring().await.unwrap();

    // Ten weeks of on-time scheduled check-ins
    tokio::time::sleep(Duration::from_secs(70 * DAY + 60)).await;

    let status = manager.status().await.unwrap();
    assert_eq!(status.state, PolState::Active);
    assert_eq!(status.missed_count, 0);
    assert!(server.triggers("family-vault").is_empty());
    assert_eq!(server.accepted_proofs("family-vault").len(), 11);
    assert!(manager.is_monitoring());

    manager.stop_monitoring();
}
