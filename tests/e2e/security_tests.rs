//! Security-specific tests across the crates.
//!
//! These tests verify:
//! 1. Device key encryption rejects wrong passphrases and tampering
//! 2. Forged, altered and replayed liveness proofs are rejected
//! 3. Challenges are single-use and time-bounded
//! 4. Sealed shares only open for their guardian, untampered
//! 5. Recovery spends need a guardian quorum and a valid guardian set
//! 6. Malformed inputs don't panic

use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, TxOut, Txid};
use std::sync::Arc;

use lifeline_core::{decrypt_secret, encrypt_secret, CryptoError, EncryptedBlob, KdfParams};
use lifeline_inherit::{
    assemble_recovery_spend, build_recovery_script, derive_address, plan_recovery_spend,
    sign_recovery_input, RecoveryError, RecoveryUtxo, Timelock,
};
use lifeline_pol::signature::{expected_response, sign_data};
use lifeline_pol::{
    ChallengeStore, Clock, InMemoryServer, ManualClock, MemoryStorage, PolConfig, PolError,
    PolManager, PolProof, ProofKind, ProofTransport, SignatureVerifier,
};
use lifeline_shamir::{split_for_guardians, split_secret, unwrap_share, Share, ShamirError};

const NOW: u64 = 1_700_000_000;

fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[seed; 32]).unwrap())
}

fn fast_kdf() -> KdfParams {
    KdfParams::new(256, 1, 1)
}

/// Enrolled manager on a manual clock, plus one accepted proof
async fn enrolled_with_proof() -> (PolManager, Arc<InMemoryServer>, PolProof) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW));
    let server = Arc::new(InMemoryServer::new(clock.clone()));
    let manager = PolManager::builder("wallet-1")
        .config(PolConfig {
            kdf: fast_kdf(),
            ..PolConfig::default()
        })
        .transport(server.clone())
        .storage(Arc::new(MemoryStorage::new()))
        .clock(clock)
        .passphrase("pass")
        .build()
        .unwrap();
    manager.initialize().await.unwrap();
    manager.enroll("Alice", true).await.unwrap();
    let proof = manager.perform_check_in(ProofKind::Manual).await.unwrap();
    (manager, server, proof)
}

// ============================================================================
// 1. Device Key Encryption
// ============================================================================

#[test]
fn test_wrong_passphrase_fails_decryption() {
    let secret = [0xABu8; 32];
    let encrypted = encrypt_secret(&secret, "correct horse", &fast_kdf()).unwrap();

    assert!(matches!(
        decrypt_secret(&encrypted, "wrong horse"),
        Err(CryptoError::DecryptionFailed(_))
    ));
    assert_eq!(
        decrypt_secret(&encrypted, "correct horse").unwrap().as_slice(),
        &secret
    );
}

#[test]
fn test_tampered_blob_fails_decryption() {
    let secret = [0x42u8; 32];
    let encrypted = encrypt_secret(&secret, "pw", &fast_kdf()).unwrap();
    let bytes = encrypted.to_bytes();

    // Salt starts after the 13-byte header; ciphertext is the tail
    for offset in [13, bytes.len() - 1] {
        let mut tampered = bytes.clone();
        tampered[offset] ^= 0x01;
        let blob = EncryptedBlob::from_bytes(&tampered).unwrap();
        assert!(
            decrypt_secret(&blob, "pw").is_err(),
            "tampering at byte {} went unnoticed",
            offset
        );
    }
}

#[test]
fn test_same_secret_encrypts_differently() {
    let secret = [0x11u8; 32];
    let a = encrypt_secret(&secret, "pw", &fast_kdf()).unwrap();
    let b = encrypt_secret(&secret, "pw", &fast_kdf()).unwrap();
    assert_ne!(a.to_bytes(), b.to_bytes());
}

#[test]
fn test_truncated_blob_rejected() {
    let encrypted = encrypt_secret(&[0x01u8; 32], "pw", &fast_kdf()).unwrap();
    let bytes = encrypted.to_bytes();
    for len in [0, 1, 13, 41, 45] {
        assert!(EncryptedBlob::from_bytes(&bytes[..len]).is_err());
    }
}

// ============================================================================
// 2. Liveness Proofs
// ============================================================================

#[tokio::test]
async fn test_replayed_proof_rejected() {
    let (_manager, server, proof) = enrolled_with_proof().await;

    let reply = server.submit_proof(&proof).await.unwrap();
    assert!(!reply.success);
    assert_eq!(server.accepted_proofs("wallet-1").len(), 1);
}

#[tokio::test]
async fn test_forged_signature_rejected() {
    let (manager, server, proof) = enrolled_with_proof().await;
    let attacker = keypair(0x66);

    // Attacker signs a fresh challenge but claims the device key
    let mut forged = proof.clone();
    forged.challenge = "cd".repeat(32);
    let sig = sign_data(
        &PolProof::signed_message(&forged.challenge, forged.timestamp),
        &attacker,
    );
    forged.signature = hex::encode(sig.serialize());
    assert!(!server.submit_proof(&forged).await.unwrap().success);
    assert!(matches!(
        manager.remote_verify(&forged).await,
        Err(PolError::Authentication(_))
    ));

    // Attacker signs with and presents its own key
    let mut own_key = forged.clone();
    own_key.public_key = attacker.x_only_public_key().0.to_string();
    assert!(!server.submit_proof(&own_key).await.unwrap().success);
}

#[tokio::test]
async fn test_altered_proof_fails_verification() {
    let (_manager, _server, proof) = enrolled_with_proof().await;
    let verifier = SignatureVerifier::new(300);
    assert!(verifier.verify_proof(&proof, NOW).is_ok());

    // Moving the timestamp breaks the signature
    let mut moved = proof.clone();
    moved.timestamp += 1;
    assert!(matches!(
        verifier.verify_proof(&moved, NOW),
        Err(PolError::Authentication(_))
    ));

    // A valid proof presented long after is outside the drift window
    assert!(matches!(
        verifier.verify_proof(&proof, NOW + 3_600),
        Err(PolError::Validation(_))
    ));
}

#[test]
fn test_malformed_proof_fields_do_not_panic() {
    let verifier = SignatureVerifier::new(300);
    let proof = PolProof {
        id: "p".into(),
        wallet_id: "wallet-1".into(),
        timestamp: NOW,
        challenge: "ab".repeat(32),
        signature: "not hex".into(),
        public_key: "zz".into(),
        proof_type: ProofKind::Manual,
        metadata: Default::default(),
    };
    assert!(matches!(
        verifier.verify_proof(&proof, NOW),
        Err(PolError::Validation(_))
    ));

    let mut empty = proof;
    empty.challenge.clear();
    assert!(verifier.verify_proof(&empty, NOW).is_err());
}

// ============================================================================
// 3. Challenges
// ============================================================================

#[test]
fn test_challenge_single_use() {
    let store = ChallengeStore::new(300);
    let kp = keypair(0x07);
    let challenge = store.generate_challenge("wallet-1", NOW);

    let sig = sign_data(&PolProof::signed_message(&challenge.id, NOW), &kp).serialize();
    let response = expected_response(&sig, &challenge.id, NOW);

    // Wrong response leaves the challenge usable
    let mut wrong = response;
    wrong[0] ^= 0xFF;
    assert!(matches!(
        store.verify_challenge_response(&challenge.id, &wrong, &sig, NOW, NOW + 1),
        Err(PolError::Authentication(_))
    ));

    let consumed = store
        .verify_challenge_response(&challenge.id, &response, &sig, NOW, NOW + 1)
        .unwrap();
    assert_eq!(consumed.id, challenge.id);

    assert!(matches!(
        store.verify_challenge_response(&challenge.id, &response, &sig, NOW, NOW + 2),
        Err(PolError::ChallengeAlreadyUsed(_))
    ));
}

#[test]
fn test_expired_challenge_rejected() {
    let store = ChallengeStore::new(300);
    let challenge = store.generate_challenge("wallet-1", NOW);
    let sig = [0x01u8; 64];
    let response = expected_response(&sig, &challenge.id, NOW);

    assert!(matches!(
        store.verify_challenge_response(&challenge.id, &response, &sig, NOW, NOW + 301),
        Err(PolError::ChallengeExpired(_))
    ));
    assert_eq!(store.active_count(), 0);
}

#[test]
fn test_unknown_challenge_rejected() {
    let store = ChallengeStore::new(300);
    let sig = [0x01u8; 64];
    let response = expected_response(&sig, "deadbeef", NOW);
    assert!(matches!(
        store.verify_challenge_response("deadbeef", &response, &sig, NOW, NOW),
        Err(PolError::Validation(_))
    ));
}

// ============================================================================
// 4. Sealed Guardian Shares
// ============================================================================

fn sealed_two_of_three() -> (Vec<Keypair>, Vec<lifeline_shamir::GuardianShare>) {
    let guardians: Vec<Keypair> = (0x21..0x24).map(keypair).collect();
    let holders: Vec<(String, _)> = ["bob", "carol", "dave"]
        .iter()
        .zip(&guardians)
        .map(|(id, kp)| (id.to_string(), kp.x_only_public_key().0))
        .collect();
    let sealed = split_for_guardians(&[0x5Au8; 32], 2, &holders).unwrap();
    (guardians, sealed)
}

#[test]
fn test_wrong_guardian_cannot_open_share() {
    let (guardians, sealed) = sealed_two_of_three();
    assert!(matches!(
        unwrap_share(&sealed[0], &guardians[1].secret_key()),
        Err(ShamirError::InvalidShare(_))
    ));
    assert!(unwrap_share(&sealed[0], &guardians[0].secret_key()).is_ok());
}

#[test]
fn test_tampered_sealed_share_rejected() {
    let (guardians, sealed) = sealed_two_of_three();

    let mut flipped = sealed[1].clone();
    let last = flipped.sealed.len() - 1;
    flipped.sealed[last] ^= 0x01;
    assert!(unwrap_share(&flipped, &guardians[1].secret_key()).is_err());

    // Envelope metadata is bound to the ciphertext
    let mut relabelled = sealed[1].clone();
    relabelled.guardian_id = "mallory".into();
    assert!(unwrap_share(&relabelled, &guardians[1].secret_key()).is_err());

    let mut reindexed = sealed[1].clone();
    reindexed.index = 3;
    assert!(unwrap_share(&reindexed, &guardians[1].secret_key()).is_err());

    let mut truncated = sealed[1].clone();
    truncated.sealed.truncate(10);
    assert!(unwrap_share(&truncated, &guardians[1].secret_key()).is_err());
}

#[test]
fn test_random_share_bytes_do_not_panic() {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    for len in 0..64 {
        let bytes: Vec<u8> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let _ = Share::from_bytes(&bytes);
    }
}

#[test]
fn test_zero_secret_shares_are_randomized() {
    let shares = split_secret(&[0u8; 32], 2, 3).unwrap();
    // An all-zero secret still yields non-constant share values
    assert!(shares.iter().any(|s| s.values.iter().any(|v| *v != 0)));
}

// ============================================================================
// 5. Recovery Spend
// ============================================================================

#[test]
fn test_owner_cannot_be_guardian() {
    let owner = keypair(0x30);
    let keys = vec![owner.x_only_public_key().0, keypair(0x31).x_only_public_key().0];
    assert!(matches!(
        build_recovery_script(owner.x_only_public_key().0, &keys, 2, Timelock::six_months()),
        Err(RecoveryError::Taproot(_))
    ));
}

#[test]
fn test_duplicate_guardian_rejected() {
    let g = keypair(0x31).x_only_public_key().0;
    assert!(matches!(
        build_recovery_script(
            keypair(0x30).x_only_public_key().0,
            &[g, g],
            2,
            Timelock::six_months()
        ),
        Err(RecoveryError::DuplicateGuardian(_))
    ));
}

#[test]
fn test_outsider_signatures_do_not_count() {
    let guardians: Vec<Keypair> = (0x41..0x44).map(keypair).collect();
    let keys: Vec<_> = guardians.iter().map(|g| g.x_only_public_key().0).collect();
    let timelock = Timelock::from_blocks(144).unwrap();
    let spec =
        build_recovery_script(keypair(0x40).x_only_public_key().0, &keys, 2, timelock).unwrap();
    let address = derive_address(&spec, Network::Regtest);

    let utxo = RecoveryUtxo {
        outpoint: OutPoint {
            txid: Txid::from_byte_array([0x77; 32]),
            vout: 0,
        },
        txout: TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: address.script_pubkey(),
        },
        confirmation_height: 100,
    };
    let secp = Secp256k1::new();
    let dest = Address::p2tr(&secp, keypair(0x50).x_only_public_key().0, None, Network::Regtest);
    let plan = plan_recovery_spend(&spec, &[utxo], &dest, None, 1.0).unwrap();
    let height = 100 + 144;

    // One guardian plus an outsider is not a quorum
    let sigs = vec![
        sign_recovery_input(&plan, 0, &guardians[0]).unwrap(),
        sign_recovery_input(&plan, 0, &keypair(0x99)).unwrap(),
    ];
    assert!(matches!(
        assemble_recovery_spend(&spec, &plan, &sigs, height),
        Err(RecoveryError::InsufficientSignatures { needed: 2, got: 1, .. })
    ));

    // Same guardian twice is still one signer
    let doubled = vec![
        sign_recovery_input(&plan, 0, &guardians[0]).unwrap(),
        sign_recovery_input(&plan, 0, &guardians[0]).unwrap(),
    ];
    assert!(matches!(
        assemble_recovery_spend(&spec, &plan, &doubled, height),
        Err(RecoveryError::InsufficientSignatures { got: 1, .. })
    ));

    let quorum = vec![
        sign_recovery_input(&plan, 0, &guardians[0]).unwrap(),
        sign_recovery_input(&plan, 0, &guardians[2]).unwrap(),
    ];
    assert!(assemble_recovery_spend(&spec, &plan, &quorum, height).is_ok());
}
