//! Integration test for the guardian recovery path.
//!
//! 1. Owner derives the recovery address for a 2-of-3 guardian set
//! 2. Funds arrive in two UTXOs
//! 3. Guardians plan a partial spend with change back to the recovery address
//! 4. One guardian alone is rejected; two guardians pass consensus verification

use bitcoin::consensus::Encodable;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, TxOut, Txid};

use lifeline_inherit::{
    assemble_recovery_spend, derive_address, plan_recovery_spend, sign_recovery_input,
    RecoveryError, RecoveryScriptBuilder, RecoveryUtxo, Timelock,
};

fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[31] = seed;
    bytes[0] = 0x01;
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

#[test]
fn test_two_of_three_guardian_recovery() {
    let owner = keypair(1);
    let guardians: Vec<Keypair> = (20..23).map(keypair).collect();

    // Liveness deadline of 20 days
    let timelock = Timelock::covering_secs(20 * 86_400).unwrap();
    assert_eq!(timelock.blocks(), 2880);

    let spec = RecoveryScriptBuilder::new(owner.x_only_public_key().0)
        .guardians(guardians.iter().map(|g| g.x_only_public_key().0))
        .threshold(2)
        .timelock(timelock)
        .build()
        .unwrap();

    let address = derive_address(&spec, Network::Regtest);
    assert!(address.to_string().starts_with("bcrt1p"));
    assert_eq!(address.script_pubkey(), spec.script_pubkey());

    let funding_height = 800_000;
    let utxos: Vec<RecoveryUtxo> = [(0x11u8, 120_000u64), (0x22, 45_000)]
        .iter()
        .map(|(fill, sats)| RecoveryUtxo {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([*fill; 32]),
                vout: 1,
            },
            txout: TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: address.script_pubkey(),
            },
            confirmation_height: funding_height,
        })
        .collect();

    let secp = Secp256k1::new();
    let heir_wallet = Address::p2tr(
        &secp,
        keypair(99).x_only_public_key().0,
        None,
        Network::Regtest,
    );

    let plan = plan_recovery_spend(
        &spec,
        &utxos,
        &heir_wallet,
        Some(Amount::from_sat(130_000)),
        3.0,
    )
    .unwrap();
    assert_eq!(plan.inputs.len(), 2);
    assert!(plan.change.is_some());

    let current_height = funding_height + timelock.blocks() as u32;

    // One guardian is not a quorum
    let lone: Vec<_> = (0..plan.inputs.len())
        .map(|i| sign_recovery_input(&plan, i, &guardians[1]).unwrap())
        .collect();
    assert!(matches!(
        assemble_recovery_spend(&spec, &plan, &lone, current_height),
        Err(RecoveryError::InsufficientSignatures { needed: 2, got: 1, .. })
    ));

    // Two guardians, but one block too early
    let mut quorum = lone.clone();
    quorum.extend(
        (0..plan.inputs.len()).map(|i| sign_recovery_input(&plan, i, &guardians[2]).unwrap()),
    );
    assert!(matches!(
        assemble_recovery_spend(&spec, &plan, &quorum, current_height - 2),
        Err(RecoveryError::TimelockNotExpired { .. })
    ));

    let tx = assemble_recovery_spend(&spec, &plan, &quorum, current_height).unwrap();
    let mut tx_bytes = Vec::new();
    tx.consensus_encode(&mut tx_bytes).unwrap();

    let prevouts = plan.prevouts();
    for input in 0..tx.input.len() {
        consensus_verify(&tx_bytes, &prevouts, input);
    }
}
