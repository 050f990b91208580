//! Shared test utilities for lifeline-inherit tests.
//!
//! Deterministic keypairs, guardian sets and funded recovery outputs.

use bitcoin::hashes::Hash as _;
use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::{Keypair, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, OutPoint, TxOut, Txid};

use crate::coin_select::RecoveryUtxo;
use crate::policy::Timelock;
use crate::taproot::{build_recovery_script, RecoveryScriptSpec};

/// Generate a deterministic keypair from a seed byte.
///
/// The secret key is `[0x01, 0x00, ..., 0x00, seed]` (32 bytes).
/// Different seed bytes produce different keys.
pub fn test_keypair(seed_byte: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    secret_bytes[31] = seed_byte;
    secret_bytes[0] = 0x01;
    let sk = SecretKey::from_slice(&secret_bytes).unwrap();
    let pk = sk.public_key(&secp);
    (sk, pk)
}

/// Owner internal key (seed 1)
pub fn test_owner_xonly() -> XOnlyPublicKey {
    test_keypair(1).1.x_only_public_key().0
}

/// Guardian keypairs use seeds 10, 11, 12, ...
pub fn test_guardian_keypairs(n: u8) -> Vec<Keypair> {
    let secp = Secp256k1::new();
    (0..n)
        .map(|i| Keypair::from_secret_key(&secp, &test_keypair(10 + i).0))
        .collect()
}

pub fn test_guardian_keys(n: u8) -> Vec<XOnlyPublicKey> {
    test_guardian_keypairs(n)
        .iter()
        .map(|kp| kp.x_only_public_key().0)
        .collect()
}

/// k-of-n recovery spec with the given timelock
pub fn make_test_spec(threshold: usize, n: u8, timelock_blocks: u16) -> RecoveryScriptSpec {
    build_recovery_script(
        test_owner_xonly(),
        &test_guardian_keys(n),
        threshold,
        Timelock::from_blocks(timelock_blocks).unwrap(),
    )
    .unwrap()
}

/// A UTXO paying to the spec's output, confirmed at `height`
pub fn test_utxo(spec: &RecoveryScriptSpec, fill: u8, sats: u64, height: u32) -> RecoveryUtxo {
    RecoveryUtxo {
        outpoint: OutPoint {
            txid: Txid::from_byte_array([fill; 32]),
            vout: 0,
        },
        txout: TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: spec.script_pubkey(),
        },
        confirmation_height: height,
    }
}
