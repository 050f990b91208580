//! Guardian recovery output: Taproot key path (owner) + script path (guardians).
//!
//! During normal operation the owner spends via key path, which looks like any
//! single-sig Taproot spend on chain. If the owner stops proving liveness, a
//! quorum of guardians can spend through the script path once the CSV
//! timelock has expired.
//!
//! # Taproot Structure
//!
//! ```text
//! Output key = taptweak(owner_internal_key, merkle_root)
//!   Key path:    owner                                    <- normal spending
//!   Script path: and_v(v:multi_a(k, G1..Gn), older(T))   <- guardian recovery
//! ```
//!
//! # Recovery Flow
//!
//! 1. [`plan_recovery_spend`] selects coins and builds the unsigned PSBT
//! 2. Each guardian signs [`RecoverySpendPlan::sighash`] (see [`sign_recovery_input`])
//! 3. [`assemble_recovery_spend`] checks timelock and quorum, then builds the witness

use std::str::FromStr;

use bitcoin::hashes::Hash as _;
use bitcoin::key::XOnlyPublicKey;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::{
    ControlBlock, LeafVersion, Signature as TapSignature, TapLeafHash, TapNodeHash,
    TaprootBuilder, TaprootSpendInfo,
};
use bitcoin::transaction::{TxIn, Version};
use bitcoin::{
    absolute::LockTime, Address, Amount, Network, ScriptBuf, TapSighash, TapSighashType,
    Transaction, TxOut, Witness,
};
use miniscript::{Miniscript, Tap};
use thiserror::Error;

use crate::coin_select::{
    check_fee_rate, select_coins_largest_first, CostModel, RecoveryUtxo, DUST_LIMIT,
};
use crate::policy::{GuardianPolicy, PolicyError, Timelock};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Policy error: {0}")]
    Policy(PolicyError),

    #[error("Duplicate guardian key {0}")]
    DuplicateGuardian(XOnlyPublicKey),

    #[error("Taproot construction failed: {0}")]
    Taproot(String),

    #[error("PSBT error: {0}")]
    Psbt(String),

    #[error("Miniscript error: {0}")]
    Miniscript(#[from] miniscript::Error),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("Fee rate {0} sat/vB is out of range")]
    InvalidFeeRate(f64),

    #[error("Input {input}: {got} valid guardian signatures, need {needed}")]
    InsufficientSignatures {
        input: usize,
        needed: usize,
        got: usize,
    },

    #[error("Timelock not expired for input {input}: {confirmations} of {required} confirmations")]
    TimelockNotExpired {
        input: usize,
        confirmations: u32,
        required: u16,
    },
}

impl From<PolicyError> for RecoveryError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::DuplicateKey(key) => RecoveryError::DuplicateGuardian(key),
            other => RecoveryError::Policy(other),
        }
    }
}

/// A wallet's recovery output: owner key path plus one guardian leaf.
#[derive(Debug, Clone)]
pub struct RecoveryScriptSpec {
    /// Owner's x-only key (Taproot internal key)
    pub internal_key: XOnlyPublicKey,
    /// Guardian quorum
    pub guardians: GuardianPolicy,
    /// CSV delay on the recovery leaf
    pub timelock: Timelock,
    /// Encoded recovery tapscript
    pub recovery_script: ScriptBuf,
    /// Taproot spend info (internal key + script tree)
    pub spend_info: TaprootSpendInfo,
}

impl RecoveryScriptSpec {
    /// Tweaked output key
    pub fn output_key(&self) -> XOnlyPublicKey {
        self.spend_info.output_key().to_x_only_public_key()
    }

    pub fn merkle_root(&self) -> Option<TapNodeHash> {
        self.spend_info.merkle_root()
    }

    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.recovery_script, LeafVersion::TapScript)
    }

    /// Control block proving the recovery leaf is committed to by the output key
    pub fn control_block(&self) -> Result<ControlBlock, RecoveryError> {
        self.spend_info
            .control_block(&(self.recovery_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| {
                RecoveryError::Taproot("control block not found for recovery script".into())
            })
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.spend_info.output_key())
    }

    /// vbyte model for spending this output through the recovery leaf
    pub fn cost_model(&self) -> CostModel {
        CostModel::script_path(
            self.recovery_script.len(),
            self.guardians.keys().len(),
            self.guardians.threshold(),
            0,
        )
    }
}

/// Build the recovery output for an owner and guardian set.
///
/// Pure function: identical inputs always produce the identical output key,
/// whatever order `guardian_keys` is given in.
pub fn build_recovery_script(
    owner_internal_key: XOnlyPublicKey,
    guardian_keys: &[XOnlyPublicKey],
    threshold: usize,
    timelock: Timelock,
) -> Result<RecoveryScriptSpec, RecoveryError> {
    let guardians = GuardianPolicy::new(threshold, guardian_keys.to_vec())?;
    if guardians.keys().contains(&owner_internal_key) {
        return Err(RecoveryError::Taproot(
            "owner key cannot also be a guardian".into(),
        ));
    }

    let ms = Miniscript::<XOnlyPublicKey, Tap>::from_str(&guardians.recovery_miniscript(timelock))?;
    let recovery_script = ms.encode();

    let secp = Secp256k1::verification_only();
    let spend_info = TaprootBuilder::new()
        .add_leaf(0, recovery_script.clone())
        .map_err(|e| RecoveryError::Taproot(format!("taproot builder error: {}", e)))?
        .finalize(&secp, owner_internal_key)
        .map_err(|_| RecoveryError::Taproot("taproot finalize failed".into()))?;

    Ok(RecoveryScriptSpec {
        internal_key: owner_internal_key,
        guardians,
        timelock,
        recovery_script,
        spend_info,
    })
}

/// P2TR address committing to the owner key and the recovery leaf.
pub fn derive_address(spec: &RecoveryScriptSpec, network: Network) -> Address {
    let secp = Secp256k1::verification_only();
    Address::p2tr(&secp, spec.internal_key, spec.merkle_root(), network)
}

/// Builder for recovery outputs.
///
/// # Example
/// ```ignore
/// let spec = RecoveryScriptBuilder::new(owner_xonly)
///     .guardian(alice)
///     .guardian(bob)
///     .guardian(carol)
///     .threshold(2)  // 2-of-3
///     .timelock(Timelock::days(10)?)
///     .build()?;
/// ```
pub struct RecoveryScriptBuilder {
    internal_key: XOnlyPublicKey,
    guardian_keys: Vec<XOnlyPublicKey>,
    threshold: Option<usize>,
    timelock: Option<Timelock>,
}

impl RecoveryScriptBuilder {
    pub fn new(owner_internal_key: XOnlyPublicKey) -> Self {
        Self {
            internal_key: owner_internal_key,
            guardian_keys: Vec::new(),
            threshold: None,
            timelock: None,
        }
    }

    /// Add a guardian.
    pub fn guardian(mut self, key: XOnlyPublicKey) -> Self {
        self.guardian_keys.push(key);
        self
    }

    /// Add several guardians.
    pub fn guardians(mut self, keys: impl IntoIterator<Item = XOnlyPublicKey>) -> Self {
        self.guardian_keys.extend(keys);
        self
    }

    /// Signatures required. Defaults to all guardians.
    pub fn threshold(mut self, k: usize) -> Self {
        self.threshold = Some(k);
        self
    }

    /// Set the CSV timelock for recovery.
    pub fn timelock(mut self, tl: Timelock) -> Self {
        self.timelock = Some(tl);
        self
    }

    pub fn build(self) -> Result<RecoveryScriptSpec, RecoveryError> {
        let timelock = self
            .timelock
            .ok_or_else(|| RecoveryError::Taproot("timelock is required".into()))?;
        let threshold = self.threshold.unwrap_or(self.guardian_keys.len());
        build_recovery_script(self.internal_key, &self.guardian_keys, threshold, timelock)
    }
}

/// An unsigned recovery spend awaiting guardian signatures.
#[derive(Debug, Clone)]
pub struct RecoverySpendPlan {
    /// Unsigned PSBT with tap scripts, internal key and merkle root set
    pub psbt: Psbt,
    /// Spent outputs, in input order
    pub inputs: Vec<RecoveryUtxo>,
    pub fee: Amount,
    /// Change returned to the recovery address, if above dust
    pub change: Option<Amount>,
    leaf_hash: TapLeafHash,
}

impl RecoverySpendPlan {
    pub fn prevouts(&self) -> Vec<TxOut> {
        self.inputs.iter().map(|u| u.txout.clone()).collect()
    }

    /// Leaf sighash (SIGHASH_DEFAULT) guardians sign for `input_index`.
    pub fn sighash(&self, input_index: usize) -> Result<TapSighash, RecoveryError> {
        self.sighash_with_type(input_index, TapSighashType::Default)
    }

    fn sighash_with_type(
        &self,
        input_index: usize,
        sighash_type: TapSighashType,
    ) -> Result<TapSighash, RecoveryError> {
        if input_index >= self.inputs.len() {
            return Err(RecoveryError::Psbt(format!(
                "input index {} out of bounds",
                input_index
            )));
        }
        let prevouts = self.prevouts();
        let mut cache = SighashCache::new(&self.psbt.unsigned_tx);
        cache
            .taproot_script_spend_signature_hash(
                input_index,
                &Prevouts::All(&prevouts),
                self.leaf_hash,
                sighash_type,
            )
            .map_err(|e| RecoveryError::Psbt(format!("sighash computation failed: {}", e)))
    }
}

/// A guardian's signature over one input of a recovery spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianSignature {
    pub input_index: usize,
    pub pubkey: XOnlyPublicKey,
    pub signature: TapSignature,
}

/// Sign one input of a recovery spend as a guardian.
pub fn sign_recovery_input(
    plan: &RecoverySpendPlan,
    input_index: usize,
    keypair: &Keypair,
) -> Result<GuardianSignature, RecoveryError> {
    let sighash = plan.sighash(input_index)?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_schnorr_no_aux_rand(&msg, keypair);

    Ok(GuardianSignature {
        input_index,
        pubkey: keypair.x_only_public_key().0,
        signature: TapSignature {
            signature,
            sighash_type: TapSighashType::Default,
        },
    })
}

/// Select coins and build the unsigned recovery transaction.
///
/// With `target = Some(amount)`, pays `amount` to `destination` and returns
/// change to the recovery address (change below dust goes to the fee). With
/// `target = None`, sweeps every UTXO to `destination`.
pub fn plan_recovery_spend(
    spec: &RecoveryScriptSpec,
    utxos: &[RecoveryUtxo],
    destination: &Address,
    target: Option<Amount>,
    fee_rate: f64,
) -> Result<RecoverySpendPlan, RecoveryError> {
    if utxos.is_empty() {
        return Err(RecoveryError::Psbt("no UTXOs provided".into()));
    }
    let cost = spec.cost_model();

    let (inputs, outputs, fee, change) = match target {
        Some(amount) => {
            if amount < DUST_LIMIT {
                return Err(RecoveryError::Psbt(format!(
                    "output {} sat is below dust limit (546 sat)",
                    amount.to_sat()
                )));
            }
            // Assume a change output while selecting
            let selection = select_coins_largest_first(utxos, amount, fee_rate, 2, &cost)?;
            let excess = selection.excess(amount);

            let mut outputs = vec![TxOut {
                value: amount,
                script_pubkey: destination.script_pubkey(),
            }];
            if excess >= DUST_LIMIT {
                outputs.push(TxOut {
                    value: excess,
                    script_pubkey: spec.script_pubkey(),
                });
                (selection.selected, outputs, selection.fee, Some(excess))
            } else {
                let fee = selection.total - amount;
                (selection.selected, outputs, fee, None)
            }
        }
        None => {
            check_fee_rate(fee_rate)?;
            let total: Amount = utxos.iter().map(|u| u.value()).sum();
            let fee = cost.fee(utxos.len(), 1, fee_rate);
            let send = total
                .checked_sub(fee)
                .ok_or(RecoveryError::InsufficientFunds {
                    needed: fee,
                    available: total,
                })?;
            if send < DUST_LIMIT {
                return Err(RecoveryError::Psbt(format!(
                    "output {} sat is below dust limit (546 sat)",
                    send.to_sat()
                )));
            }
            let outputs = vec![TxOut {
                value: send,
                script_pubkey: destination.script_pubkey(),
            }];
            (utxos.to_vec(), outputs, fee, None)
        }
    };

    // CSV sequence on every input
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: spec.timelock.to_sequence(),
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|e| RecoveryError::Psbt(format!("PSBT creation failed: {}", e)))?;

    let control_block = spec.control_block()?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(&inputs) {
        input.witness_utxo = Some(utxo.txout.clone());
        input.tap_scripts.insert(
            control_block.clone(),
            (spec.recovery_script.clone(), LeafVersion::TapScript),
        );
        input.tap_internal_key = Some(spec.internal_key);
        input.tap_merkle_root = spec.merkle_root();
    }

    Ok(RecoverySpendPlan {
        psbt,
        inputs,
        fee,
        change,
        leaf_hash: spec.leaf_hash(),
    })
}

/// Check timelock and quorum, then build the script-path witness for every input.
///
/// Per input, guardians are matched in script order; only signatures that
/// verify against the input's sighash count, and signatures beyond the
/// threshold are left out. The witness is
/// `[sig_n .. sig_1, script, control_block]` with empty items for guardians
/// that do not sign.
pub fn assemble_recovery_spend(
    spec: &RecoveryScriptSpec,
    plan: &RecoverySpendPlan,
    signatures: &[GuardianSignature],
    current_height: u32,
) -> Result<Transaction, RecoveryError> {
    if plan.leaf_hash != spec.leaf_hash() {
        return Err(RecoveryError::Psbt(
            "plan was built for a different recovery script".into(),
        ));
    }

    let required = spec.timelock.blocks();
    for (input, utxo) in plan.inputs.iter().enumerate() {
        let confirmations = utxo.confirmations(current_height);
        if confirmations < required as u32 {
            return Err(RecoveryError::TimelockNotExpired {
                input,
                confirmations,
                required,
            });
        }
    }

    let secp = Secp256k1::verification_only();
    let control_block = spec.control_block()?;
    let keys = spec.guardians.keys();
    let threshold = spec.guardians.threshold();

    let verifies = |input_index: usize, key: &XOnlyPublicKey, sig: &GuardianSignature| -> bool {
        plan.sighash_with_type(input_index, sig.signature.sighash_type)
            .map(|sighash| Message::from_digest(sighash.to_byte_array()))
            .is_ok_and(|msg| secp.verify_schnorr(&sig.signature.signature, &msg, key).is_ok())
    };

    let mut tx = plan.psbt.unsigned_tx.clone();
    for (input_index, txin) in tx.input.iter_mut().enumerate() {
        let mut slots: Vec<Option<TapSignature>> = vec![None; keys.len()];
        let mut valid = 0;

        for (slot, key) in slots.iter_mut().zip(keys) {
            if valid == threshold {
                break;
            }
            let found = signatures
                .iter()
                .filter(|s| s.input_index == input_index && s.pubkey == *key)
                .find(|s| verifies(input_index, key, s));
            if let Some(sig) = found {
                *slot = Some(sig.signature);
                valid += 1;
            }
        }

        if valid < threshold {
            return Err(RecoveryError::InsufficientSignatures {
                input: input_index,
                needed: threshold,
                got: valid,
            });
        }

        // multi_a consumes the first key's signature from the top of the stack
        let mut witness = Witness::new();
        for slot in slots.iter().rev() {
            match slot {
                Some(sig) => witness.push(sig.to_vec()),
                None => witness.push([] as [u8; 0]),
            }
        }
        witness.push(spec.recovery_script.as_bytes());
        witness.push(control_block.serialize());
        txin.witness = witness;
    }

    Ok(tx)
}
