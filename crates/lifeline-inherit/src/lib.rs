//! Lifeline Inheritance Module
//!
//! Bitcoin recovery path for guardians, built with miniscript and Taproot.
//!
//! # Concepts
//!
//! - **Key path**: the owner spends at any time, indistinguishable from single-sig
//! - **Script path**: a quorum of guardians spends once the CSV timelock expires
//! - **Timelock**: derived from the liveness deadline, so guardians can only move
//!   funds after the owner has missed every check-in and grace period
//!
//! # Recovery Leaf
//!
//! ```text
//! and_v(
//!   v:multi_a(k, G1, G2, ..., Gn),   // guardian keys, sorted
//!   older(TIMELOCK)
//! )
//! ```

pub mod coin_select;
pub mod policy;
pub mod taproot;

#[cfg(test)]
pub(crate) mod test_utils;

pub use coin_select::{select_coins_largest_first, CoinSelection, CostModel, RecoveryUtxo};
pub use policy::{GuardianPolicy, PolicyError, Timelock};
pub use taproot::{
    assemble_recovery_spend, build_recovery_script, derive_address, plan_recovery_spend,
    sign_recovery_input, GuardianSignature, RecoveryError, RecoveryScriptBuilder,
    RecoveryScriptSpec, RecoverySpendPlan,
};
