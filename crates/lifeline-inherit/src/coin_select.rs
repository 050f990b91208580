//! Largest-first coin selection and vbyte cost model.
//!
//! Fee = (base + inputs × input_cost + outputs × output_cost) × fee_rate,
//! rounded up to whole sats.

use bitcoin::{Amount, OutPoint, TxOut};
use serde::{Deserialize, Serialize};

use crate::taproot::RecoveryError;

/// Maximum fee rate we'll accept (sat/vB). Protects against malicious fee data.
pub const MAX_FEE_RATE: f64 = 500.0;

/// Outputs below this are not relayed
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

/// A spendable output of the recovery address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryUtxo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    /// Block height the output confirmed at
    pub confirmation_height: u32,
}

impl RecoveryUtxo {
    /// Confirmations a transaction mined in the block after `current_height` would see
    pub fn confirmations(&self, current_height: u32) -> u32 {
        if current_height < self.confirmation_height {
            return 0;
        }
        current_height - self.confirmation_height + 1
    }

    pub fn value(&self) -> Amount {
        self.txout.value
    }
}

/// Per-component virtual sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// version, locktime, segwit marker/flag, counts
    pub base_vbytes: f64,
    pub input_vbytes: f64,
    pub output_vbytes: f64,
}

impl CostModel {
    /// Taproot key-path spend to P2TR outputs.
    ///
    /// 57.5 vbytes per input (64-byte Schnorr sig), 43 per P2TR output,
    /// 10.5 overhead.
    pub fn key_path() -> Self {
        Self {
            base_vbytes: 10.5,
            input_vbytes: 57.5,
            output_vbytes: 43.0,
        }
    }

    /// Taproot script-path spend through a `multi_a` leaf.
    ///
    /// Witness per input: item count, one slot per key (`threshold` of them
    /// carrying a 64-byte signature), the script and the control block.
    pub fn script_path(
        script_len: usize,
        keys: usize,
        threshold: usize,
        tree_depth: usize,
    ) -> Self {
        // outpoint (36) + empty script_sig (1) + sequence (4), non-witness
        let base_wu = 41 * 4;
        let script_len_prefix = if script_len < 0xfd { 1 } else { 3 };
        let witness_wu = 1 // item count
            + keys // length prefix per key slot
            + threshold * 64
            + script_len_prefix
            + script_len
            + 1 + 33 + 32 * tree_depth; // control block with its length prefix
        Self {
            base_vbytes: 10.5,
            input_vbytes: (base_wu + witness_wu) as f64 / 4.0,
            output_vbytes: 43.0,
        }
    }

    /// Estimated virtual size
    pub fn vbytes(&self, num_inputs: usize, num_outputs: usize) -> f64 {
        self.base_vbytes
            + self.input_vbytes * num_inputs as f64
            + self.output_vbytes * num_outputs as f64
    }

    /// Fee at `fee_rate` sat/vB, rounded up
    pub fn fee(&self, num_inputs: usize, num_outputs: usize, fee_rate: f64) -> Amount {
        Amount::from_sat((self.vbytes(num_inputs, num_outputs) * fee_rate).ceil() as u64)
    }
}

/// Result of coin selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    /// Selected UTXOs, largest first
    pub selected: Vec<RecoveryUtxo>,
    /// Sum of selected values
    pub total: Amount,
    /// Estimated fee for the selected inputs
    pub fee: Amount,
}

impl CoinSelection {
    /// Value left after paying `target` and the fee
    pub fn excess(&self, target: Amount) -> Amount {
        self.total
            .checked_sub(target)
            .and_then(|v| v.checked_sub(self.fee))
            .unwrap_or(Amount::ZERO)
    }
}

pub(crate) fn check_fee_rate(fee_rate: f64) -> Result<(), RecoveryError> {
    if !(fee_rate > 0.0 && fee_rate <= MAX_FEE_RATE) {
        return Err(RecoveryError::InvalidFeeRate(fee_rate));
    }
    Ok(())
}

/// Select UTXOs largest first until they cover `target` plus the fee.
///
/// Stops as soon as the running total covers `target + fee(selected inputs)`.
pub fn select_coins_largest_first(
    utxos: &[RecoveryUtxo],
    target: Amount,
    fee_rate: f64,
    num_outputs: usize,
    cost: &CostModel,
) -> Result<CoinSelection, RecoveryError> {
    check_fee_rate(fee_rate)?;

    let mut candidates: Vec<&RecoveryUtxo> = utxos.iter().collect();
    candidates.sort_by(|a, b| b.value().cmp(&a.value()));

    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    let mut fee = cost.fee(0, num_outputs, fee_rate);

    for utxo in candidates {
        selected.push(utxo.clone());
        total += utxo.value();
        fee = cost.fee(selected.len(), num_outputs, fee_rate);

        if total >= target + fee {
            return Ok(CoinSelection {
                selected,
                total,
                fee,
            });
        }
    }

    Err(RecoveryError::InsufficientFunds {
        needed: target + fee,
        available: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_test_spec, test_utxo};

    fn utxos(values: &[u64]) -> Vec<RecoveryUtxo> {
        let spec = make_test_spec(2, 3, 144);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| test_utxo(&spec, i as u8 + 1, *v, 100))
            .collect()
    }

    #[test]
    fn test_key_path_estimate() {
        let cost = CostModel::key_path();
        // 1-in 1-out: 10.5 + 57.5 + 43 = 111
        assert_eq!(cost.vbytes(1, 1), 111.0);
        assert_eq!(cost.fee(1, 1, 2.0), Amount::from_sat(222));
        // 2-in 2-out: 10.5 + 115 + 86 = 211.5
        assert_eq!(cost.fee(2, 2, 1.0), Amount::from_sat(212));
    }

    #[test]
    fn test_script_path_heavier_than_key_path() {
        let key = CostModel::key_path();
        let script = CostModel::script_path(105, 3, 2, 0);
        assert!(script.input_vbytes > key.input_vbytes);
        // Deeper trees cost 8 vbytes per level
        let deeper = CostModel::script_path(105, 3, 2, 1);
        assert_eq!(deeper.input_vbytes - script.input_vbytes, 8.0);
    }

    #[test]
    fn test_largest_first_stops_early() {
        let pool = utxos(&[10_000, 80_000, 30_000, 50_000]);
        let cost = CostModel::key_path();

        // 80k alone covers 60k + fee
        let selection =
            select_coins_largest_first(&pool, Amount::from_sat(60_000), 1.0, 2, &cost).unwrap();
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.total, Amount::from_sat(80_000));

        // 100k needs 80k + 50k
        let selection =
            select_coins_largest_first(&pool, Amount::from_sat(100_000), 1.0, 2, &cost).unwrap();
        let picked: Vec<u64> = selection.selected.iter().map(|u| u.value().to_sat()).collect();
        assert_eq!(picked, vec![80_000, 50_000]);
        assert_eq!(selection.fee, cost.fee(2, 2, 1.0));
    }

    #[test]
    fn test_fee_counted_in_target() {
        let pool = utxos(&[50_000, 50_000]);
        let cost = CostModel::key_path();

        // Exactly 50k would need a second input once the fee is added
        let selection =
            select_coins_largest_first(&pool, Amount::from_sat(50_000), 1.0, 1, &cost).unwrap();
        assert_eq!(selection.selected.len(), 2);
        assert!(selection.total >= Amount::from_sat(50_000) + selection.fee);
        assert_eq!(
            selection.excess(Amount::from_sat(50_000)),
            selection.total - Amount::from_sat(50_000) - selection.fee
        );
    }

    #[test]
    fn test_insufficient_funds() {
        let pool = utxos(&[1_000, 2_000]);
        let cost = CostModel::key_path();
        let result = select_coins_largest_first(&pool, Amount::from_sat(5_000), 1.0, 1, &cost);
        assert!(matches!(
            result,
            Err(RecoveryError::InsufficientFunds { available, .. })
                if available == Amount::from_sat(3_000)
        ));
    }

    #[test]
    fn test_fee_rate_bounds() {
        let pool = utxos(&[100_000]);
        let cost = CostModel::key_path();
        for rate in [0.0, -1.0, 501.0, f64::NAN] {
            assert!(matches!(
                select_coins_largest_first(&pool, Amount::from_sat(1_000), rate, 1, &cost),
                Err(RecoveryError::InvalidFeeRate(_))
            ));
        }
    }

    #[test]
    fn test_confirmations() {
        let pool = utxos(&[1_000]);
        assert_eq!(pool[0].confirmations(99), 0);
        assert_eq!(pool[0].confirmations(100), 1);
        assert_eq!(pool[0].confirmations(243), 144);
    }

    #[test]
    fn test_utxo_json() {
        let pool = utxos(&[42_000]);
        let json = serde_json::to_string(&pool[0]).unwrap();
        let restored: RecoveryUtxo = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, pool[0]);
    }
}
