//! Greedy smallest-first funding selection.

use bitcoin::OutPoint;

use crate::{
    dummy::is_token_shaped,
    error::{LiquidityError, Result},
    fee::{estimate_fee, FeeRate},
    utxo::SpendableOutput,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<SpendableOutput>,
    pub total: u64,
    pub fee: u64,
    /// Leftover after requirement and fee. Zero when folded into the fee.
    pub change: u64,
}

impl Selection {
    pub fn has_change(&self) -> bool {
        self.change > 0
    }
}

/// Outputs usable as funding, ascending by value. Excludes `reserved`
/// outpoints, anything token-shaped and anything below `min_value`.
pub fn funding_candidates(
    utxos: &[SpendableOutput],
    reserved: &[OutPoint],
    postage: u64,
    min_value: u64,
) -> Vec<SpendableOutput> {
    let mut candidates: Vec<SpendableOutput> = utxos
        .iter()
        .filter(|utxo| !reserved.contains(&utxo.outpoint()))
        .filter(|utxo| !is_token_shaped(utxo.value, postage))
        .filter(|utxo| utxo.value >= min_value)
        .cloned()
        .collect();
    candidates.sort_by_key(|utxo| (utxo.value, utxo.txid, utxo.vout));
    candidates
}

/// `Some(leftover)` if it is worth an output, `None` when it should be left
/// to the fee.
pub fn resolve_change(leftover: u64, dust_threshold: u64) -> Option<u64> {
    (leftover > dust_threshold).then_some(leftover)
}

#[derive(Debug, Clone, Copy)]
pub struct Requirement {
    /// Value the funding inputs must cover besides the fee.
    pub amount: u64,
    /// Inputs present before any funding input is added.
    pub fixed_inputs: usize,
    /// Outputs of the final transaction, change included.
    pub output_count: usize,
    pub fee_rate: FeeRate,
    pub dust_threshold: u64,
}

/// Accumulates `candidates` in order until they cover the requirement, the
/// fee for the inputs chosen so far and the dust floor.
pub fn select_funding(candidates: &[SpendableOutput], requirement: Requirement) -> Result<Selection> {
    let mut inputs = Vec::new();
    let mut total: u64 = 0;
    let mut fee = estimate_fee(
        requirement.fixed_inputs,
        requirement.output_count,
        requirement.fee_rate,
    );

    for candidate in candidates {
        inputs.push(candidate.clone());
        total = total.saturating_add(candidate.value);
        fee = estimate_fee(
            requirement.fixed_inputs + inputs.len(),
            requirement.output_count,
            requirement.fee_rate,
        );

        let needed = requirement
            .amount
            .saturating_add(fee)
            .saturating_add(requirement.dust_threshold);
        if total >= needed {
            let leftover = total - requirement.amount - fee;
            let change = resolve_change(leftover, requirement.dust_threshold).unwrap_or(0);
            return Ok(Selection {
                inputs,
                total,
                fee: total - requirement.amount - change,
                change,
            });
        }
    }

    Err(LiquidityError::PriceAndFee {
        needed: requirement
            .amount
            .saturating_add(fee)
            .saturating_add(requirement.dust_threshold),
        available: total,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::Hash, Txid};

    use super::*;
    use crate::error::Error;

    fn utxo(n: u8, value: u64) -> SpendableOutput {
        SpendableOutput::new(Txid::from_byte_array([n; 32]), 0, value)
    }

    fn requirement(amount: u64) -> Requirement {
        Requirement {
            amount,
            fixed_inputs: 3,
            output_count: 6,
            fee_rate: FeeRate::per_byte(1),
            dust_threshold: 1_000,
        }
    }

    #[test]
    fn candidates_exclude_reserved_token_shaped_and_small() {
        let utxos = vec![
            utxo(1, 50_000),
            utxo(2, 10_000),
            utxo(3, 9_000),
            utxo(4, 2_000),
            utxo(5, 30_000),
        ];

        let candidates = funding_candidates(&utxos, &[utxos[4].outpoint()], 10_000, 10_000);

        let values: Vec<u64> = candidates.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![50_000]);
    }

    #[test]
    fn picks_smallest_first_until_covered() {
        let candidates = vec![utxo(1, 20_000), utxo(2, 30_000), utxo(3, 100_000)];

        let selection = select_funding(&candidates, requirement(40_000)).unwrap();

        // 5 inputs, 6 outputs: 10 + 740 + 204 = 954
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.total, 50_000);
        assert_eq!(selection.change, 50_000 - 40_000 - 954);
        assert_eq!(selection.fee, 954);
    }

    #[test]
    fn fee_grows_with_each_input() {
        // 4 inputs: fee 806, needs 41_806. 5 inputs: fee 954, needs 41_954.
        let candidates = vec![utxo(1, 41_900), utxo(2, 100)];

        let selection = select_funding(&candidates, requirement(40_000)).unwrap();

        assert_eq!(selection.inputs.len(), 1);
        assert_eq!(selection.fee, 806);
        assert_eq!(selection.change, 41_900 - 40_000 - 806);
    }

    #[test]
    fn leftover_at_dust_folds_into_fee() {
        // one input: fee 806, leftover exactly the dust floor
        let candidates = vec![utxo(1, 40_000 + 806 + 1_000)];

        let selection = select_funding(&candidates, requirement(40_000)).unwrap();

        assert!(!selection.has_change());
        assert_eq!(selection.fee, 806 + 1_000);
        assert_eq!(selection.total, selection.fee + 40_000);
    }

    #[test]
    fn exhausted_pool_reports_price_and_fee_shortfall() {
        let candidates = vec![utxo(1, 10_000), utxo(2, 10_000)];

        let err = select_funding(&candidates, requirement(40_000)).unwrap_err();

        match err {
            Error::Liquidity(LiquidityError::PriceAndFee { needed, available }) => {
                assert_eq!(available, 20_000);
                assert_eq!(needed, 40_000 + 954 + 1_000);
            }
            other => panic!("expected price + fee shortfall, got {other:?}"),
        }
    }

    #[test]
    fn empty_pool_fails() {
        assert!(select_funding(&[], requirement(1)).is_err());
    }

    #[test]
    fn resolve_change_threshold() {
        assert_eq!(resolve_change(1_001, 1_000), Some(1_001));
        assert_eq!(resolve_change(1_000, 1_000), None);
        assert_eq!(resolve_change(0, 1_000), None);
    }
}
