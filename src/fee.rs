//! Size-based fee estimation for legacy P2PKH transactions.

use serde::{Deserialize, Serialize};

/// Fixed per-transaction overhead: version, locktime and the two counts.
pub const TX_OVERHEAD_BYTES: u64 = 10;
/// Outpoint, sequence and a P2PKH script_sig with a maximal DER signature.
pub const INPUT_BYTES: u64 = 148;
/// Value plus a P2PKH locking script.
pub const OUTPUT_BYTES: u64 = 34;

/// Fee rate in thousandths of a unit per byte, so that fractional rates
/// stay exact integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const fn per_byte(units: u64) -> Self {
        FeeRate(units.saturating_mul(1000))
    }

    pub const fn per_kilobyte(units: u64) -> Self {
        FeeRate(units)
    }

    pub fn milli_units_per_byte(&self) -> u64 {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate::per_byte(10_000)
    }
}

/// Estimated virtual size of a transaction with the given shape.
pub fn estimate_size(input_count: usize, output_count: usize) -> u64 {
    TX_OVERHEAD_BYTES + INPUT_BYTES * input_count as u64 + OUTPUT_BYTES * output_count as u64
}

/// `ceil(size * rate)`. An upper-bound heuristic: every input is assumed to
/// carry a maximal-size signature regardless of script type.
pub fn estimate_fee(input_count: usize, output_count: usize, fee_rate: FeeRate) -> u64 {
    let milli = u128::from(estimate_size(input_count, output_count))
        * u128::from(fee_rate.milli_units_per_byte());
    u64::try_from(milli.div_ceil(1000)).unwrap_or(u64::MAX)
}
