//! Per-operation options. Every recognized field is listed with its default.

use serde::{Deserialize, Serialize};

use crate::fee::FeeRate;

pub const DEFAULT_POSTAGE_UNITS: u64 = 1_000_000;
pub const DEFAULT_DUST_THRESHOLD_UNITS: u64 = 1_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerOptions {
    /// Payee of the price output. Defaults to the seller's own address.
    pub seller_receive_address: Option<String>,
    /// When set, the token output must carry at least this much value.
    pub postage_units: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerOptions {
    /// Receives the token. Defaults to the buyer's own address.
    pub buyer_receive_address: Option<String>,
    pub platform_address: Option<String>,
    pub platform_fee_units: u64,
    pub postage_units: u64,
    pub fee_rate: FeeRate,
    /// Only outputs with at least this many confirmations are used. Dummy
    /// splitting is only attempted when this is zero.
    pub min_confirmations: u32,
    pub dust_threshold_units: u64,
}

impl Default for BuyerOptions {
    fn default() -> Self {
        Self {
            buyer_receive_address: None,
            platform_address: None,
            platform_fee_units: 0,
            postage_units: DEFAULT_POSTAGE_UNITS,
            fee_rate: FeeRate::default(),
            min_confirmations: 0,
            dust_threshold_units: DEFAULT_DUST_THRESHOLD_UNITS,
        }
    }
}

impl BuyerOptions {
    /// The platform fee output, present only with both a non-empty address
    /// and a positive amount.
    pub fn platform_fee(&self) -> Option<(&str, u64)> {
        match self.platform_address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() && self.platform_fee_units > 0 => {
                Some((address, self.platform_fee_units))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
