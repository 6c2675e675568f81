//! Spendable outputs, the previous-transaction cache and unit arithmetic.

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use bitcoin::{consensus, Amount, Denomination, OutPoint, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    client::NodeClient,
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendableOutput {
    pub txid: Txid,
    pub vout: u32,
    /// Value in the smallest currency unit.
    pub value: u64,
    #[serde(default)]
    pub owner_script_hex: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u32>,
}

impl SpendableOutput {
    pub fn new(txid: Txid, vout: u32, value: u64) -> Self {
        Self {
            txid,
            vout,
            value,
            owner_script_hex: None,
            confirmations: None,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations.unwrap_or(0)
    }
}

/// Drops repeated listings of the same outpoint, keeping the first.
pub fn dedup_outputs(utxos: Vec<SpendableOutput>) -> Vec<SpendableOutput> {
    let mut seen = HashSet::new();
    utxos
        .into_iter()
        .filter(|utxo| seen.insert(utxo.outpoint()))
        .collect()
}

/// Parses a 64 character hex transaction id. Case is normalized.
pub fn parse_txid(txid: &str) -> Result<Txid> {
    let txid = txid.trim();
    if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation(format!(
            "transaction id must be 64 hex characters, got {txid:?}"
        )));
    }

    Txid::from_str(&txid.to_ascii_lowercase())
        .map_err(|e| Error::validation(format!("invalid transaction id {txid}: {e}")))
}

pub fn decode_transaction(raw_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(raw_hex.trim())
        .map_err(|e| Error::validation(format!("transaction is not valid hex: {e}")))?;

    consensus::deserialize(&bytes)
        .map_err(|e| Error::validation(format!("malformed transaction: {e}")))
}

pub fn encode_transaction(transaction: &Transaction) -> String {
    consensus::encode::serialize_hex(transaction)
}

/// `floor(value * numerator / denominator)` without intermediate overflow.
pub fn scale_floor(value: u64, numerator: u64, denominator: u64) -> u64 {
    let scaled = u128::from(value) * u128::from(numerator) / u128::from(denominator);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Converts a decimal coin amount ("12.5") into integer units without
/// passing through floating point.
pub fn coins_to_units(coins: &str) -> Result<u64> {
    Amount::from_str_in(coins.trim(), Denomination::Bitcoin)
        .map(Amount::to_sat)
        .map_err(|e| Error::validation(format!("invalid coin amount {coins:?}: {e}")))
}

pub fn units_to_coins(units: u64) -> String {
    Amount::from_sat(units).to_string_in(Denomination::Bitcoin)
}

/// Previous transactions already seen during one flow, keyed by id.
#[derive(Debug, Default)]
pub struct PrevTxCache {
    transactions: HashMap<Txid, Transaction>,
}

impl PrevTxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers a transaction that is known locally, e.g. one this crate
    /// just built and broadcast.
    pub fn insert(&mut self, transaction: Transaction) -> Txid {
        let txid = transaction.compute_txid();
        self.transactions.insert(txid, transaction);
        txid
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.transactions.contains_key(txid)
    }

    pub async fn fetch<C>(&mut self, client: &C, txid: &Txid) -> Result<&Transaction>
    where
        C: NodeClient + ?Sized,
    {
        if !self.transactions.contains_key(txid) {
            debug!(%txid, "fetching previous transaction");
            let raw_hex = client.fetch_previous_transaction(txid).await?;
            let transaction = decode_transaction(&raw_hex)
                .map_err(|e| Error::network(format!("node returned bad transaction {txid}: {e}")))?;

            let actual = transaction.compute_txid();
            if actual != *txid {
                return Err(Error::network(format!(
                    "node returned transaction {actual} when asked for {txid}"
                )));
            }
            self.transactions.insert(*txid, transaction);
        }

        self.transactions
            .get(txid)
            .ok_or_else(|| Error::network(format!("transaction {txid} unavailable")))
    }

    /// The output referenced by `outpoint`.
    pub async fn prevout<C>(&mut self, client: &C, outpoint: &OutPoint) -> Result<TxOut>
    where
        C: NodeClient + ?Sized,
    {
        let transaction = self.fetch(client, &outpoint.txid).await?;

        transaction
            .output
            .get(outpoint.vout as usize)
            .cloned()
            .ok_or_else(|| {
                Error::range(format!(
                    "output index {} out of range, transaction {} has {} outputs",
                    outpoint.vout,
                    outpoint.txid,
                    transaction.output.len()
                ))
            })
    }

    pub fn get(&self, txid: &Txid) -> Option<&Transaction> {
        self.transactions.get(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_txid_normalizes_case() {
        let upper = "4CFBEC13CF1510545F285CCECEB6229BD7B6A918A8F6EBA1DBEE64D26226A3B7";
        let lower = upper.to_ascii_lowercase();

        assert_eq!(parse_txid(upper).unwrap(), parse_txid(&lower).unwrap());
    }

    #[test]
    fn parse_txid_rejects_wrong_length_and_non_hex() {
        assert!(matches!(parse_txid("abcd"), Err(Error::Validation(_))));
        assert!(matches!(
            parse_txid(&"zz".repeat(32)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn dedup_keeps_first_listing_of_each_outpoint() {
        use bitcoin::hashes::Hash;

        let txid = Txid::from_byte_array([4; 32]);
        let first = SpendableOutput::new(txid, 0, 1_500_000);
        let other = SpendableOutput::new(txid, 1, 1_500_000);
        let repeat = SpendableOutput {
            confirmations: Some(3),
            ..first.clone()
        };

        let deduped = dedup_outputs(vec![first.clone(), other.clone(), repeat]);

        assert_eq!(deduped, vec![first, other]);
    }

    #[test]
    fn scale_floor_rounds_down() {
        assert_eq!(scale_floor(1_000_000, 4, 5), 800_000);
        assert_eq!(scale_floor(1_000_000, 13, 10), 1_300_000);
        assert_eq!(scale_floor(999, 13, 10), 1298);
        assert_eq!(scale_floor(u64::MAX, 2, 1), u64::MAX);
    }

    #[test]
    fn coin_amounts_avoid_float_error() {
        assert_eq!(coins_to_units("0.1").unwrap(), 10_000_000);
        assert_eq!(coins_to_units("0.3").unwrap(), 30_000_000);
        assert_eq!(coins_to_units("12345.6789").unwrap(), 1_234_567_890_000);
        assert!(coins_to_units("0.000000001").is_err());
    }

    #[test]
    fn units_roundtrip_through_coin_strings() {
        for units in [0, 1, 546, 1_000_000, 123_456_789_012] {
            assert_eq!(coins_to_units(&units_to_coins(units)).unwrap(), units);
        }
    }
}
