//! Dummy inputs: two small buyer outputs placed ahead of the token input so
//! that the token lands in the buyer's receive output.
//!
//! Outputs whose value looks like a token's postage are never touched, as
//! they may carry an inscription the wallet does not know about.

use std::collections::HashSet;

use bitcoin::{psbt::Psbt, sighash::EcdsaSighashType, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    client::NodeClient,
    config::BuyerOptions,
    error::{Error, Result},
    fee::estimate_fee,
    keypair::KeyPair,
    sign::{finalize_p2pkh_input, sign_input, verify_transaction},
    transaction::split_transaction,
    utxo::{dedup_outputs, encode_transaction, scale_floor, PrevTxCache, SpendableOutput},
};

/// Lowest value ever considered token-shaped.
pub const MIN_TOKEN_SHAPED_UNITS: u64 = 546;

/// Inclusive `[low, high]` band of values that look like a token output.
pub fn token_shaped_range(postage: u64) -> (u64, u64) {
    let low = scale_floor(postage, 4, 5).max(MIN_TOKEN_SHAPED_UNITS);
    let high = scale_floor(postage, 13, 10);
    (low, high)
}

pub fn is_token_shaped(value: u64, postage: u64) -> bool {
    let (low, high) = token_shaped_range(postage);
    (low..=high).contains(&value)
}

pub fn is_dummy_candidate(value: u64, postage: u64) -> bool {
    value >= postage && !is_token_shaped(value, postage)
}

/// Dummies above this are wasteful placeholders and get split instead.
/// Never below what a split produces, so a fresh split always satisfies it.
pub fn max_dummy_value(postage: u64) -> u64 {
    postage.saturating_mul(2).max(compute_split_dummy_value(postage))
}

/// The two smallest eligible outputs, smallest first. Fewer are returned
/// when fewer qualify.
pub fn pick_two_dummies(utxos: &[SpendableOutput], postage: u64) -> Vec<SpendableOutput> {
    let mut candidates: Vec<&SpendableOutput> = utxos
        .iter()
        .filter(|utxo| is_dummy_candidate(utxo.value, postage))
        .collect();
    candidates.sort_by_key(|utxo| (utxo.value, utxo.txid, utxo.vout));

    candidates.into_iter().take(2).cloned().collect()
}

/// `1.5 * postage`, clamped into `[floor(1.3 * postage) + 1, 2 * postage]`
/// so split outputs are never token-shaped and never oversized.
pub fn compute_split_dummy_value(postage: u64) -> u64 {
    let low = scale_floor(postage, 13, 10).saturating_add(1);
    let high = postage.saturating_mul(2).max(low);
    scale_floor(postage, 3, 2).clamp(low, high)
}

pub(crate) fn check_postage(postage: u64) -> Result<()> {
    if postage == 0 {
        return Err(Error::validation("postage must be positive"));
    }
    Ok(())
}

fn needs_more_dummies(dummies: &[SpendableOutput], postage: u64) -> bool {
    dummies.len() < 2 || dummies.iter().any(|d| d.value > max_dummy_value(postage))
}

/// A broadcast transaction that split one buyer output into
/// `[dummy, dummy, remainder]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub txid: Txid,
    pub raw_hex: String,
    pub outputs: Vec<SpendableOutput>,
}

#[derive(Debug)]
pub struct DummyOutcome {
    /// The working set after any splits.
    pub utxos: Vec<SpendableOutput>,
    pub dummy_inputs: Vec<SpendableOutput>,
    pub performed_splits: Vec<SplitOutcome>,
    pub last_error: Option<Error>,
}

impl DummyOutcome {
    pub fn is_sufficient(&self) -> bool {
        self.dummy_inputs.len() == 2
    }
}

/// The working set with `spent` replaced by `created`.
pub fn replace_spent(
    utxos: &[SpendableOutput],
    spent: &OutPoint,
    created: &[SpendableOutput],
) -> Vec<SpendableOutput> {
    utxos
        .iter()
        .filter(|utxo| utxo.outpoint() != *spent)
        .chain(created)
        .cloned()
        .collect()
}

/// Makes sure two dummies exist, splitting the largest usable outputs when
/// they don't. Every successful split is broadcast and cannot be undone.
pub async fn ensure_dummy_inputs<C>(
    client: &C,
    cache: &mut PrevTxCache,
    buyer: &KeyPair,
    utxos: Vec<SpendableOutput>,
    options: &BuyerOptions,
    allow_split: bool,
) -> DummyOutcome
where
    C: NodeClient + ?Sized,
{
    let postage = options.postage_units;
    if let Err(e) = check_postage(postage) {
        return DummyOutcome {
            utxos,
            dummy_inputs: Vec::new(),
            performed_splits: Vec::new(),
            last_error: Some(e),
        };
    }

    let mut working = dedup_outputs(utxos);
    let mut tried: HashSet<OutPoint> = HashSet::new();
    let mut performed_splits = Vec::new();
    let mut last_error = None;

    loop {
        let dummy_inputs = pick_two_dummies(&working, postage);
        if !needs_more_dummies(&dummy_inputs, postage) || !allow_split {
            debug!(
                dummies = dummy_inputs.len(),
                splits = performed_splits.len(),
                "dummy selection finished"
            );
            return DummyOutcome {
                utxos: working,
                dummy_inputs,
                performed_splits,
                last_error,
            };
        }

        let candidate = working
            .iter()
            .filter(|utxo| !is_token_shaped(utxo.value, postage))
            .filter(|utxo| !tried.contains(&utxo.outpoint()))
            .max_by_key(|utxo| utxo.value)
            .cloned();

        let Some(candidate) = candidate else {
            debug!(
                dummies = dummy_inputs.len(),
                "no split candidates left for dummy inputs"
            );
            return DummyOutcome {
                utxos: working,
                dummy_inputs,
                performed_splits,
                last_error,
            };
        };

        match split_buyer_utxo(client, cache, buyer, &candidate, options).await {
            Ok(split) => {
                working = replace_spent(&working, &candidate.outpoint(), &split.outputs);
                performed_splits.push(split);
            }
            Err(e) => {
                warn!(candidate = %candidate.outpoint(), error = %e, "dummy split failed");
                tried.insert(candidate.outpoint());
                last_error = Some(e);
            }
        }
    }
}

/// Spends `candidate` into two dummies and a remainder, then broadcasts.
///
/// Fails without side effects if the remainder would not exceed the dust
/// threshold. The new outputs are returned with zero confirmations and the
/// split transaction is added to `cache`.
pub async fn split_buyer_utxo<C>(
    client: &C,
    cache: &mut PrevTxCache,
    buyer: &KeyPair,
    candidate: &SpendableOutput,
    options: &BuyerOptions,
) -> Result<SplitOutcome>
where
    C: NodeClient + ?Sized,
{
    check_postage(options.postage_units)?;

    let source = candidate.outpoint();
    let dummy_value = compute_split_dummy_value(options.postage_units);
    let fee = estimate_fee(1, 3, options.fee_rate);

    let remainder = dummy_value
        .checked_mul(2)
        .and_then(|dummies| dummies.checked_add(fee))
        .and_then(|spent| candidate.value.checked_sub(spent))
        .unwrap_or(0);
    if remainder <= options.dust_threshold_units {
        return Err(Error::range(format!(
            "splitting {source} ({} units) into two {dummy_value} unit dummies leaves {remainder}, \
             at or below the dust threshold {}",
            candidate.value, options.dust_threshold_units
        )));
    }

    let prevout = cache.prevout(client, &source).await?;
    if prevout.value.to_sat() != candidate.value {
        return Err(Error::validation(format!(
            "output {source} is worth {} units, not the reported {}",
            prevout.value.to_sat(),
            candidate.value
        )));
    }

    let buyer_script = buyer.p2pkh_script();
    let transaction = split_transaction(source, dummy_value, remainder, buyer_script.clone());
    let mut psbt = Psbt::from_unsigned_tx(transaction)
        .map_err(|e| Error::validation(format!("cannot build split transaction: {e}")))?;

    sign_input(
        &mut psbt,
        0,
        buyer,
        &prevout.script_pubkey,
        EcdsaSighashType::All,
    )?;
    finalize_p2pkh_input(&mut psbt, 0)?;
    let transaction = psbt.extract_tx_unchecked_fee_rate();
    verify_transaction(&transaction, &[prevout.script_pubkey])?;

    let raw_hex = encode_transaction(&transaction);
    let txid = transaction.compute_txid();

    info!(%txid, %source, dummy_value, remainder, "broadcasting dummy split");
    let broadcast_txid = client.broadcast_transaction(&raw_hex).await?;
    if broadcast_txid != txid {
        warn!(%txid, %broadcast_txid, "node reported a different id for the split");
    }

    let owner_script_hex = Some(buyer_script.to_hex_string());
    let outputs = transaction
        .output
        .iter()
        .enumerate()
        .map(|(vout, output)| SpendableOutput {
            txid,
            vout: vout as u32,
            value: output.value.to_sat(),
            owner_script_hex: owner_script_hex.clone(),
            confirmations: Some(0),
        })
        .collect();
    cache.insert(transaction);

    Ok(SplitOutcome {
        txid,
        raw_hex,
        outputs,
    })
}
