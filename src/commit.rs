//! The seller's commitment as it travels to a buyer, and its inspection.

use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::{psbt::Psbt, sighash::EcdsaSighashType, OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    network::NetworkParams,
    transaction::{SELLER_PAYMENT_INDEX, TOKEN_INPUT_INDEX},
};

/// A partially signed swap offer. Only the token input is signed, under
/// SIGHASH_SINGLE|ANYONECANPAY, committing to the price output alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerCommitment {
    /// Base64 PSBT.
    pub encoded_transaction: String,
    pub seller_receive_address: String,
    pub seller_address: String,
    pub price_units: u64,
    pub token_output_value_units: u64,
}

/// What a commitment actually commits to, read from the signed transaction
/// rather than from the echoed display fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentSummary {
    pub signed_input_index: usize,
    pub token: OutPoint,
    /// Known only when the commitment embeds the token's transaction.
    pub token_value_units: Option<u64>,
    pub price_units: u64,
    pub seller_payee_script: ScriptBuf,
    pub seller_payee_address: Option<String>,
    /// `None` when the seller input is already finalized.
    pub sighash_type: Option<EcdsaSighashType>,
}

pub fn encode_psbt(psbt: &Psbt) -> String {
    STANDARD.encode(psbt.serialize())
}

pub fn decode_psbt(encoded: &str) -> Result<Psbt> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::validation(format!("commitment is not valid base64: {e}")))?;

    Psbt::deserialize(&bytes)
        .map_err(|e| Error::validation(format!("commitment is not a valid PSBT: {e}")))
}

/// Decodes and checks a commitment without touching the network.
pub fn inspect_commitment(
    network: &NetworkParams,
    commitment: &SellerCommitment,
) -> Result<CommitmentSummary> {
    decode_commitment(network, commitment).map(|(_, summary)| summary)
}

pub(crate) fn decode_commitment(
    network: &NetworkParams,
    commitment: &SellerCommitment,
) -> Result<(Psbt, CommitmentSummary)> {
    let psbt = decode_psbt(&commitment.encoded_transaction)?;

    // Prefer the input carrying a partial signature; a finalized seller
    // input is expected last.
    let signed_input_index = psbt
        .inputs
        .iter()
        .position(|input| !input.partial_sigs.is_empty())
        .or_else(|| psbt.unsigned_tx.input.len().checked_sub(1))
        .ok_or_else(|| Error::validation("commitment has no inputs"))?;

    if signed_input_index != TOKEN_INPUT_INDEX {
        return Err(Error::validation(format!(
            "commitment signs input {signed_input_index}, expected input {TOKEN_INPUT_INDEX}"
        )));
    }

    let seller_input = &psbt.inputs[signed_input_index];
    if seller_input.partial_sigs.is_empty() && seller_input.final_script_sig.is_none() {
        return Err(Error::validation("commitment carries no seller signature"));
    }

    let sighash_type = match seller_input.partial_sigs.values().next() {
        Some(signature) if signature.sighash_type != EcdsaSighashType::SinglePlusAnyoneCanPay => {
            return Err(Error::validation(format!(
                "seller signed with {}, expected SIGHASH_SINGLE|ANYONECANPAY",
                signature.sighash_type
            )))
        }
        Some(signature) => Some(signature.sighash_type),
        None => None,
    };

    let seller_output = psbt
        .unsigned_tx
        .output
        .get(SELLER_PAYMENT_INDEX)
        .ok_or_else(|| {
            Error::validation(format!(
                "commitment has no output {SELLER_PAYMENT_INDEX} to pay the seller"
            ))
        })?;

    let price_units = seller_output.value.to_sat();
    if price_units != commitment.price_units {
        return Err(Error::validation(format!(
            "commitment advertises price {} but commits to {price_units}",
            commitment.price_units
        )));
    }

    let token = psbt.unsigned_tx.input[signed_input_index].previous_output;
    let token_value_units = seller_input
        .non_witness_utxo
        .as_ref()
        .filter(|tx| tx.compute_txid() == token.txid)
        .and_then(|tx| tx.output.get(token.vout as usize))
        .map(|output| output.value.to_sat());

    let summary = CommitmentSummary {
        signed_input_index,
        token,
        token_value_units,
        price_units,
        seller_payee_address: network.script_to_address(&seller_output.script_pubkey),
        seller_payee_script: seller_output.script_pubkey.clone(),
        sighash_type,
    };

    Ok((psbt, summary))
}
