//! Completes a seller's commitment into a broadcastable swap.

use bitcoin::{psbt::Psbt, sighash::EcdsaSighashType, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    client::NodeClient,
    coin_select::{funding_candidates, select_funding, Requirement},
    commit::{decode_commitment, encode_psbt, CommitmentSummary, SellerCommitment},
    config::BuyerOptions,
    dummy::{check_postage, ensure_dummy_inputs, DummyOutcome},
    error::{Error, LiquidityError, Result},
    keypair::KeyPair,
    network::NetworkParams,
    sign::{finalize_p2pkh_input, sign_input, verify_partial_signatures, verify_transaction},
    transaction::{swap_transaction, txout, SwapOutputs, SELLER_PAYMENT_INDEX, TOKEN_INPUT_INDEX},
    utxo::{dedup_outputs, encode_transaction, PrevTxCache, SpendableOutput},
};

/// A broadcast swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub txid: Txid,
    /// Fully signed raw transaction as broadcast.
    pub raw_transaction_hex: String,
    /// The same transaction as a finalized base64 PSBT.
    pub signed_psbt: String,
    pub buyer_address: String,
    pub buyer_receive_address: String,
    pub seller_price_units: u64,
    pub platform_fee_units: u64,
    pub postage_units: u64,
    /// Zero when the leftover was too small and went to the fee.
    pub buyer_change_units: u64,
    /// Dummy splits broadcast on the way. They stay on chain regardless of
    /// the swap's fate.
    pub auxiliary_split_txids: Vec<Txid>,
}

struct Buyer {
    keypair: KeyPair,
    address: String,
    script: ScriptBuf,
    receive_address: String,
    receive_script: ScriptBuf,
    platform: Option<(ScriptBuf, u64)>,
}

impl Buyer {
    fn new(network: &NetworkParams, wif: &str, options: &BuyerOptions) -> Result<Self> {
        let keypair = KeyPair::from_wif(wif, network)?;
        let address = keypair.address(network);
        let script = keypair.p2pkh_script();

        let receive_address = options
            .buyer_receive_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .unwrap_or(&address)
            .to_owned();
        let receive_script = network.address_to_script(&receive_address)?;

        let platform = options
            .platform_fee()
            .map(|(address, fee)| network.address_to_script(address).map(|script| (script, fee)))
            .transpose()?;

        Ok(Self {
            keypair,
            address,
            script,
            receive_address,
            receive_script,
            platform,
        })
    }
}

/// Takes the seller's commitment, adds dummies, funding and the buyer's
/// outputs, signs, verifies every input and broadcasts exactly once.
///
/// Dummy splits may be broadcast before the swap itself; their ids are in
/// the result and are logged if the swap fails afterwards.
pub async fn complete_swap<C>(
    client: &C,
    network: &NetworkParams,
    commitment: &SellerCommitment,
    buyer_wif: &str,
    options: &BuyerOptions,
) -> Result<SwapResult>
where
    C: NodeClient + ?Sized,
{
    check_postage(options.postage_units)?;
    let buyer = Buyer::new(network, buyer_wif, options)?;
    let (commitment_psbt, summary) = decode_commitment(network, commitment)?;

    let mut cache = PrevTxCache::new();
    if let Some(token_tx) = commitment_psbt.inputs[TOKEN_INPUT_INDEX].non_witness_utxo.clone() {
        if token_tx.compute_txid() == summary.token.txid {
            cache.insert(token_tx);
        }
    }

    // Checked before any split is broadcast.
    let token_output = cache.prevout(client, &summary.token).await?;
    if commitment_psbt.inputs[TOKEN_INPUT_INDEX].final_script_sig.is_none() {
        verify_partial_signatures(&commitment_psbt, TOKEN_INPUT_INDEX, &token_output.script_pubkey)?;
    }

    let listed = client.fetch_spendable_outputs(&buyer.address).await?;
    let utxos: Vec<SpendableOutput> = dedup_outputs(listed)
        .into_iter()
        .filter(|utxo| utxo.confirmations() >= options.min_confirmations)
        .filter(|utxo| utxo.outpoint() != summary.token)
        .collect();
    if utxos.is_empty() {
        return Err(LiquidityError::NoSpendableOutputs.into());
    }
    debug!(count = utxos.len(), buyer = %buyer.address, "buyer outputs available");

    let allow_split = options.min_confirmations == 0;
    let dummies = ensure_dummy_inputs(
        client,
        &mut cache,
        &buyer.keypair,
        utxos,
        options,
        allow_split,
    )
    .await;
    let split_txids: Vec<Txid> = dummies.performed_splits.iter().map(|split| split.txid).collect();

    let result = assemble_and_broadcast(
        client,
        &mut cache,
        &buyer,
        &commitment_psbt,
        &summary,
        token_output,
        dummies,
        options,
    )
    .await;

    match result {
        Ok(mut swap) => {
            swap.auxiliary_split_txids = split_txids;
            Ok(swap)
        }
        Err(e) => {
            if !split_txids.is_empty() {
                warn!(
                    ?split_txids,
                    error = %e,
                    "swap failed after dummy splits were broadcast"
                );
            }
            Err(e)
        }
    }
}

async fn assemble_and_broadcast<C>(
    client: &C,
    cache: &mut PrevTxCache,
    buyer: &Buyer,
    commitment_psbt: &Psbt,
    summary: &CommitmentSummary,
    token_output: TxOut,
    dummies: DummyOutcome,
    options: &BuyerOptions,
) -> Result<SwapResult>
where
    C: NodeClient + ?Sized,
{
    let [first_dummy, second_dummy] = <[SpendableOutput; 2]>::try_from(dummies.dummy_inputs)
        .map_err(|_| LiquidityError::InsufficientDummies {
            reason: dummies.last_error.as_ref().map(ToString::to_string),
        })?;

    let postage = options.postage_units;
    let platform_fee_units = buyer.platform.as_ref().map_or(0, |(_, fee)| *fee);
    let amount = summary
        .price_units
        .checked_add(platform_fee_units)
        .and_then(|amount| amount.checked_add(postage.checked_mul(2)?))
        .ok_or_else(|| Error::range("price, platform fee and postage overflow"))?;

    let reserved = [first_dummy.outpoint(), second_dummy.outpoint()];
    let candidates = funding_candidates(&dummies.utxos, &reserved, postage, postage);
    let selection = select_funding(
        &candidates,
        Requirement {
            amount,
            fixed_inputs: 3,
            output_count: 6 + usize::from(buyer.platform.is_some()),
            fee_rate: options.fee_rate,
            dust_threshold: options.dust_threshold_units,
        },
    )?;
    debug!(
        inputs = selection.inputs.len(),
        fee = selection.fee,
        change = selection.change,
        "funding selected"
    );

    let committed = &commitment_psbt.unsigned_tx;
    let outputs = SwapOutputs {
        dummy_refund: txout(first_dummy.value + second_dummy.value, buyer.script.clone()),
        token: txout(token_output.value.to_sat(), buyer.receive_script.clone()),
        seller_payment: committed.output[SELLER_PAYMENT_INDEX].clone(),
        platform_fee: buyer
            .platform
            .as_ref()
            .map(|(script, fee)| txout(*fee, script.clone())),
        postage: [
            txout(postage, buyer.script.clone()),
            txout(postage, buyer.script.clone()),
        ],
        change: selection
            .has_change()
            .then(|| txout(selection.change, buyer.script.clone())),
    };

    let funding: Vec<OutPoint> = selection.inputs.iter().map(SpendableOutput::outpoint).collect();
    let transaction = swap_transaction(
        committed.version,
        committed.lock_time,
        reserved,
        committed.input[TOKEN_INPUT_INDEX].clone(),
        &funding,
        outputs,
    );

    let mut psbt = Psbt::from_unsigned_tx(transaction)
        .map_err(|e| Error::validation(format!("cannot build swap transaction: {e}")))?;

    let mut prevout_scripts = Vec::with_capacity(psbt.unsigned_tx.input.len());
    for index in 0..psbt.unsigned_tx.input.len() {
        if index == TOKEN_INPUT_INDEX {
            psbt.inputs[index] = commitment_psbt.inputs[TOKEN_INPUT_INDEX].clone();
            prevout_scripts.push(token_output.script_pubkey.clone());
            continue;
        }

        let outpoint = psbt.unsigned_tx.input[index].previous_output;
        let prevout = cache.prevout(client, &outpoint).await?;
        psbt.inputs[index].non_witness_utxo = cache.get(&outpoint.txid).cloned();
        prevout_scripts.push(prevout.script_pubkey);
    }

    for (index, script_pubkey) in prevout_scripts.iter().enumerate() {
        if index == TOKEN_INPUT_INDEX {
            continue;
        }
        sign_input(&mut psbt, index, &buyer.keypair, script_pubkey, EcdsaSighashType::All)?;
        verify_partial_signatures(&psbt, index, script_pubkey)?;
    }
    if psbt.inputs[TOKEN_INPUT_INDEX].final_script_sig.is_none() {
        verify_partial_signatures(&psbt, TOKEN_INPUT_INDEX, &token_output.script_pubkey)?;
    }

    for index in 0..psbt.inputs.len() {
        finalize_p2pkh_input(&mut psbt, index)?;
    }
    let signed_psbt = encode_psbt(&psbt);
    let transaction = psbt.extract_tx_unchecked_fee_rate();
    verify_transaction(&transaction, &prevout_scripts)?;

    let raw_transaction_hex = encode_transaction(&transaction);
    let txid = transaction.compute_txid();

    info!(
        %txid,
        token = %summary.token,
        price = summary.price_units,
        fee = selection.fee,
        "broadcasting swap"
    );
    let broadcast_txid = client.broadcast_transaction(&raw_transaction_hex).await?;
    if broadcast_txid != txid {
        warn!(%txid, %broadcast_txid, "node reported a different id for the swap");
    }

    Ok(SwapResult {
        txid,
        raw_transaction_hex,
        signed_psbt,
        buyer_address: buyer.address.clone(),
        buyer_receive_address: buyer.receive_address.clone(),
        seller_price_units: summary.price_units,
        platform_fee_units,
        postage_units: postage,
        buyer_change_units: selection.change,
        auxiliary_split_txids: Vec::new(),
    })
}
