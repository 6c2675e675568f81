use bitcoin::{psbt::Psbt, sighash::EcdsaSighashType, OutPoint};
use tracing::info;

use crate::{
    client::NodeClient,
    commit::{encode_psbt, SellerCommitment},
    config::SellerOptions,
    error::{Error, Result},
    keypair::KeyPair,
    network::NetworkParams,
    sign::{sign_input, verify_partial_signatures},
    transaction::{seller_commitment_transaction, TOKEN_INPUT_INDEX},
    utxo::{parse_txid, PrevTxCache},
};

/// Builds and signs the seller's side of a swap of the token at
/// `token_txid:token_vout` for `price_units`.
pub async fn build_seller_commitment<C>(
    client: &C,
    network: &NetworkParams,
    seller_wif: &str,
    token_txid: &str,
    token_vout: u32,
    price_units: u64,
    options: &SellerOptions,
) -> Result<SellerCommitment>
where
    C: NodeClient + ?Sized,
{
    let seller = KeyPair::from_wif(seller_wif, network)?;
    let token_txid = parse_txid(token_txid)?;
    if price_units == 0 {
        return Err(Error::validation("price must be positive"));
    }

    let seller_address = seller.address(network);
    let seller_receive_address = options
        .seller_receive_address
        .as_deref()
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .unwrap_or(&seller_address)
        .to_owned();
    let payee_script = network.address_to_script(&seller_receive_address)?;

    let mut cache = PrevTxCache::new();
    let token = OutPoint {
        txid: token_txid,
        vout: token_vout,
    };
    let token_output = cache.prevout(client, &token).await?;

    if let Some(postage) = options.postage_units {
        if token_output.value.to_sat() < postage {
            return Err(Error::range(format!(
                "token output {token} holds {} units, below the required postage {postage}",
                token_output.value.to_sat()
            )));
        }
    }

    if token_output.script_pubkey != seller.p2pkh_script() {
        return Err(Error::Ownership(format!(
            "token output {token} is not locked to the key of {seller_address}"
        )));
    }

    let transaction = seller_commitment_transaction(token, price_units, payee_script);
    let mut psbt = Psbt::from_unsigned_tx(transaction)
        .map_err(|e| Error::validation(format!("cannot build commitment: {e}")))?;
    psbt.inputs[TOKEN_INPUT_INDEX].non_witness_utxo = cache.get(&token_txid).cloned();

    sign_input(
        &mut psbt,
        TOKEN_INPUT_INDEX,
        &seller,
        &token_output.script_pubkey,
        EcdsaSighashType::SinglePlusAnyoneCanPay,
    )?;
    verify_partial_signatures(&psbt, TOKEN_INPUT_INDEX, &token_output.script_pubkey)?;

    info!(%token, price_units, seller = %seller_address, "built seller commitment");

    Ok(SellerCommitment {
        encoded_transaction: encode_psbt(&psbt),
        seller_receive_address,
        seller_address,
        price_units,
        token_output_value_units: token_output.value.to_sat(),
    })
}
