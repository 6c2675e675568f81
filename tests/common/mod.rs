#![allow(dead_code)]

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime, consensus, hashes::Hash, transaction::Version, Amount, OutPoint,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use inscription_swap::{
    Error, KeyPair, NetworkParams, NodeClient, Result, SellerCommitment, SellerOptions,
    SpendableOutput,
};

pub const NETWORK: NetworkParams = NetworkParams::DOGECOIN;

#[derive(Debug, Clone)]
struct Unspent {
    outpoint: OutPoint,
    output: TxOut,
    confirmations: u32,
}

#[derive(Debug, Default)]
struct State {
    transactions: HashMap<Txid, Transaction>,
    unspent: Vec<Unspent>,
    broadcasts: Vec<Transaction>,
    reject_broadcasts: bool,
    duplicate_listings: bool,
    nonce: u32,
}

/// In-memory node. Broadcasts spend known outputs and create new
/// unconfirmed ones, like a mempool would.
#[derive(Debug, Default)]
pub struct MockNode {
    state: Mutex<State>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates one confirmed transaction paying `values` to `script` and
    /// returns its outpoints in order.
    pub fn fund(&self, script: &ScriptBuf, values: &[u64]) -> Vec<OutPoint> {
        self.fund_with_confirmations(script, values, 6)
    }

    pub fn fund_with_confirmations(
        &self,
        script: &ScriptBuf,
        values: &[u64],
        confirmations: u32,
    ) -> Vec<OutPoint> {
        let mut state = self.state.lock().unwrap();
        state.nonce += 1;

        let mut source = [0u8; 32];
        source[..4].copy_from_slice(&state.nonce.to_le_bytes());

        let transaction = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array(source), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: values
                .iter()
                .map(|value| TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: script.clone(),
                })
                .collect(),
        };

        let txid = transaction.compute_txid();
        let outpoints: Vec<OutPoint> = (0..values.len() as u32)
            .map(|vout| OutPoint::new(txid, vout))
            .collect();
        for (outpoint, output) in outpoints.iter().zip(&transaction.output) {
            state.unspent.push(Unspent {
                outpoint: *outpoint,
                output: output.clone(),
                confirmations,
            });
        }
        state.transactions.insert(txid, transaction);

        outpoints
    }

    pub fn reject_broadcasts(&self) {
        self.state.lock().unwrap().reject_broadcasts = true;
    }

    /// Makes every output appear twice in listings, as some indexers do.
    pub fn duplicate_listings(&self) {
        self.state.lock().unwrap().duplicate_listings = true;
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().broadcasts.len()
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.state
            .lock()
            .unwrap()
            .unspent
            .iter()
            .any(|unspent| unspent.outpoint == *outpoint)
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn fetch_previous_transaction(&self, txid: &Txid) -> Result<String> {
        let state = self.state.lock().unwrap();

        state
            .transactions
            .get(txid)
            .map(consensus::encode::serialize_hex)
            .ok_or_else(|| Error::Network(format!("no such transaction {txid}")))
    }

    async fn fetch_spendable_outputs(&self, address: &str) -> Result<Vec<SpendableOutput>> {
        let script = NETWORK.address_to_script(address)?;
        let state = self.state.lock().unwrap();

        let copies = if state.duplicate_listings { 2 } else { 1 };

        Ok(state
            .unspent
            .iter()
            .filter(|unspent| unspent.output.script_pubkey == script)
            .flat_map(|unspent| std::iter::repeat(unspent).take(copies))
            .map(|unspent| SpendableOutput {
                txid: unspent.outpoint.txid,
                vout: unspent.outpoint.vout,
                value: unspent.output.value.to_sat(),
                owner_script_hex: Some(script.to_hex_string()),
                confirmations: Some(unspent.confirmations),
            })
            .collect())
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<Txid> {
        let mut state = self.state.lock().unwrap();
        if state.reject_broadcasts {
            return Err(Error::Network("broadcast rejected".into()));
        }

        let bytes = hex::decode(raw_hex).map_err(|e| Error::Network(e.to_string()))?;
        let transaction: Transaction =
            consensus::deserialize(&bytes).map_err(|e| Error::Network(e.to_string()))?;

        for input in &transaction.input {
            if !state
                .unspent
                .iter()
                .any(|unspent| unspent.outpoint == input.previous_output)
            {
                return Err(Error::Network(format!(
                    "missing or spent input {}",
                    input.previous_output
                )));
            }
        }

        let txid = transaction.compute_txid();
        state.unspent.retain(|unspent| {
            !transaction
                .input
                .iter()
                .any(|input| input.previous_output == unspent.outpoint)
        });
        for (vout, output) in transaction.output.iter().enumerate() {
            state.unspent.push(Unspent {
                outpoint: OutPoint::new(txid, vout as u32),
                output: output.clone(),
                confirmations: 0,
            });
        }
        state.transactions.insert(txid, transaction.clone());
        state.broadcasts.push(transaction);

        Ok(txid)
    }
}

pub fn wif(keypair: &KeyPair) -> String {
    keypair.to_wif(&NETWORK)
}

/// Gives `seller` a token output of `token_value` and commits it for `price`.
pub async fn listed_token(
    node: &MockNode,
    seller: &KeyPair,
    token_value: u64,
    price: u64,
) -> anyhow::Result<(OutPoint, SellerCommitment)> {
    let token = node.fund(&seller.p2pkh_script(), &[token_value])[0];

    let commitment = inscription_swap::build_seller_commitment(
        node,
        &NETWORK,
        &wif(seller),
        &token.txid.to_string(),
        token.vout,
        price,
        &SellerOptions::default(),
    )
    .await?;

    Ok((token, commitment))
}
