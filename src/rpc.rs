//! JSON-RPC [`NodeClient`] for a bitcoind-compatible node.

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::Txid;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    client::NodeClient,
    config::RpcConfig,
    error::{Error, Result},
    utxo::{coins_to_units, SpendableOutput},
};

const RPC_ID: &str = "inscription-swap";

/// Blocking `ureq` calls run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    url: String,
    authorization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListUnspentEntry {
    txid: String,
    vout: u32,
    amount: Value,
    #[serde(default)]
    confirmations: Option<u32>,
    #[serde(default, rename = "scriptPubKey")]
    script_pub_key: Option<String>,
}

impl RpcClient {
    pub fn new(config: RpcConfig) -> Self {
        let authorization = config.user.map(|user| {
            let credentials = format!("{user}:{}", config.password.unwrap_or_default());
            format!("Basic {}", STANDARD.encode(credentials))
        });

        Self {
            inner: Arc::new(Inner {
                url: config.url,
                authorization,
            }),
        }
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value> {
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || inner.call(method, params))
            .await
            .map_err(|e| Error::network(format!("{method} task failed: {e}")))?
    }
}

impl Inner {
    fn call(&self, method: &str, params: Value) -> Result<Value> {
        trace!(method, %params, "rpc request");

        let mut request = ureq::post(&self.url);
        if let Some(authorization) = &self.authorization {
            request = request.set("Authorization", authorization);
        }

        let body = ureq::json!({
            "jsonrpc": "1.0",
            "id": RPC_ID,
            "method": method,
            "params": params,
        });

        // Nodes answer RPC errors with a non-2xx status and a JSON body.
        let response = match request.send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(Error::network(format!("{method} failed: {e}"))),
        };

        let response: RpcResponse = response
            .into_json()
            .map_err(|e| Error::network(format!("{method} returned unreadable body: {e}")))?;

        if let Some(error) = response.error {
            return Err(Error::network(format!(
                "{method} rejected ({}): {}",
                error.code, error.message
            )));
        }

        Ok(response.result)
    }
}

/// Coin amounts as the node prints them, which may be in exponent form.
fn amount_to_units(amount: &Value) -> Result<u64> {
    match amount {
        Value::String(coins) => coins_to_units(coins),
        Value::Number(number) => {
            let text = number.to_string();
            if text.contains(['e', 'E']) {
                let coins = number
                    .as_f64()
                    .ok_or_else(|| Error::network(format!("unreadable amount {text}")))?;
                coins_to_units(&format!("{coins:.8}"))
            } else {
                coins_to_units(&text)
            }
        }
        other => Err(Error::network(format!("amount is not a number: {other}"))),
    }
}

fn spendable_output(entry: ListUnspentEntry) -> Result<SpendableOutput> {
    let txid = Txid::from_str(&entry.txid)
        .map_err(|e| Error::network(format!("listunspent returned bad txid {}: {e}", entry.txid)))?;

    Ok(SpendableOutput {
        txid,
        vout: entry.vout,
        value: amount_to_units(&entry.amount)?,
        owner_script_hex: entry.script_pub_key,
        confirmations: entry.confirmations,
    })
}

#[async_trait]
impl NodeClient for RpcClient {
    async fn fetch_previous_transaction(&self, txid: &Txid) -> Result<String> {
        let result = self
            .call("getrawtransaction", ureq::json!([txid.to_string(), 0]))
            .await?;

        match result {
            Value::String(raw_hex) => Ok(raw_hex),
            other => Err(Error::network(format!(
                "getrawtransaction returned {other} for {txid}"
            ))),
        }
    }

    async fn fetch_spendable_outputs(&self, address: &str) -> Result<Vec<SpendableOutput>> {
        let result = self
            .call("listunspent", ureq::json!([0, 9_999_999, [address]]))
            .await?;

        let entries: Vec<ListUnspentEntry> = serde_json::from_value(result)
            .map_err(|e| Error::network(format!("listunspent returned unexpected shape: {e}")))?;
        debug!(address, count = entries.len(), "listed unspent outputs");

        entries.into_iter().map(spendable_output).collect()
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<Txid> {
        let result = self
            .call("sendrawtransaction", ureq::json!([raw_hex]))
            .await?;

        let txid = result
            .as_str()
            .ok_or_else(|| Error::network(format!("sendrawtransaction returned {result}")))?;

        Txid::from_str(txid)
            .map_err(|e| Error::network(format!("sendrawtransaction returned bad txid {txid}: {e}")))
    }
}
