use async_trait::async_trait;
use bitcoin::Txid;

use crate::{error::Result, utxo::SpendableOutput};

/// Node access consumed by the swap flows.
///
/// Implementations surface failures as [`Error::Network`](crate::Error::Network);
/// none of the calls are retried by this crate.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Raw hex of the transaction whose hash is `txid`.
    async fn fetch_previous_transaction(&self, txid: &Txid) -> Result<String>;

    /// Unspent outputs paying to `address`, in no particular order.
    async fn fetch_spendable_outputs(&self, address: &str) -> Result<Vec<SpendableOutput>>;

    /// Submits a signed transaction and returns the id the node assigned it.
    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<Txid>;
}
