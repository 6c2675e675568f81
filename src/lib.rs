//! Trustless swaps of a single token-carrying output for coins.
//!
//! The seller signs only the token input under SIGHASH_SINGLE|ANYONECANPAY
//! ([`build_seller_commitment`]). The buyer adds dummy inputs, funding and
//! their own outputs around it, signs the rest and broadcasts
//! ([`complete_swap`]). No party ever holds the other's funds.

pub mod buyer;
pub mod client;
pub mod coin_select;
pub mod commit;
pub mod config;
pub mod dummy;
pub mod error;
pub mod fee;
pub mod keypair;
pub mod network;
pub mod rpc;
pub mod seller;
pub mod sign;
pub mod transaction;
pub mod utxo;

pub use crate::{
    buyer::{complete_swap, SwapResult},
    client::NodeClient,
    commit::{decode_psbt, encode_psbt, inspect_commitment, CommitmentSummary, SellerCommitment},
    config::{BuyerOptions, RpcConfig, SellerOptions},
    dummy::{
        compute_split_dummy_value, ensure_dummy_inputs, is_dummy_candidate, is_token_shaped,
        pick_two_dummies, split_buyer_utxo, DummyOutcome, SplitOutcome,
    },
    error::{Error, LiquidityError, Result},
    fee::{estimate_fee, FeeRate},
    keypair::KeyPair,
    network::NetworkParams,
    rpc::RpcClient,
    seller::build_seller_commitment,
    utxo::{coins_to_units, units_to_coins, PrevTxCache, SpendableOutput},
};
