//! Raw transaction skeletons for the commitment, the swap and dummy splits.
//!
//! ```text
//! Inputs:  [0] dummy #1            (buyer, SIGHASH_ALL)
//!          [1] dummy #2            (buyer, SIGHASH_ALL)
//!          [2] token               (seller, SIGHASH_SINGLE|ANYONECANPAY)
//!          [3..] funding           (buyer, SIGHASH_ALL)
//!
//! Outputs: [0] buyer: dummy #1 + dummy #2
//!          [1] buyer receive: token value
//!          [2] seller payee: committed price
//!          [3] platform fee        (optional)
//!          [..] buyer: postage, buyer: postage
//!          [..] buyer: change      (only above dust)
//! ```
//!
//! A SINGLE signature on input `i` commits to output `i` only, so the token
//! input and the price output must share an index.

use bitcoin::{
    absolute::LockTime, hashes::Hash, transaction::Version, Amount, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

/// Index of the seller's token input in both commitment and swap.
pub const TOKEN_INPUT_INDEX: usize = 2;

/// Index of the price output. Must equal [`TOKEN_INPUT_INDEX`].
pub const SELLER_PAYMENT_INDEX: usize = TOKEN_INPUT_INDEX;

/// Positions the buyer's dummies take in the swap transaction.
pub const DUMMY_INPUT_INDICES: [usize; 2] = [0, 1];

pub const TOKEN_OUTPUT_INDEX: usize = 1;

const _: () = assert!(SELLER_PAYMENT_INDEX == TOKEN_INPUT_INDEX);

/// Never spendable: no transaction hashes to all ones.
pub fn placeholder_outpoint(vout: u32) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([0xff; 32]),
        vout,
    }
}

pub fn make_txin(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

pub fn txout(value: u64, script_pubkey: ScriptBuf) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    }
}

/// Three inputs with the token at [`TOKEN_INPUT_INDEX`], three outputs with
/// the price at [`SELLER_PAYMENT_INDEX`]. Everything else is a placeholder
/// the buyer replaces.
pub fn seller_commitment_transaction(
    token: OutPoint,
    price: u64,
    seller_payee: ScriptBuf,
) -> Transaction {
    let mut input = vec![make_txin(placeholder_outpoint(0)), make_txin(placeholder_outpoint(1))];
    input.insert(TOKEN_INPUT_INDEX, make_txin(token));

    let mut output = vec![txout(0, ScriptBuf::new()), txout(0, ScriptBuf::new())];
    output.insert(SELLER_PAYMENT_INDEX, txout(price, seller_payee));

    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutputs {
    pub dummy_refund: TxOut,
    pub token: TxOut,
    /// Byte-for-byte copy of the seller's committed output.
    pub seller_payment: TxOut,
    pub platform_fee: Option<TxOut>,
    pub postage: [TxOut; 2],
    pub change: Option<TxOut>,
}

impl SwapOutputs {
    pub fn count(&self) -> usize {
        5 + usize::from(self.platform_fee.is_some()) + usize::from(self.change.is_some())
    }

    fn into_vec(self) -> Vec<TxOut> {
        let [first_postage, second_postage] = self.postage;

        let mut outputs = vec![self.dummy_refund, self.token];
        outputs.insert(SELLER_PAYMENT_INDEX, self.seller_payment);
        outputs.extend(self.platform_fee);
        outputs.push(first_postage);
        outputs.push(second_postage);
        outputs.extend(self.change);
        outputs
    }
}

/// Assembles the swap transaction. `seller_input` is carried over unchanged
/// from the commitment, as are `version` and `lock_time`, since the seller's
/// signature commits to all three.
pub fn swap_transaction(
    version: Version,
    lock_time: LockTime,
    dummies: [OutPoint; 2],
    seller_input: TxIn,
    funding: &[OutPoint],
    outputs: SwapOutputs,
) -> Transaction {
    let mut input: Vec<TxIn> = dummies.iter().copied().map(make_txin).collect();
    input.insert(TOKEN_INPUT_INDEX, seller_input);
    input.extend(funding.iter().copied().map(make_txin));

    Transaction {
        version,
        lock_time,
        input,
        output: outputs.into_vec(),
    }
}

/// Splits one buyer output into `[dummy, dummy, remainder]`.
pub fn split_transaction(
    source: OutPoint,
    dummy_value: u64,
    remainder: u64,
    buyer_script: ScriptBuf,
) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![make_txin(source)],
        output: vec![
            txout(dummy_value, buyer_script.clone()),
            txout(dummy_value, buyer_script.clone()),
            txout(remainder, buyer_script),
        ],
    }
}
