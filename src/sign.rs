use bitcoin::{
    ecdsa,
    hashes::Hash,
    psbt::{Psbt, PsbtSighashType},
    script::{Builder, Instruction, PushBytesBuf},
    secp256k1::Message,
    sighash::{EcdsaSighashType, SighashCache},
    PublicKey, Script, ScriptBuf, Transaction,
};

use crate::{
    error::{Error, Result},
    keypair::{verify_ecdsa, KeyPair},
};

/// Legacy signature digest of `transaction`'s input `index`.
pub fn sighash_message(
    transaction: &Transaction,
    index: usize,
    script_pubkey: &Script,
    sighash_type: EcdsaSighashType,
) -> Result<Message> {
    let digest = SighashCache::new(transaction)
        .legacy_signature_hash(index, script_pubkey, sighash_type.to_u32())
        .map_err(|e| Error::range(format!("cannot compute sighash for input {index}: {e}")))?;

    Ok(Message::from_digest(digest.to_byte_array()))
}

/// Signs input `index` of the PSBT's unsigned transaction and records the
/// result as a partial signature.
pub fn sign_input(
    psbt: &mut Psbt,
    index: usize,
    keypair: &KeyPair,
    script_pubkey: &Script,
    sighash_type: EcdsaSighashType,
) -> Result<()> {
    if *script_pubkey != keypair.p2pkh_script() {
        return Err(Error::Ownership(format!(
            "input {index} is not locked to the signing key"
        )));
    }

    let message = sighash_message(&psbt.unsigned_tx, index, script_pubkey, sighash_type)?;
    let signature = ecdsa::Signature {
        signature: keypair.sign_ecdsa(&message),
        sighash_type,
    };

    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or_else(|| Error::range(format!("psbt has no input {index}")))?;
    input.partial_sigs.insert(keypair.public_key, signature);
    input.sighash_type = Some(PsbtSighashType::from(sighash_type));

    Ok(())
}

/// Checks every partial signature on input `index` against the PSBT's
/// unsigned transaction. An input without signatures fails.
pub fn verify_partial_signatures(psbt: &Psbt, index: usize, script_pubkey: &Script) -> Result<()> {
    let input = psbt
        .inputs
        .get(index)
        .ok_or_else(|| Error::range(format!("psbt has no input {index}")))?;

    if input.partial_sigs.is_empty() {
        return Err(Error::signature(format!("input {index} carries no signature")));
    }

    for (public_key, signature) in &input.partial_sigs {
        verify_signature(
            &psbt.unsigned_tx,
            index,
            script_pubkey,
            public_key,
            signature,
        )?;
    }

    Ok(())
}

fn verify_signature(
    transaction: &Transaction,
    index: usize,
    script_pubkey: &Script,
    public_key: &PublicKey,
    signature: &ecdsa::Signature,
) -> Result<()> {
    if *script_pubkey != ScriptBuf::new_p2pkh(&public_key.pubkey_hash()) {
        return Err(Error::signature(format!(
            "input {index} is signed by a key that does not match its locking script"
        )));
    }

    let message = sighash_message(transaction, index, script_pubkey, signature.sighash_type)?;
    if !verify_ecdsa(&message, &signature.signature, public_key) {
        return Err(Error::signature(format!(
            "signature on input {index} does not verify"
        )));
    }

    Ok(())
}

/// Locks a P2PKH input into its final `<sig> <pubkey>` script_sig.
pub fn finalize_p2pkh_input(psbt: &mut Psbt, index: usize) -> Result<()> {
    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or_else(|| Error::range(format!("psbt has no input {index}")))?;

    if input.final_script_sig.is_some() {
        return Ok(());
    }

    let (public_key, signature) = match input.partial_sigs.len() {
        1 => input
            .partial_sigs
            .iter()
            .next()
            .map(|(pk, sig)| (*pk, *sig))
            .ok_or_else(|| Error::signature(format!("input {index} carries no signature")))?,
        n => {
            return Err(Error::signature(format!(
                "input {index} has {n} signatures, expected exactly one"
            )))
        }
    };

    input.final_script_sig = Some(p2pkh_script_sig(&signature, &public_key)?);
    input.partial_sigs.clear();
    input.sighash_type = None;

    Ok(())
}

pub fn p2pkh_script_sig(signature: &ecdsa::Signature, public_key: &PublicKey) -> Result<ScriptBuf> {
    let signature = PushBytesBuf::try_from(signature.to_vec())
        .map_err(|e| Error::signature(format!("signature too large to push: {e}")))?;

    Ok(Builder::new()
        .push_slice(signature)
        .push_key(public_key)
        .into_script())
}

/// Independently verifies the final script_sig of input `index`.
pub fn verify_p2pkh_input(
    transaction: &Transaction,
    index: usize,
    script_pubkey: &Script,
) -> Result<()> {
    let input = transaction
        .input
        .get(index)
        .ok_or_else(|| Error::range(format!("transaction has no input {index}")))?;

    let pushes = input
        .script_sig
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Ok(bytes.as_bytes()),
            _ => Err(Error::signature(format!(
                "input {index} script_sig is not a plain P2PKH unlock"
            ))),
        })
        .collect::<Result<Vec<&[u8]>>>()?;

    let [signature, public_key] = pushes.as_slice() else {
        return Err(Error::signature(format!(
            "input {index} script_sig has {} pushes, expected 2",
            pushes.len()
        )));
    };

    let signature = ecdsa::Signature::from_slice(signature)
        .map_err(|e| Error::signature(format!("input {index} has malformed signature: {e}")))?;
    let public_key = PublicKey::from_slice(public_key)
        .map_err(|e| Error::signature(format!("input {index} has malformed public key: {e}")))?;

    verify_signature(transaction, index, script_pubkey, &public_key, &signature)
}

/// Verifies every input of `transaction`; `prevout_scripts[i]` is the
/// locking script spent by input `i`.
pub fn verify_transaction(transaction: &Transaction, prevout_scripts: &[ScriptBuf]) -> Result<()> {
    if prevout_scripts.len() != transaction.input.len() {
        return Err(Error::signature(format!(
            "have {} prevout scripts for {} inputs",
            prevout_scripts.len(),
            transaction.input.len()
        )));
    }

    for (index, script_pubkey) in prevout_scripts.iter().enumerate() {
        verify_p2pkh_input(transaction, index, script_pubkey)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::Hash, OutPoint, Txid};

    use super::*;
    use crate::transaction::{
        make_txin, seller_commitment_transaction, txout, SELLER_PAYMENT_INDEX, TOKEN_INPUT_INDEX,
    };

    fn commitment_psbt(seller: &KeyPair) -> Psbt {
        let token = OutPoint::new(Txid::from_byte_array([8; 32]), 0);
        let tx = seller_commitment_transaction(token, 42_000, seller.p2pkh_script());
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();

        sign_input(
            &mut psbt,
            TOKEN_INPUT_INDEX,
            seller,
            &seller.p2pkh_script(),
            EcdsaSighashType::SinglePlusAnyoneCanPay,
        )
        .unwrap();
        psbt
    }

    #[test]
    fn single_anyonecanpay_survives_added_inputs_and_outputs() {
        let seller = KeyPair::new_random();
        let mut psbt = commitment_psbt(&seller);
        verify_partial_signatures(&psbt, TOKEN_INPUT_INDEX, &seller.p2pkh_script()).unwrap();

        psbt.unsigned_tx.input[0] = make_txin(OutPoint::new(Txid::from_byte_array([1; 32]), 3));
        psbt.unsigned_tx.output[0] = txout(12_345, seller.p2pkh_script());
        psbt.unsigned_tx
            .input
            .push(make_txin(OutPoint::new(Txid::from_byte_array([2; 32]), 0)));
        psbt.unsigned_tx.output.push(txout(1, ScriptBuf::new()));
        psbt.inputs.push(Default::default());
        psbt.outputs.push(Default::default());

        verify_partial_signatures(&psbt, TOKEN_INPUT_INDEX, &seller.p2pkh_script()).unwrap();
    }

    #[test]
    fn changing_the_price_output_breaks_the_seller_signature() {
        let seller = KeyPair::new_random();
        let mut psbt = commitment_psbt(&seller);

        psbt.unsigned_tx.output[SELLER_PAYMENT_INDEX].value = bitcoin::Amount::from_sat(1);

        let result = verify_partial_signatures(&psbt, TOKEN_INPUT_INDEX, &seller.p2pkh_script());
        assert!(matches!(result, Err(Error::Signature(_))));
    }

    #[test]
    fn refuses_to_sign_foreign_script() {
        let seller = KeyPair::new_random();
        let other = KeyPair::new_random();
        let tx = seller_commitment_transaction(OutPoint::null(), 1, seller.p2pkh_script());
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();

        let result = sign_input(
            &mut psbt,
            TOKEN_INPUT_INDEX,
            &seller,
            &other.p2pkh_script(),
            EcdsaSighashType::All,
        );

        assert!(matches!(result, Err(Error::Ownership(_))));
        assert!(psbt.inputs[TOKEN_INPUT_INDEX].partial_sigs.is_empty());
    }

    #[test]
    fn finalized_input_verifies_independently() {
        let seller = KeyPair::new_random();
        let mut psbt = commitment_psbt(&seller);

        finalize_p2pkh_input(&mut psbt, TOKEN_INPUT_INDEX).unwrap();
        assert!(psbt.inputs[TOKEN_INPUT_INDEX].partial_sigs.is_empty());

        let tx = psbt.extract_tx_unchecked_fee_rate();
        verify_p2pkh_input(&tx, TOKEN_INPUT_INDEX, &seller.p2pkh_script()).unwrap();

        let other = KeyPair::new_random();
        assert!(verify_p2pkh_input(&tx, TOKEN_INPUT_INDEX, &other.p2pkh_script()).is_err());
    }

    #[test]
    fn unsigned_input_fails_verification() {
        let seller = KeyPair::new_random();
        let psbt = commitment_psbt(&seller);

        assert!(verify_partial_signatures(&psbt, 0, &seller.p2pkh_script()).is_err());
        assert!(verify_p2pkh_input(&psbt.unsigned_tx, 0, &seller.p2pkh_script()).is_err());
    }
}
