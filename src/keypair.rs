use bitcoin::{
    base58,
    secp256k1::{self, ecdsa, All, Message, Secp256k1, SecretKey},
    PublicKey, ScriptBuf,
};
use rand::Rng;

use crate::{
    error::{Error, Result},
    network::NetworkParams,
};

lazy_static::lazy_static! {
    pub static ref SECP: Secp256k1<All> = Secp256k1::new();
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn new(secret_key: SecretKey, compressed: bool) -> Self {
        let inner = secp256k1::PublicKey::from_secret_key(&*SECP, &secret_key);
        let public_key = if compressed {
            PublicKey::new(inner)
        } else {
            PublicKey::new_uncompressed(inner)
        };

        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn from_slice(data: &[u8; 32]) -> Result<KeyPair> {
        let secret_key = SecretKey::from_slice(data)
            .map_err(|e| Error::validation(format!("invalid secret key: {e}")))?;

        Ok(KeyPair::new(secret_key, true))
    }

    pub fn new_random() -> Self {
        loop {
            if let Ok(keypair) = KeyPair::from_slice(&rand::thread_rng().gen::<[u8; 32]>()) {
                return keypair;
            }
        }
    }

    /// Parses a wallet-import-format key whose version byte belongs to `network`.
    pub fn from_wif(wif: &str, network: &NetworkParams) -> Result<KeyPair> {
        let data = base58::decode_check(wif.trim())
            .map_err(|e| Error::validation(format!("invalid private key encoding: {e}")))?;

        let compressed = match data.len() {
            33 => false,
            34 if data[33] == 0x01 => true,
            _ => return Err(Error::validation("invalid private key length")),
        };

        if data[0] != network.wif_prefix {
            return Err(Error::validation(format!(
                "private key version byte {:#04x} does not match network",
                data[0]
            )));
        }

        let secret_key = SecretKey::from_slice(&data[1..33])
            .map_err(|e| Error::validation(format!("invalid secret key: {e}")))?;

        Ok(KeyPair::new(secret_key, compressed))
    }

    pub fn to_wif(&self, network: &NetworkParams) -> String {
        let mut data = Vec::with_capacity(34);
        data.push(network.wif_prefix);
        data.extend_from_slice(&self.secret_key.secret_bytes());
        if self.public_key.compressed {
            data.push(0x01);
        }
        base58::encode_check(&data)
    }

    /// The P2PKH locking script this key can spend.
    pub fn p2pkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.public_key.pubkey_hash())
    }

    pub fn address(&self, network: &NetworkParams) -> String {
        network.p2pkh_address(&self.public_key.pubkey_hash())
    }

    pub fn sign_ecdsa(&self, message: &Message) -> ecdsa::Signature {
        SECP.sign_ecdsa(message, &self.secret_key)
    }
}

pub fn verify_ecdsa(msg: &Message, sig: &ecdsa::Signature, pk: &PublicKey) -> bool {
    SECP.verify_ecdsa(msg, sig, &pk.inner).is_ok()
}
