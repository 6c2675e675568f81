//! Chain parameters and base58check addresses.
//!
//! The `bitcoin` crate hardcodes Bitcoin's version bytes in its `Address`
//! type, so addresses for other chains sharing the legacy transaction format
//! are encoded here from an explicit [`NetworkParams`] value.

use bitcoin::{base58, hashes::Hash, PubkeyHash, Script, ScriptBuf, ScriptHash};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
    pub wif_prefix: u8,
}

impl NetworkParams {
    pub const DOGECOIN: NetworkParams = NetworkParams {
        p2pkh_prefix: 0x1e,
        p2sh_prefix: 0x16,
        wif_prefix: 0x9e,
    };

    pub const DOGECOIN_TESTNET: NetworkParams = NetworkParams {
        p2pkh_prefix: 0x71,
        p2sh_prefix: 0xc4,
        wif_prefix: 0xf1,
    };

    pub const BITCOIN: NetworkParams = NetworkParams {
        p2pkh_prefix: 0x00,
        p2sh_prefix: 0x05,
        wif_prefix: 0x80,
    };

    pub fn p2pkh_address(&self, hash: &PubkeyHash) -> String {
        encode(self.p2pkh_prefix, hash.as_byte_array())
    }

    pub fn p2sh_address(&self, hash: &ScriptHash) -> String {
        encode(self.p2sh_prefix, hash.as_byte_array())
    }

    /// Decodes a base58check address into the locking script it pays to.
    pub fn address_to_script(&self, address: &str) -> Result<ScriptBuf> {
        let data = base58::decode_check(address.trim())
            .map_err(|e| Error::validation(format!("invalid address {address}: {e}")))?;

        if data.len() != 21 {
            return Err(Error::validation(format!(
                "invalid address {address}: payload is {} bytes",
                data.len()
            )));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[1..]);

        match data[0] {
            prefix if prefix == self.p2pkh_prefix => {
                Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
            }
            prefix if prefix == self.p2sh_prefix => {
                Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
            }
            prefix => Err(Error::validation(format!(
                "address {address} has version byte {prefix:#04x}, not valid for this network"
            ))),
        }
    }

    /// Renders a P2PKH or P2SH locking script as an address, if it is one.
    pub fn script_to_address(&self, script: &Script) -> Option<String> {
        let bytes = script.as_bytes();

        if script.is_p2pkh() {
            Some(encode(self.p2pkh_prefix, &bytes[3..23]))
        } else if script.is_p2sh() {
            Some(encode(self.p2sh_prefix, &bytes[2..22]))
        } else {
            None
        }
    }
}

fn encode(prefix: u8, hash: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + hash.len());
    data.push(prefix);
    data.extend_from_slice(hash);
    base58::encode_check(&data)
}
