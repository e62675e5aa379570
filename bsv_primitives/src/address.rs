//! P2PKH addresses and their Base58Check encoding.

use std::error;
use std::fmt;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::consensus::Parameters;
use crate::script::Script;

/// Errors that can occur when decoding a Base58Check address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string was not valid Base58Check.
    Base58(bs58::decode::Error),
    /// The decoded payload had an unexpected length.
    InvalidLength(usize),
    /// The version byte did not match the expected network prefix.
    InvalidPrefix(u8),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Base58(e) => write!(f, "Invalid address: {}", e),
            AddressError::InvalidLength(n) => write!(f, "Invalid address length: {}", n),
            AddressError::InvalidPrefix(b) => {
                write!(f, "Invalid address prefix: 0x{:02x}", b)
            }
        }
    }
}

impl error::Error for AddressError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            AddressError::Base58(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bs58::decode::Error> for AddressError {
    fn from(e: bs58::decode::Error) -> Self {
        AddressError::Base58(e)
    }
}

/// A transparent P2PKH address: the hash160 of a compressed public key.
///
/// BSV retired pay-to-script-hash, so the public key hash form is the only
/// address kind this wallet produces or parses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransparentAddress([u8; 20]);

impl fmt::Debug for TransparentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransparentAddress")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl TransparentAddress {
    /// Wraps a raw pubkey hash as an address.
    pub const fn from_pubkey_hash(hash: [u8; 20]) -> Self {
        TransparentAddress(hash)
    }

    /// Derives the P2PKH address corresponding to the given pubkey.
    pub fn from_pubkey(pubkey: &secp256k1::PublicKey) -> Self {
        TransparentAddress(hash160(&pubkey.serialize()))
    }

    /// Returns the pubkey hash this address wraps.
    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generates the `scriptPubKey` corresponding to this address.
    pub fn script(&self) -> Script {
        Script::p2pkh(&self.0)
    }

    /// Encodes this address as a Base58Check string for the given network.
    pub fn encode<P: Parameters>(&self, params: &P) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(params.b58_pubkey_address_prefix());
        payload.extend_from_slice(&self.0);
        bs58::encode(payload).with_check().into_string()
    }

    /// Decodes a Base58Check address string for the given network.
    pub fn decode<P: Parameters>(params: &P, address: &str) -> Result<Self, AddressError> {
        let decoded = bs58::decode(address.trim()).with_check(None).into_vec()?;
        if decoded.len() != 21 {
            return Err(AddressError::InvalidLength(decoded.len()));
        }
        if decoded[0] != params.b58_pubkey_address_prefix() {
            return Err(AddressError::InvalidPrefix(decoded[0]));
        }
        let mut hash = [0; 20];
        hash.copy_from_slice(&decoded[1..]);
        Ok(TransparentAddress(hash))
    }
}

/// Hash160 = RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0; 20];
    out.copy_from_slice(Ripemd160::digest(Sha256::digest(data)).as_ref());
    out
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::{any, prop_compose};

    use super::TransparentAddress;

    prop_compose! {
        pub fn arb_transparent_addr()(v in proptest::array::uniform20(any::<u8>())) -> TransparentAddress {
            TransparentAddress::from_pubkey_hash(v)
        }
    }
}
