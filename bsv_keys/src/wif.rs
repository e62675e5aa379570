//! Wallet Import Format encoding of secp256k1 secret keys.

use std::error;
use std::fmt;

use secp256k1::SecretKey;
use secrecy::Zeroize;

use bsv_primitives::consensus::Parameters;

/// Errors that can occur in decoding a WIF string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifError {
    /// The string is not valid Base58Check.
    Base58(bs58::decode::Error),
    /// The decoded payload does not begin with the network's WIF prefix.
    InvalidPrefix(u8),
    /// The decoded payload is not 33 (uncompressed) or 34 (compressed) bytes.
    InvalidLength(usize),
    /// The key bytes do not form a valid secp256k1 secret key.
    InvalidKey,
}

impl fmt::Display for WifError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WifError::Base58(e) => write!(f, "Invalid WIF: {}", e),
            WifError::InvalidPrefix(prefix) => {
                write!(f, "Invalid WIF prefix: {:#04x}", prefix)
            }
            WifError::InvalidLength(len) => {
                write!(f, "Invalid WIF length: expected 33 or 34 bytes, got {}", len)
            }
            WifError::InvalidKey => write!(f, "WIF payload is not a valid secret key"),
        }
    }
}

impl error::Error for WifError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            WifError::Base58(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bs58::decode::Error> for WifError {
    fn from(e: bs58::decode::Error) -> Self {
        WifError::Base58(e)
    }
}

/// Encodes a secret key in compressed-pubkey WIF:
/// `Base58Check(prefix || key bytes || 0x01)`.
pub fn encode_wif<P: Parameters>(params: &P, sk: &SecretKey) -> String {
    let mut payload = Vec::with_capacity(34);
    payload.push(params.wif_prefix());
    payload.extend_from_slice(&sk.secret_bytes());
    payload.push(0x01);
    let encoded = bs58::encode(&payload).with_check().into_string();
    payload.zeroize();
    encoded
}

/// Decodes a WIF string for the given network. Surrounding whitespace is ignored.
///
/// Both the 34-byte compressed form (trailing `0x01`) and the legacy 33-byte
/// uncompressed form are accepted; all keys in this wallet produce compressed
/// public keys regardless of which form they were imported from.
pub fn decode_wif<P: Parameters>(params: &P, wif: &str) -> Result<SecretKey, WifError> {
    let mut decoded = bs58::decode(wif.trim()).with_check(None).into_vec()?;

    match decoded.first() {
        Some(&prefix) if prefix == params.wif_prefix() => {}
        Some(&prefix) => return Err(WifError::InvalidPrefix(prefix)),
        None => return Err(WifError::InvalidLength(0)),
    }

    let key_bytes = match decoded.len() {
        34 if decoded[33] == 0x01 => Some(&decoded[1..33]),
        33 => Some(&decoded[1..33]),
        _ => None,
    };
    let result = match key_bytes {
        Some(bytes) => SecretKey::from_slice(bytes).map_err(|_| WifError::InvalidKey),
        None => Err(WifError::InvalidLength(decoded.len())),
    };
    decoded.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use secp256k1::SecretKey;

    use super::{decode_wif, encode_wif, WifError};
    use bsv_primitives::consensus::{MAIN_NETWORK, TEST_NETWORK};

    fn test_key() -> SecretKey {
        SecretKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trip() {
        let sk = test_key();
        let wif = encode_wif(&MAIN_NETWORK, &sk);
        assert_eq!(decode_wif(&MAIN_NETWORK, &wif).unwrap(), sk);
    }

    #[test]
    fn decode_trims_whitespace() {
        let wif = encode_wif(&MAIN_NETWORK, &test_key());
        let padded = format!(" {} ", wif);
        assert_eq!(decode_wif(&MAIN_NETWORK, &padded).unwrap(), test_key());
    }

    #[test]
    fn accepts_uncompressed_form() {
        let sk = test_key();
        let mut payload = vec![0x80];
        payload.extend_from_slice(&sk.secret_bytes());
        let wif = bs58::encode(payload).with_check().into_string();
        assert_eq!(decode_wif(&MAIN_NETWORK, &wif).unwrap(), sk);
    }

    #[test]
    fn rejects_wrong_network_prefix() {
        let wif = encode_wif(&TEST_NETWORK, &test_key());
        assert_matches!(
            decode_wif(&MAIN_NETWORK, &wif),
            Err(WifError::InvalidPrefix(0xef))
        );
    }

    #[test]
    fn rejects_wrong_payload_length() {
        let mut payload = vec![0x80];
        payload.extend_from_slice(&[7u8; 16]);
        let wif = bs58::encode(payload).with_check().into_string();
        assert_matches!(
            decode_wif(&MAIN_NETWORK, &wif),
            Err(WifError::InvalidLength(17))
        );
    }

    #[test]
    fn rejects_malformed_base58() {
        assert_matches!(
            decode_wif(&MAIN_NETWORK, "not-a-valid-wif"),
            Err(WifError::Base58(_))
        );
        assert_matches!(decode_wif(&MAIN_NETWORK, ""), Err(WifError::Base58(_)));
    }
}
