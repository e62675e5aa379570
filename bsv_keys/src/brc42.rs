//! Sender-specific child key derivation over invoice numbers.
//!
//! The wallet's identity private key and a counterparty's public key combine through
//! an ECDH shared point; an HMAC-SHA256 of the invoice number, keyed by the compressed
//! point, produces an additive tweak on the identity key. The same three inputs always
//! re-derive the same child key, so the wallet only needs to remember which invoice
//! indices it has issued per sender, not the derived addresses themselves.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Signing, Verification};
use sha2::Sha256;

use std::fmt;

use bsv_primitives::address::TransparentAddress;

use crate::keys::DerivationError;

type HmacSha256 = Hmac<Sha256>;

/// The protocol identifier under which inbound payment addresses are derived.
pub const PAYMENT_PROTOCOL: &str = "3241645161d8";

/// A structured invoice number, rendered as `{protocol}-{security level}-{key id}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceNumber {
    pub protocol: String,
    pub security_level: u8,
    pub key_id: String,
}

impl InvoiceNumber {
    pub fn new(
        protocol: impl Into<String>,
        security_level: u8,
        key_id: impl Into<String>,
    ) -> Self {
        InvoiceNumber {
            protocol: protocol.into(),
            security_level,
            key_id: key_id.into(),
        }
    }

    /// The invoice number for the `index`-th payment from a sender under `label`.
    pub fn payment(label: &str, index: u32) -> Self {
        InvoiceNumber::new(PAYMENT_PROTOCOL, 2, format!("{} {}", label, index))
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{}", self.protocol, self.security_level, self.key_id)
    }
}

/// Derives the child private key for the triple (identity key, counterparty, invoice
/// number).
///
/// The derivation is `child = identity + HMAC-SHA256(compressed(counterparty *
/// identity), invoice) mod n`. It is a pure function of its inputs. A tweak outside
/// the scalar field or a zero child key is rejected as
/// [`DerivationError::InvalidKeyMaterial`] rather than panicking.
pub fn derive_child_private_key<C: Verification>(
    secp: &Secp256k1<C>,
    identity_sk: &SecretKey,
    counterparty: &PublicKey,
    invoice: &InvoiceNumber,
) -> Result<SecretKey, DerivationError> {
    let shared_point = counterparty
        .mul_tweak(secp, &Scalar::from(*identity_sk))
        .map_err(|_| DerivationError::InvalidKeyMaterial)?;

    let mut mac = HmacSha256::new_from_slice(&shared_point.serialize())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(invoice.to_string().as_bytes());
    let tweak: [u8; 32] = mac.finalize().into_bytes().into();

    let tweak = Scalar::from_be_bytes(tweak).map_err(|_| DerivationError::InvalidKeyMaterial)?;
    identity_sk
        .add_tweak(&tweak)
        .map_err(|_| DerivationError::InvalidKeyMaterial)
}

/// Derives the P2PKH address of the child key for the triple (identity key,
/// counterparty, invoice number).
pub fn derive_address_for_sender<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    identity_sk: &SecretKey,
    counterparty: &PublicKey,
    invoice: &InvoiceNumber,
) -> Result<TransparentAddress, DerivationError> {
    let child = derive_child_private_key(secp, identity_sk, counterparty, invoice)?;
    Ok(TransparentAddress::from_pubkey(
        &PublicKey::from_secret_key(secp, &child),
    ))
}
