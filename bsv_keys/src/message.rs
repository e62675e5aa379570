//! ECDSA signing of arbitrary messages over SHA-256 digests.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use sha2::{Digest, Sha256};

/// Signs `SHA-256(data)` with `sk`, returning a low-S normalized DER signature.
pub fn sign_message<C: Signing>(secp: &Secp256k1<C>, sk: &SecretKey, data: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(data);
    let mut sig = secp.sign_ecdsa(&Message::from_digest(digest.into()), sk);
    sig.normalize_s();
    sig.serialize_der().to_vec()
}

/// Verifies a DER signature over `SHA-256(data)`.
///
/// An empty or malformed signature verifies as `false` rather than erroring, so
/// callers can treat the result as a plain accept/reject decision.
pub fn verify_message<C: Verification>(
    secp: &Secp256k1<C>,
    pk: &PublicKey,
    data: &[u8],
    sig_der: &[u8],
) -> bool {
    if sig_der.is_empty() {
        return false;
    }
    let Ok(sig) = Signature::from_der(sig_der) else {
        return false;
    };
    let digest = Sha256::digest(data);
    secp.verify_ecdsa(&Message::from_digest(digest.into()), &sig, pk)
        .is_ok()
}
