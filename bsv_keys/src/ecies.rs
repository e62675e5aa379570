//! ECIES encryption between secp256k1 identities.
//!
//! The ECDH shared point, hashed with SHA-256, keys AES-256-GCM. The wire format
//! reserves a 32-byte IV slot for compatibility with the surrounding SDK ecosystem:
//! only the first 12 bytes carry the AES-GCM nonce, the remaining 20 are zero
//! padding.
//!
//! ```text
//! | nonce (12 bytes) | zero padding (20 bytes) | ciphertext | tag (16 bytes) |
//! ```

use std::error;
use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use rand_core::{CryptoRng, RngCore};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Verification};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;
const IV_SLOT_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Errors that can occur during ECIES encryption or decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EciesError {
    /// The key material could not be combined into a shared point.
    InvalidKeyMaterial,
    /// The ciphertext is too short to contain the IV slot and authentication tag.
    MalformedCiphertext,
    /// Authenticated decryption failed: wrong key or corrupted ciphertext.
    DecryptionFailed,
    /// The underlying AEAD rejected the encryption input.
    EncryptionFailed,
}

impl fmt::Display for EciesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EciesError::InvalidKeyMaterial => write!(f, "Invalid key material"),
            EciesError::MalformedCiphertext => write!(f, "Ciphertext too short"),
            EciesError::DecryptionFailed => write!(f, "Decryption failed"),
            EciesError::EncryptionFailed => write!(f, "Encryption failed"),
        }
    }
}

impl error::Error for EciesError {}

/// `SHA-256(compressed(remote * sk))`, the shared AES-256-GCM key.
fn shared_key<C: Verification>(
    secp: &Secp256k1<C>,
    sk: &SecretKey,
    remote: &PublicKey,
) -> Result<[u8; 32], EciesError> {
    let point = remote
        .mul_tweak(secp, &Scalar::from(*sk))
        .map_err(|_| EciesError::InvalidKeyMaterial)?;
    Ok(Sha256::digest(point.serialize()).into())
}

/// Encrypts `plaintext` from the holder of `sk` to `recipient`.
pub fn encrypt<C: Verification, R: RngCore + CryptoRng>(
    secp: &Secp256k1<C>,
    rng: &mut R,
    sk: &SecretKey,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, EciesError> {
    let key = shared_key(secp, sk, recipient)?;
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| EciesError::EncryptionFailed)?;

    let mut wire = Vec::with_capacity(IV_SLOT_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&[0u8; IV_SLOT_LEN - NONCE_LEN]);
    wire.extend_from_slice(&ciphertext);
    Ok(wire)
}

/// Decrypts an ECIES wire payload from `sender` for the holder of `sk`.
pub fn decrypt<C: Verification>(
    secp: &Secp256k1<C>,
    sk: &SecretKey,
    sender: &PublicKey,
    wire: &[u8],
) -> Result<Vec<u8>, EciesError> {
    if wire.len() < IV_SLOT_LEN + TAG_LEN {
        return Err(EciesError::MalformedCiphertext);
    }
    let key = shared_key(secp, sk, sender)?;
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    cipher
        .decrypt(
            GenericArray::from_slice(&wire[..NONCE_LEN]),
            &wire[IV_SLOT_LEN..],
        )
        .map_err(|_| EciesError::DecryptionFailed)
}
