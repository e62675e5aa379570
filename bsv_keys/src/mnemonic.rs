//! BIP-39 mnemonic handling: generation, validation, and seed material.

use std::error;
use std::fmt;

use bip0039::Count;
use secrecy::{SecretVec, Zeroize};
use sha2::{Digest, Sha256};

pub use bip0039::Mnemonic;

/// Errors that can occur in parsing a mnemonic phrase.
#[derive(Debug)]
pub struct MnemonicError(bip0039::Error);

impl fmt::Display for MnemonicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid mnemonic: {}", self.0)
    }
}

impl error::Error for MnemonicError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Generates a fresh 12-word (128-bit entropy) mnemonic from the system RNG.
pub fn generate_mnemonic() -> Mnemonic {
    Mnemonic::generate(Count::Words12)
}

/// Parses and validates a mnemonic phrase. Surrounding whitespace is ignored.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, MnemonicError> {
    Mnemonic::from_phrase(phrase.trim()).map_err(MnemonicError)
}

/// Derives the 64-byte BIP-39 seed for a mnemonic with an empty passphrase.
pub fn seed_from_mnemonic(mnemonic: &Mnemonic) -> SecretVec<u8> {
    seed_with_passphrase(mnemonic, "")
}

/// Derives the 64-byte BIP-39 seed for a mnemonic and passphrase.
pub fn seed_with_passphrase(mnemonic: &Mnemonic, passphrase: &str) -> SecretVec<u8> {
    let mut seed = mnemonic.to_seed(passphrase);
    let secret = seed.to_vec();
    seed.zeroize();
    SecretVec::new(secret)
}

/// The fingerprint of a seed: the SHA-256 hash of the seed bytes.
///
/// This identifies which seed an account was derived from without retaining the seed
/// itself; the store records fingerprints, never seed material.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedFingerprint([u8; 32]);

impl fmt::Debug for SeedFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SeedFingerprint(")?;
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for SeedFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl SeedFingerprint {
    /// Derives the fingerprint of the given seed.
    ///
    /// Returns `None` if the length of `seed_bytes` is less than 32 or greater than
    /// 252 bytes.
    pub fn from_seed(seed_bytes: &[u8]) -> Option<SeedFingerprint> {
        if (32..=252).contains(&seed_bytes.len()) {
            Some(SeedFingerprint(Sha256::digest(seed_bytes).into()))
        } else {
            None
        }
    }

    /// Reconstructs the fingerprint from a serialized value.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        SeedFingerprint(bytes)
    }

    /// Returns the fingerprint as a byte array.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}
