//! Hierarchical derivation of per-account key material.

use std::error;
use std::fmt;

use bip32::{ChildNumber, ExtendedPrivateKey};
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use secrecy::{ExposeSecret, SecretVec};

use bsv_primitives::address::TransparentAddress;
use bsv_primitives::consensus::Parameters;

use crate::wif;

/// The index of a BIP-44 style account.
///
/// Hardened derivation limits this to the range `[0, 2^31)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AccountId(u32);

impl AccountId {
    pub const ZERO: Self = AccountId(0);

    /// Returns the next account index, or `None` at the end of the hardened range.
    pub fn next(&self) -> Option<Self> {
        AccountId::try_from(self.0 + 1).ok()
    }
}

impl TryFrom<u32> for AccountId {
    type Error = TryFromIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value < (1 << 31) {
            Ok(AccountId(value))
        } else {
            Err(TryFromIntError(()))
        }
    }
}

impl From<AccountId> for u32 {
    fn from(id: AccountId) -> u32 {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The error type returned when an account index is outside the hardened range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TryFromIntError(());

impl fmt::Display for TryFromIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "account index out of range")
    }
}

impl error::Error for TryFromIntError {}

/// Errors that can occur in the course of deriving account key material.
#[derive(Debug)]
pub enum DerivationError {
    /// An error originating in the underlying BIP-32 derivation.
    Bip32(bip32::Error),
    /// The supplied key material failed to parse, or a derived tweak fell outside the
    /// secp256k1 scalar field.
    InvalidKeyMaterial,
}

impl fmt::Display for DerivationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DerivationError::Bip32(e) => write!(f, "Key derivation failed: {}", e),
            DerivationError::InvalidKeyMaterial => write!(f, "Invalid key material"),
        }
    }
}

impl error::Error for DerivationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            DerivationError::Bip32(e) => Some(e),
            DerivationError::InvalidKeyMaterial => None,
        }
    }
}

impl From<bip32::Error> for DerivationError {
    fn from(e: bip32::Error) -> Self {
        DerivationError::Bip32(e)
    }
}

/// A derived leaf key together with its public half.
///
/// No `Debug` impl; the secret half must not end up in logs.
#[derive(Clone)]
pub struct AccountKey {
    sk: SecretKey,
    pk: PublicKey,
}

impl AccountKey {
    fn from_secret_key<C: Signing>(secp: &Secp256k1<C>, sk: SecretKey) -> Self {
        let pk = PublicKey::from_secret_key(secp, &sk);
        AccountKey { sk, pk }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.sk
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    /// The P2PKH address of the key's compressed public key.
    pub fn address(&self) -> TransparentAddress {
        TransparentAddress::from_pubkey(&self.pk)
    }

    /// The compressed public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.pk.serialize())
    }

    /// Encodes the secret half in Wallet Import Format for the given network.
    pub fn to_wif<P: Parameters>(&self, params: &P) -> String {
        wif::encode_wif(params, &self.sk)
    }
}

/// The three leaf keys that back an account: payment, ordinals, and identity.
///
/// Derivation paths (`coin` is the network's BIP-44 coin type):
///
/// ```text
/// payment:  m/44'/coin'/account'/1/0
/// ordinals: m/44'/coin'/(2 * account + 1)'/0/0
/// identity: m/0'/coin'/account'/0/0
/// ```
#[derive(Clone)]
pub struct AccountKeyBundle {
    account: AccountId,
    payment: AccountKey,
    ordinals: AccountKey,
    identity: AccountKey,
}

impl AccountKeyBundle {
    /// Derives the key bundle for `account` from a BIP-39 seed.
    pub fn from_seed<P: Parameters>(
        params: &P,
        seed: &SecretVec<u8>,
        account: AccountId,
    ) -> Result<Self, DerivationError> {
        let secp = Secp256k1::signing_only();
        let seed = seed.expose_secret();
        let coin = params.coin_type();

        let payment = derive_leaf(
            &secp,
            seed,
            &[
                ChildNumber::new(44, true)?,
                ChildNumber::new(coin, true)?,
                ChildNumber::new(account.into(), true)?,
                ChildNumber::new(1, false)?,
                ChildNumber::new(0, false)?,
            ],
        )?;
        let ordinals = derive_leaf(
            &secp,
            seed,
            &[
                ChildNumber::new(44, true)?,
                ChildNumber::new(coin, true)?,
                ChildNumber::new(u32::from(account) * 2 + 1, true)?,
                ChildNumber::new(0, false)?,
                ChildNumber::new(0, false)?,
            ],
        )?;
        let identity = derive_leaf(
            &secp,
            seed,
            &[
                ChildNumber::new(0, true)?,
                ChildNumber::new(coin, true)?,
                ChildNumber::new(account.into(), true)?,
                ChildNumber::new(0, false)?,
                ChildNumber::new(0, false)?,
            ],
        )?;

        Ok(AccountKeyBundle {
            account,
            payment,
            ordinals,
            identity,
        })
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    /// The key receiving standard payments.
    pub fn payment(&self) -> &AccountKey {
        &self.payment
    }

    /// The key holding ordinal (collectible) outputs.
    pub fn ordinals(&self) -> &AccountKey {
        &self.ordinals
    }

    /// The identity key: the root of sender-specific child derivation and the signer
    /// for identity operations.
    pub fn identity(&self) -> &AccountKey {
        &self.identity
    }
}

fn derive_leaf<C: Signing>(
    secp: &Secp256k1<C>,
    seed: &[u8],
    path: &[ChildNumber],
) -> Result<AccountKey, DerivationError> {
    let mut xprv = ExtendedPrivateKey::<SecretKey>::new(seed)?;
    for child in path {
        xprv = xprv.derive_child(*child)?;
    }
    Ok(AccountKey::from_secret_key(secp, *xprv.private_key()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{AccountId, AccountKeyBundle};
    use crate::mnemonic::{parse_mnemonic, seed_from_mnemonic};
    use bsv_primitives::consensus::{MAIN_NETWORK, TEST_NETWORK};

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_bundle(account: u32) -> AccountKeyBundle {
        let seed = seed_from_mnemonic(&parse_mnemonic(TEST_MNEMONIC).unwrap());
        AccountKeyBundle::from_seed(&MAIN_NETWORK, &seed, AccountId::try_from(account).unwrap())
            .unwrap()
    }

    #[test]
    fn account_id_range() {
        assert_matches!(AccountId::try_from(0), Ok(_));
        assert_matches!(AccountId::try_from((1 << 31) - 1), Ok(_));
        assert_matches!(AccountId::try_from(1 << 31), Err(_));
        assert_eq!(AccountId::try_from((1 << 31) - 1).unwrap().next(), None);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = test_bundle(0);
        let b = test_bundle(0);
        assert_eq!(a.payment().address(), b.payment().address());
        assert_eq!(a.ordinals().address(), b.ordinals().address());
        assert_eq!(a.identity().address(), b.identity().address());
    }

    #[test]
    fn roles_derive_distinct_keys() {
        let bundle = test_bundle(0);
        assert_ne!(bundle.payment().address(), bundle.ordinals().address());
        assert_ne!(bundle.payment().address(), bundle.identity().address());
        assert_ne!(bundle.ordinals().address(), bundle.identity().address());
    }

    #[test]
    fn accounts_derive_distinct_keys() {
        let a = test_bundle(0);
        let b = test_bundle(1);
        assert_ne!(a.payment().address(), b.payment().address());
        assert_ne!(a.ordinals().address(), b.ordinals().address());
        assert_ne!(a.identity().address(), b.identity().address());
    }

    #[test]
    fn mainnet_encodings_have_expected_shapes() {
        let bundle = test_bundle(0);
        let address = bundle.payment().address().encode(&MAIN_NETWORK);
        assert!(address.starts_with('1'), "{}", address);

        // Compressed mainnet WIFs begin with K or L.
        let wif = bundle.payment().to_wif(&MAIN_NETWORK);
        assert!(wif.starts_with('K') || wif.starts_with('L'), "{}", wif);

        let pubkey = bundle.payment().public_key_hex();
        assert_eq!(pubkey.len(), 66);
        assert!(pubkey.starts_with("02") || pubkey.starts_with("03"), "{}", pubkey);
    }

    #[test]
    fn networks_differ_in_coin_type_and_encoding() {
        let seed = seed_from_mnemonic(&parse_mnemonic(TEST_MNEMONIC).unwrap());
        let main = AccountKeyBundle::from_seed(&MAIN_NETWORK, &seed, AccountId::ZERO).unwrap();
        let test = AccountKeyBundle::from_seed(&TEST_NETWORK, &seed, AccountId::ZERO).unwrap();
        assert_ne!(
            main.payment().address().encode(&MAIN_NETWORK),
            test.payment().address().encode(&TEST_NETWORK),
        );
        // Compressed testnet WIFs begin with c.
        assert!(test.payment().to_wif(&TEST_NETWORK).starts_with('c'));
    }
}
