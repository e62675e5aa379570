//! *A crate for BSV wallet key management.*
//!
//! `bsv_keys` provides the key material handling for a non-custodial BSV wallet:
//! BIP-39 mnemonic seed handling, BIP-44 style hierarchical derivation of per-account
//! key bundles, the WIF codec, invoice-number child-key derivation for
//! sender-specific payment addresses, and message signing and encryption built on
//! those keys.
//!
//! Seeds cross API boundaries as [`secrecy::SecretVec`] and are never retained by the
//! types in this crate; callers re-supply them for signing-capable operations.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

pub mod brc42;
pub mod ecies;
pub mod keys;
pub mod message;
pub mod mnemonic;
pub mod wif;

pub use keys::{AccountId, AccountKey, AccountKeyBundle, DerivationError};
pub use mnemonic::SeedFingerprint;
