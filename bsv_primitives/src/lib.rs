//! *A crate for BSV protocol constants, value types, and transaction primitives.*
//!
//! `bsv_primitives` contains Rust structs, traits and functions that provide the network
//! constants for the BSV main and test networks, types for representing satoshi amounts
//! and value balances, P2PKH addresses and scripts (including height-locked scripts),
//! and deterministic construction and signing of raw transactions.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

pub mod address;
pub mod consensus;
pub mod constants;
pub mod encoding;
pub mod script;
pub mod transaction;
pub mod value;

pub use transaction::TxId;
