//! *A crate for implementing non-custodial BSV wallets.*
//!
//! `bsv_client_backend` contains the engines of a BSV wallet: synchronization
//! against a remote chain indexer, basket-partitioned balance accounting, time
//! lock management, seed-based account discovery, BRC-100 application requests,
//! and encrypted backup. Everything is written against the data-store traits in
//! [`data_api`]; `bsv_client_sqlite` provides the production store, and the
//! in-memory store in `data_api::testing` backs the tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backup;
pub mod baskets;
pub mod brc100;
pub mod data_api;
pub mod diagnostics;
pub mod discovery;
pub mod locks;
pub mod remote;
pub mod sync;
pub mod wallet;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
