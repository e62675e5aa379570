//! *An SQLite-based BSV wallet data store.*
//!
//! `bsv_client_sqlite` contains a complete SQLite-based implementation of the
//! [`WalletRead`] and [`WalletWrite`] traits from the [`bsv_client_backend::data_api`]
//! module. The sync, lock, discovery, and application engines in that crate run on top
//! of it unmodified.
//!
//! # Design
//!
//! The wallet database is a single SQLite file, created and kept current by
//! [`wallet::init::init_wallet_db`], which must be called when the database is first
//! opened. The database is read-write within these APIs and **assumed to be read-only
//! outside them**: callers may read it directly in order to extract information for
//! display to users, but must not write to it.
//!
//! Accounts are identified by a [`AccountUuid`] assigned at creation time, so that
//! identifiers exported from one copy of a wallet (for example in a backup) remain
//! unambiguous when the database is restored alongside another.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use rusqlite::Connection;
use secp256k1::PublicKey;
use time::OffsetDateTime;
use uuid::Uuid;

use bsv_keys::SeedFingerprint;
use bsv_primitives::{
    address::TransparentAddress,
    consensus::Parameters,
    transaction::{OutPoint, TxId},
    value::Satoshis,
};

use bsv_client_backend::{
    baskets::BasketTotals,
    data_api::{AccountParameters, WalletRead, WalletWrite},
    wallet::{Account, Basket, Contact, DerivedAddress, LockedUtxo, WalletTx, WalletUtxo},
};

use crate::error::SqliteClientError;

pub mod error;
pub mod wallet;

/// A unique identifier for a wallet account stored in an SQLite database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountUuid(Uuid);

impl AccountUuid {
    /// Constructs an `AccountUuid` from a bare [`Uuid`] value.
    ///
    /// The resulting identifier is only meaningful if the UUID was obtained from an
    /// account row of the database it is used against.
    pub fn from_uuid(value: Uuid) -> Self {
        AccountUuid(value)
    }

    /// Exposes the opaque account identifier from its typesafe wrapper.
    pub fn expose_uuid(&self) -> Uuid {
        self.0
    }
}

/// A wallet data store backed by an SQLite database.
pub struct WalletDb<P> {
    pub(crate) conn: Connection,
    pub(crate) params: P,
}

impl<P: Parameters> WalletDb<P> {
    /// Opens (or creates) the database file at `path`.
    ///
    /// A freshly created database has no structure until
    /// [`wallet::init::init_wallet_db`] is called on it.
    pub fn for_path<F: AsRef<Path>>(path: F, params: P) -> Result<Self, rusqlite::Error> {
        Connection::open(path).map(|conn| WalletDb { conn, params })
    }

    /// The network parameters this database was opened with.
    pub fn params(&self) -> &P {
        &self.params
    }
}

impl<P: Parameters> WalletRead for WalletDb<P> {
    type Error = SqliteClientError;
    type AccountId = AccountUuid;

    fn get_account_ids(&self) -> Result<Vec<AccountUuid>, Self::Error> {
        wallet::get_account_ids(self)
    }

    fn get_account(
        &self,
        account_id: AccountUuid,
    ) -> Result<Option<Account<AccountUuid>>, Self::Error> {
        wallet::get_account(self, account_id)
    }

    fn get_derived_account(
        &self,
        seed_fingerprint: &SeedFingerprint,
        account_index: bsv_keys::AccountId,
    ) -> Result<Option<AccountUuid>, Self::Error> {
        wallet::get_derived_account(self, seed_fingerprint, account_index)
    }

    fn has_activity(&self, account_id: AccountUuid) -> Result<bool, Self::Error> {
        wallet::has_activity(self, account_id)
    }

    fn last_synced(&self, account_id: AccountUuid) -> Result<Option<OffsetDateTime>, Self::Error> {
        wallet::last_synced(self, account_id)
    }

    fn get_unspent_utxos(&self, account_id: AccountUuid) -> Result<Vec<WalletUtxo>, Self::Error> {
        wallet::get_unspent_utxos(self, account_id)
    }

    fn get_basket_totals(&self, account_id: AccountUuid) -> Result<BasketTotals, Self::Error> {
        wallet::get_basket_totals(self, account_id)
    }

    fn get_transactions(&self, account_id: AccountUuid) -> Result<Vec<WalletTx>, Self::Error> {
        wallet::get_transactions(self, account_id)
    }

    fn get_transaction(
        &self,
        account_id: AccountUuid,
        txid: &TxId,
    ) -> Result<Option<WalletTx>, Self::Error> {
        wallet::get_transaction(self, account_id, txid)
    }

    fn get_derived_addresses(
        &self,
        account_id: AccountUuid,
    ) -> Result<Vec<DerivedAddress>, Self::Error> {
        wallet::get_derived_addresses(self, account_id)
    }

    fn max_invoice_index(
        &self,
        account_id: AccountUuid,
        sender: &PublicKey,
    ) -> Result<Option<u32>, Self::Error> {
        wallet::max_invoice_index(self, account_id, sender)
    }

    fn get_locked_utxos(&self, account_id: AccountUuid) -> Result<Vec<LockedUtxo>, Self::Error> {
        wallet::get_locked_utxos(self, account_id)
    }

    fn get_contacts(&self, account_id: AccountUuid) -> Result<Vec<Contact>, Self::Error> {
        wallet::get_contacts(self, account_id)
    }
}

impl<P: Parameters> WalletWrite for WalletDb<P> {
    fn create_account(&mut self, params: AccountParameters) -> Result<AccountUuid, Self::Error> {
        wallet::create_account(self, params)
    }

    fn rename_account(&mut self, account_id: AccountUuid, name: &str) -> Result<(), Self::Error> {
        wallet::rename_account(self, account_id, name)
    }

    fn delete_account(&mut self, account_id: AccountUuid) -> Result<(), Self::Error> {
        wallet::delete_account(self, account_id)
    }

    fn replace_address_utxos(
        &mut self,
        account_id: AccountUuid,
        address: &TransparentAddress,
        basket: Basket,
        utxos: &[(OutPoint, Satoshis)],
    ) -> Result<(), Self::Error> {
        wallet::replace_address_utxos(self, account_id, address, basket, utxos)
    }

    fn mark_utxos_spent(
        &mut self,
        account_id: AccountUuid,
        spent: &[OutPoint],
    ) -> Result<(), Self::Error> {
        wallet::mark_utxos_spent(self, account_id, spent)
    }

    fn put_utxo(&mut self, account_id: AccountUuid, utxo: &WalletUtxo) -> Result<(), Self::Error> {
        wallet::put_utxo(self, account_id, utxo)
    }

    fn put_transaction(
        &mut self,
        account_id: AccountUuid,
        tx: &WalletTx,
    ) -> Result<(), Self::Error> {
        wallet::put_transaction(self, account_id, tx)
    }

    fn put_derived_address(
        &mut self,
        account_id: AccountUuid,
        address: &DerivedAddress,
    ) -> Result<(), Self::Error> {
        wallet::put_derived_address(self, account_id, address)
    }

    fn put_locked_utxo(
        &mut self,
        account_id: AccountUuid,
        lock: &LockedUtxo,
    ) -> Result<(), Self::Error> {
        wallet::put_locked_utxo(self, account_id, lock)
    }

    fn remove_locked_utxo(
        &mut self,
        account_id: AccountUuid,
        outpoint: &OutPoint,
    ) -> Result<(), Self::Error> {
        wallet::remove_locked_utxo(self, account_id, outpoint)
    }

    fn put_contact(
        &mut self,
        account_id: AccountUuid,
        contact: &Contact,
    ) -> Result<(), Self::Error> {
        wallet::put_contact(self, account_id, contact)
    }

    fn delete_contact(
        &mut self,
        account_id: AccountUuid,
        pubkey: &PublicKey,
    ) -> Result<(), Self::Error> {
        wallet::delete_contact(self, account_id, pubkey)
    }

    fn set_last_synced(
        &mut self,
        account_id: AccountUuid,
        at: OffsetDateTime,
    ) -> Result<(), Self::Error> {
        wallet::set_last_synced(self, account_id, at)
    }
}
