//! # Utilities for wallet data access
//!
//! This module defines a set of APIs for wallet data persistence. A data store
//! implementing [`WalletRead`] and [`WalletWrite`] holds everything the wallet knows:
//! accounts and their role addresses, the coins assigned to each basket, transaction
//! history, BRC-42 derived addresses, time locks, and contacts.
//!
//! The sync, lock, discovery and BRC-100 engines in this crate are generic over these
//! traits; `bsv_client_sqlite` provides the production implementation, and
//! [`testing`] provides an in-memory one.
//!
//! Store access is synchronous; the async engines in this crate call these methods
//! between remote queries and never hold store state across an `await`.

use secp256k1::PublicKey;
use time::OffsetDateTime;

use bsv_keys::{AccountKeyBundle, SeedFingerprint};
use bsv_primitives::{
    address::TransparentAddress,
    transaction::{OutPoint, TxId},
    value::Satoshis,
};

use crate::baskets::BasketTotals;
use crate::wallet::{
    Account, AccountSource, Basket, Contact, DerivedAddress, LockedUtxo, WalletTx, WalletUtxo,
};

pub mod error;

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing;

/// The data required to register a new account.
///
/// The store assigns the account identifier and creation timestamp itself.
#[derive(Clone, Debug)]
pub struct AccountParameters {
    pub name: String,
    pub source: AccountSource,
    pub wallet_address: TransparentAddress,
    pub ord_address: TransparentAddress,
    pub identity_address: TransparentAddress,
}

impl AccountParameters {
    /// Builds the registration record for an account derived from a seed, taking the
    /// role addresses from its key bundle.
    pub fn derived(
        name: impl Into<String>,
        seed_fingerprint: SeedFingerprint,
        keys: &AccountKeyBundle,
    ) -> Self {
        AccountParameters {
            name: name.into(),
            source: AccountSource::Derived {
                seed_fingerprint,
                account_index: keys.account(),
            },
            wallet_address: keys.payment().address(),
            ord_address: keys.ordinals().address(),
            identity_address: keys.identity().address(),
        }
    }
}

/// Read-only operations required for wallet functions.
///
/// This trait defines the interface to the wallet's underlying data store, upon which
/// the sync, lock, discovery and BRC-100 engines are built.
pub trait WalletRead {
    /// The type of errors produced by a wallet backend.
    type Error;

    /// The type used to identify accounts in the store.
    type AccountId: Copy + std::fmt::Debug + Eq + std::hash::Hash + Send;

    /// Returns the identifiers of all accounts known to the store, in creation order.
    fn get_account_ids(&self) -> Result<Vec<Self::AccountId>, Self::Error>;

    /// Returns the account with the given identifier, if it exists.
    fn get_account(
        &self,
        account_id: Self::AccountId,
    ) -> Result<Option<Account<Self::AccountId>>, Self::Error>;

    /// Looks up the account that was derived from the given seed at the given index.
    fn get_derived_account(
        &self,
        seed_fingerprint: &SeedFingerprint,
        account_index: bsv_keys::AccountId,
    ) -> Result<Option<Self::AccountId>, Self::Error>;

    /// Returns whether any coin or transaction has ever been recorded for the
    /// account. A freshly registered account has no activity until its first
    /// successful sync.
    fn has_activity(&self, account_id: Self::AccountId) -> Result<bool, Self::Error>;

    /// Returns the time at which the account last completed a full refresh, if it
    /// ever has.
    fn last_synced(&self, account_id: Self::AccountId) -> Result<Option<OffsetDateTime>, Self::Error>;

    /// Returns the account's unspent coins across all baskets.
    fn get_unspent_utxos(
        &self,
        account_id: Self::AccountId,
    ) -> Result<Vec<WalletUtxo>, Self::Error>;

    /// Returns the per-basket sums of the account's unspent coins, including the
    /// value held by active time locks.
    ///
    /// Implementations must aggregate over the stored coin rows so that the totals
    /// can never disagree with [`WalletRead::get_unspent_utxos`].
    fn get_basket_totals(&self, account_id: Self::AccountId)
        -> Result<BasketTotals, Self::Error>;

    /// Returns the account's transaction history, most recent first.
    fn get_transactions(&self, account_id: Self::AccountId)
        -> Result<Vec<WalletTx>, Self::Error>;

    /// Returns a single transaction record, if the account has one for this txid.
    fn get_transaction(
        &self,
        account_id: Self::AccountId,
        txid: &TxId,
    ) -> Result<Option<WalletTx>, Self::Error>;

    /// Returns every BRC-42 derived address recorded for the account.
    fn get_derived_addresses(
        &self,
        account_id: Self::AccountId,
    ) -> Result<Vec<DerivedAddress>, Self::Error>;

    /// Returns the highest invoice index recorded for the given sender, or `None` if
    /// no address has been derived for that sender yet.
    ///
    /// The next address for a sender is always derived at index `max + 1`; the index
    /// sequence per sender never regresses or repeats.
    fn max_invoice_index(
        &self,
        account_id: Self::AccountId,
        sender: &PublicKey,
    ) -> Result<Option<u32>, Self::Error>;

    /// Returns the account's active time locks.
    fn get_locked_utxos(
        &self,
        account_id: Self::AccountId,
    ) -> Result<Vec<LockedUtxo>, Self::Error>;

    /// Returns the account's address book.
    fn get_contacts(&self, account_id: Self::AccountId) -> Result<Vec<Contact>, Self::Error>;
}

/// Write operations required for wallet functions.
///
/// Writes performed by the sync engine are designed to be idempotent: syncing twice
/// against the same remote state leaves the store unchanged.
pub trait WalletWrite: WalletRead {
    /// Registers a new account and returns its identifier.
    ///
    /// No coins or history are recorded here; the account is populated by its first
    /// sync.
    fn create_account(
        &mut self,
        params: AccountParameters,
    ) -> Result<Self::AccountId, Self::Error>;

    /// Changes an account's display name. All other account fields are immutable.
    fn rename_account(
        &mut self,
        account_id: Self::AccountId,
        name: &str,
    ) -> Result<(), Self::Error>;

    /// Removes an account and every dependent row (coins, transactions, derived
    /// addresses, locks, contacts).
    fn delete_account(&mut self, account_id: Self::AccountId) -> Result<(), Self::Error>;

    /// Reconciles the stored coins at `address` with a snapshot reported by the
    /// remote ledger.
    ///
    /// Unknown coins in `utxos` are inserted as unspent with the given basket, and
    /// stored unspent coins at this address that are absent from the snapshot are
    /// flagged spent. A coin already flagged spent stays spent even if the snapshot
    /// still reports it: a lagging indexer cannot resurrect a coin this wallet has
    /// spent itself. Coins at other addresses are untouched. Applying the same
    /// snapshot twice is a no-op.
    fn replace_address_utxos(
        &mut self,
        account_id: Self::AccountId,
        address: &TransparentAddress,
        basket: Basket,
        utxos: &[(OutPoint, Satoshis)],
    ) -> Result<(), Self::Error>;

    /// Flags the given coins as spent, retaining their rows.
    fn mark_utxos_spent(
        &mut self,
        account_id: Self::AccountId,
        spent: &[OutPoint],
    ) -> Result<(), Self::Error>;

    /// Inserts (or re-inserts) a single coin, e.g. the change output of a
    /// transaction this wallet just broadcast.
    fn put_utxo(
        &mut self,
        account_id: Self::AccountId,
        utxo: &WalletUtxo,
    ) -> Result<(), Self::Error>;

    /// Upserts a transaction record.
    ///
    /// Merge rules for an existing row: a known `amount` is never replaced by an
    /// unknown one, a known `label` is never cleared, and a mined height is adopted
    /// when the new record carries one (recomputing the status accordingly).
    fn put_transaction(
        &mut self,
        account_id: Self::AccountId,
        tx: &WalletTx,
    ) -> Result<(), Self::Error>;

    /// Records a derived address. Inserting an address that is already recorded is a
    /// no-op.
    fn put_derived_address(
        &mut self,
        account_id: Self::AccountId,
        address: &DerivedAddress,
    ) -> Result<(), Self::Error>;

    /// Records an active time lock.
    fn put_locked_utxo(
        &mut self,
        account_id: Self::AccountId,
        lock: &LockedUtxo,
    ) -> Result<(), Self::Error>;

    /// Removes a time lock record once its coin has been released.
    fn remove_locked_utxo(
        &mut self,
        account_id: Self::AccountId,
        outpoint: &OutPoint,
    ) -> Result<(), Self::Error>;

    /// Adds a contact, or relabels the existing contact with the same public key.
    fn put_contact(
        &mut self,
        account_id: Self::AccountId,
        contact: &Contact,
    ) -> Result<(), Self::Error>;

    /// Removes the contact with the given public key, if present.
    fn delete_contact(
        &mut self,
        account_id: Self::AccountId,
        pubkey: &PublicKey,
    ) -> Result<(), Self::Error>;

    /// Records the completion time of a full refresh.
    fn set_last_synced(
        &mut self,
        account_id: Self::AccountId,
        at: OffsetDateTime,
    ) -> Result<(), Self::Error>;
}
