//! Utilities for testing wallets based upon the [`crate::data_api`] traits.
//!
//! [`MemoryWalletDb`] is a complete in-memory [`WalletWrite`] implementation, and
//! [`MockRemoteLedger`] is a scripted [`crate::remote::RemoteLedger`] whose answers
//! (and failures) are staged by the test.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Mutex;

use async_trait::async_trait;
use secp256k1::PublicKey;
use secrecy::{ExposeSecret, SecretVec};
use time::OffsetDateTime;

use bsv_keys::{AccountKeyBundle, SeedFingerprint};
use bsv_primitives::{
    address::TransparentAddress,
    consensus::{BlockHeight, Parameters},
    transaction::{OutPoint, Transaction, TxId},
    value::Satoshis,
};

use crate::baskets::BasketTotals;
use crate::remote::{HistoryEntry, RemoteError, RemoteLedger, RemoteUtxo, TxDetail};
use crate::wallet::{
    Account, AccountSource, Basket, Contact, DerivedAddress, LockedUtxo, TxStatus, WalletTx,
    WalletUtxo,
};

use super::{AccountParameters, WalletRead, WalletWrite};

/// A fixed 64-byte seed for tests that need deterministic key material.
pub fn test_seed() -> SecretVec<u8> {
    SecretVec::new(vec![42u8; 64])
}

/// Derives the key bundle for `index` from [`test_seed`] and registers the matching
/// account in `db`, returning the store's identifier for it alongside the keys.
pub fn register_test_account<P: Parameters>(
    params: &P,
    db: &mut MemoryWalletDb,
    index: bsv_keys::AccountId,
) -> (u32, AccountKeyBundle) {
    let seed = test_seed();
    let fingerprint =
        SeedFingerprint::from_seed(seed.expose_secret()).expect("test seed has a valid length");
    let keys =
        AccountKeyBundle::from_seed(params, &seed, index).expect("test seed derives all roles");
    let account_id = db
        .create_account(AccountParameters::derived(
            format!("Account {}", u32::from(index) + 1),
            fingerprint,
            &keys,
        ))
        .unwrap();
    (account_id, keys)
}

struct AccountEntry {
    account: Account<u32>,
    utxos: Vec<WalletUtxo>,
    transactions: Vec<WalletTx>,
    derived_addresses: Vec<DerivedAddress>,
    locked_utxos: Vec<LockedUtxo>,
    contacts: Vec<Contact>,
    last_synced: Option<OffsetDateTime>,
}

impl AccountEntry {
    fn new(account: Account<u32>) -> Self {
        AccountEntry {
            account,
            utxos: Vec::new(),
            transactions: Vec::new(),
            derived_addresses: Vec::new(),
            locked_utxos: Vec::new(),
            contacts: Vec::new(),
            last_synced: None,
        }
    }
}

/// An in-memory wallet store.
///
/// Rows are held in insertion order, so reads are deterministic across runs.
pub struct MemoryWalletDb {
    next_account_id: u32,
    accounts: BTreeMap<u32, AccountEntry>,
}

impl MemoryWalletDb {
    pub fn new() -> Self {
        MemoryWalletDb {
            next_account_id: 0,
            accounts: BTreeMap::new(),
        }
    }
}

impl Default for MemoryWalletDb {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletRead for MemoryWalletDb {
    type Error = Infallible;
    type AccountId = u32;

    fn get_account_ids(&self) -> Result<Vec<u32>, Self::Error> {
        Ok(self.accounts.keys().copied().collect())
    }

    fn get_account(&self, account_id: u32) -> Result<Option<Account<u32>>, Self::Error> {
        Ok(self.accounts.get(&account_id).map(|e| e.account.clone()))
    }

    fn get_derived_account(
        &self,
        seed_fingerprint: &SeedFingerprint,
        account_index: bsv_keys::AccountId,
    ) -> Result<Option<u32>, Self::Error> {
        Ok(self
            .accounts
            .values()
            .find(|e| {
                matches!(
                    e.account.source(),
                    AccountSource::Derived {
                        seed_fingerprint: fp,
                        account_index: idx,
                    } if fp == seed_fingerprint && *idx == account_index
                )
            })
            .map(|e| e.account.id()))
    }

    fn has_activity(&self, account_id: u32) -> Result<bool, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .is_some_and(|e| !e.utxos.is_empty() || !e.transactions.is_empty()))
    }

    fn last_synced(&self, account_id: u32) -> Result<Option<OffsetDateTime>, Self::Error> {
        Ok(self.accounts.get(&account_id).and_then(|e| e.last_synced))
    }

    fn get_unspent_utxos(&self, account_id: u32) -> Result<Vec<WalletUtxo>, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .map(|e| e.utxos.iter().filter(|u| !u.is_spent()).cloned().collect())
            .unwrap_or_default())
    }

    fn get_basket_totals(&self, account_id: u32) -> Result<BasketTotals, Self::Error> {
        let mut totals = BasketTotals::ZERO;
        if let Some(entry) = self.accounts.get(&account_id) {
            for utxo in entry.utxos.iter().filter(|u| !u.is_spent()) {
                totals
                    .add(utxo.basket(), utxo.value())
                    .expect("test balances fit in the total supply");
            }
            for lock in &entry.locked_utxos {
                totals
                    .add(Basket::Locks, lock.value())
                    .expect("test balances fit in the total supply");
            }
        }
        Ok(totals)
    }

    fn get_transactions(&self, account_id: u32) -> Result<Vec<WalletTx>, Self::Error> {
        // Most recently recorded first.
        Ok(self
            .accounts
            .get(&account_id)
            .map(|e| e.transactions.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    fn get_transaction(
        &self,
        account_id: u32,
        txid: &TxId,
    ) -> Result<Option<WalletTx>, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .and_then(|e| e.transactions.iter().find(|t| t.txid() == txid))
            .cloned())
    }

    fn get_derived_addresses(&self, account_id: u32) -> Result<Vec<DerivedAddress>, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .map(|e| e.derived_addresses.clone())
            .unwrap_or_default())
    }

    fn max_invoice_index(
        &self,
        account_id: u32,
        sender: &PublicKey,
    ) -> Result<Option<u32>, Self::Error> {
        Ok(self.accounts.get(&account_id).and_then(|e| {
            e.derived_addresses
                .iter()
                .filter(|d| d.sender_pubkey() == sender)
                .map(|d| d.invoice_index())
                .max()
        }))
    }

    fn get_locked_utxos(&self, account_id: u32) -> Result<Vec<LockedUtxo>, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .map(|e| e.locked_utxos.clone())
            .unwrap_or_default())
    }

    fn get_contacts(&self, account_id: u32) -> Result<Vec<Contact>, Self::Error> {
        Ok(self
            .accounts
            .get(&account_id)
            .map(|e| e.contacts.clone())
            .unwrap_or_default())
    }
}

impl WalletWrite for MemoryWalletDb {
    fn create_account(&mut self, params: AccountParameters) -> Result<u32, Self::Error> {
        let id = self.next_account_id;
        self.next_account_id += 1;
        let account = Account::from_parts(
            id,
            params.name,
            params.source,
            params.wallet_address,
            params.ord_address,
            params.identity_address,
            OffsetDateTime::now_utc(),
        );
        self.accounts.insert(id, AccountEntry::new(account));
        Ok(id)
    }

    fn rename_account(&mut self, account_id: u32, name: &str) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            let account = entry.account.clone();
            entry.account = Account::from_parts(
                account.id(),
                name.to_string(),
                account.source().clone(),
                *account.wallet_address(),
                *account.ord_address(),
                *account.identity_address(),
                account.created_at(),
            );
        }
        Ok(())
    }

    fn delete_account(&mut self, account_id: u32) -> Result<(), Self::Error> {
        self.accounts.remove(&account_id);
        Ok(())
    }

    fn replace_address_utxos(
        &mut self,
        account_id: u32,
        address: &TransparentAddress,
        basket: Basket,
        utxos: &[(OutPoint, Satoshis)],
    ) -> Result<(), Self::Error> {
        let Some(entry) = self.accounts.get_mut(&account_id) else {
            return Ok(());
        };

        let reported: HashSet<OutPoint> = utxos.iter().map(|(op, _)| *op).collect();
        for stored in entry.utxos.iter_mut() {
            if stored.address() == address
                && !stored.is_spent()
                && !reported.contains(stored.outpoint())
            {
                *stored = WalletUtxo::from_parts(
                    *stored.outpoint(),
                    stored.value(),
                    *stored.address(),
                    stored.basket(),
                    true,
                );
            }
        }

        for (outpoint, value) in utxos {
            match entry.utxos.iter_mut().find(|u| u.outpoint() == outpoint) {
                // Spent stays spent; the snapshot may be older than our own spend.
                Some(stored) if stored.is_spent() => {}
                Some(stored) => {
                    *stored = WalletUtxo::from_parts(*outpoint, *value, *address, basket, false);
                }
                None => {
                    entry
                        .utxos
                        .push(WalletUtxo::from_parts(*outpoint, *value, *address, basket, false));
                }
            }
        }
        Ok(())
    }

    fn mark_utxos_spent(&mut self, account_id: u32, spent: &[OutPoint]) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            for stored in entry.utxos.iter_mut() {
                if spent.contains(stored.outpoint()) {
                    *stored = WalletUtxo::from_parts(
                        *stored.outpoint(),
                        stored.value(),
                        *stored.address(),
                        stored.basket(),
                        true,
                    );
                }
            }
        }
        Ok(())
    }

    fn put_utxo(&mut self, account_id: u32, utxo: &WalletUtxo) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            match entry
                .utxos
                .iter_mut()
                .find(|u| u.outpoint() == utxo.outpoint())
            {
                Some(stored) => *stored = utxo.clone(),
                None => entry.utxos.push(utxo.clone()),
            }
        }
        Ok(())
    }

    fn put_transaction(&mut self, account_id: u32, tx: &WalletTx) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            match entry
                .transactions
                .iter_mut()
                .find(|t| t.txid() == tx.txid())
            {
                Some(stored) => {
                    let mined_height = tx.mined_height().or(stored.mined_height());
                    let amount = tx.amount().or(stored.amount());
                    let label = tx
                        .label()
                        .or(stored.label())
                        .map(str::to_string);
                    let status = if mined_height.is_some() {
                        TxStatus::Confirmed
                    } else {
                        TxStatus::Pending
                    };
                    *stored = WalletTx::from_parts(*tx.txid(), mined_height, amount, status, label);
                }
                None => entry.transactions.push(tx.clone()),
            }
        }
        Ok(())
    }

    fn put_derived_address(
        &mut self,
        account_id: u32,
        address: &DerivedAddress,
    ) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            if !entry
                .derived_addresses
                .iter()
                .any(|d| d.address() == address.address())
            {
                entry.derived_addresses.push(address.clone());
            }
        }
        Ok(())
    }

    fn put_locked_utxo(&mut self, account_id: u32, lock: &LockedUtxo) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            match entry
                .locked_utxos
                .iter_mut()
                .find(|l| l.outpoint() == lock.outpoint())
            {
                Some(stored) => *stored = lock.clone(),
                None => entry.locked_utxos.push(lock.clone()),
            }
        }
        Ok(())
    }

    fn remove_locked_utxo(
        &mut self,
        account_id: u32,
        outpoint: &OutPoint,
    ) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            entry.locked_utxos.retain(|l| l.outpoint() != outpoint);
        }
        Ok(())
    }

    fn put_contact(&mut self, account_id: u32, contact: &Contact) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            match entry
                .contacts
                .iter_mut()
                .find(|c| c.pubkey() == contact.pubkey())
            {
                Some(stored) => *stored = contact.clone(),
                None => entry.contacts.push(contact.clone()),
            }
        }
        Ok(())
    }

    fn delete_contact(&mut self, account_id: u32, pubkey: &PublicKey) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            entry.contacts.retain(|c| c.pubkey() != pubkey);
        }
        Ok(())
    }

    fn set_last_synced(&mut self, account_id: u32, at: OffsetDateTime) -> Result<(), Self::Error> {
        if let Some(entry) = self.accounts.get_mut(&account_id) {
            entry.last_synced = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    height: u32,
    utxos: HashMap<TransparentAddress, Vec<RemoteUtxo>>,
    history: HashMap<TransparentAddress, Vec<HistoryEntry>>,
    transactions: HashMap<TxId, TxDetail>,
    broadcasts: Vec<Transaction>,
    broadcast_attempts: u32,
    queries: u32,
    fail_next: Option<RemoteError>,
    fail_always: Option<RemoteError>,
}

/// A scripted remote ledger.
///
/// Tests stage the chain state it reports and, optionally, failures: `fail_next`
/// makes exactly one call fail, `fail_always` makes every call fail until cleared.
/// Every call (including failed ones) is counted.
pub struct MockRemoteLedger {
    state: Mutex<MockState>,
}

impl MockRemoteLedger {
    pub fn new(height: BlockHeight) -> Self {
        let ledger = MockRemoteLedger {
            state: Mutex::new(MockState::default()),
        };
        ledger.set_chain_height(height);
        ledger
    }

    pub fn set_chain_height(&self, height: BlockHeight) {
        self.state.lock().unwrap().height = u32::from(height);
    }

    /// Replaces the unspent coins reported for `address`.
    pub fn set_utxos(&self, address: &TransparentAddress, utxos: Vec<RemoteUtxo>) {
        self.state.lock().unwrap().utxos.insert(*address, utxos);
    }

    /// Replaces the history reported for `address`.
    pub fn set_history(&self, address: &TransparentAddress, entries: Vec<HistoryEntry>) {
        self.state.lock().unwrap().history.insert(*address, entries);
    }

    /// Stages full transaction detail for [`RemoteLedger::get_transaction`].
    pub fn insert_transaction(&self, detail: TxDetail) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(detail.txid, detail);
    }

    /// Makes the next call (only) fail with the given error.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Makes every call fail with the given error until [`Self::clear_failures`].
    pub fn fail_always(&self, error: RemoteError) {
        self.state.lock().unwrap().fail_always = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_next = None;
        state.fail_always = None;
    }

    /// The transactions successfully broadcast so far, decoded.
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// The number of broadcast attempts, successful or not.
    pub fn broadcast_attempts(&self) -> u32 {
        self.state.lock().unwrap().broadcast_attempts
    }

    /// The total number of calls made against this ledger.
    pub fn query_count(&self) -> u32 {
        self.state.lock().unwrap().queries
    }

    fn begin_call(state: &mut MockState) -> Result<(), RemoteError> {
        state.queries += 1;
        if let Some(e) = state.fail_next.take() {
            return Err(e);
        }
        if let Some(e) = &state.fail_always {
            return Err(e.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLedger for MockRemoteLedger {
    async fn get_balance(&self, address: &TransparentAddress) -> Result<Satoshis, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::begin_call(&mut state)?;
        let total = state
            .utxos
            .get(address)
            .map(|utxos| utxos.iter().map(|u| u.value.into_u64()).sum::<u64>())
            .unwrap_or(0);
        Ok(Satoshis::from_u64(total).expect("test values fit in the total supply"))
    }

    async fn get_utxos(
        &self,
        address: &TransparentAddress,
    ) -> Result<Vec<RemoteUtxo>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::begin_call(&mut state)?;
        Ok(state.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_history(
        &self,
        address: &TransparentAddress,
    ) -> Result<Vec<HistoryEntry>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::begin_call(&mut state)?;
        Ok(state.history.get(address).cloned().unwrap_or_default())
    }

    async fn get_transaction(&self, txid: &TxId) -> Result<TxDetail, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::begin_call(&mut state)?;
        state
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| RemoteError::UnexpectedResponse(format!("no such transaction: {}", txid)))
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<TxId, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.broadcast_attempts += 1;
        if let Some(e) = state.fail_next.take() {
            return Err(e);
        }
        if let Some(e) = &state.fail_always {
            return Err(e.clone());
        }
        let tx = Transaction::read(raw_tx)
            .map_err(|e| RemoteError::Rejected(format!("invalid transaction encoding: {}", e)))?;
        let txid = tx.txid();
        state.broadcasts.push(tx);
        Ok(txid)
    }

    async fn chain_height(&self) -> Result<BlockHeight, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::begin_call(&mut state)?;
        Ok(BlockHeight::from_u32(state.height))
    }
}
