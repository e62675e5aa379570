//! Reconciling the wallet store with the remote ledger.
//!
//! [`ensure_synced`] is the single entry point: the UI calls it on load and on every
//! account switch, and it decides whether a first-time sync, a background refresh,
//! or nothing at all is required. All chain knowledge flows through here; no other
//! part of the crate writes remote answers into the store.
//!
//! Concurrency is cooperative. A [`SessionContext`] shared by every sync task
//! records which account the user is looking at and which accounts have a sync in
//! flight; a task begun for the active account checks that it is *still* the active
//! account before committing, and discards its work otherwise. Accounts are synced
//! strictly one at a time, so two tasks never interleave writes for the same
//! account.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use secp256k1::{PublicKey, Secp256k1};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use bsv_keys::{brc42, wif, AccountKeyBundle};
use bsv_primitives::{
    address::TransparentAddress,
    consensus::{BlockHeight, Parameters},
    transaction::{OutPoint, TxId},
    value::{SatBalance, Satoshis},
};

use crate::baskets::BasketTotals;
use crate::data_api::{error::Error, WalletWrite};
use crate::remote::{HistoryEntry, RemoteError, RemoteLedger};
use crate::wallet::{Basket, DerivedAddress, TxStatus, WalletTx};

/// How long a completed refresh stays current. Within this window [`ensure_synced`]
/// answers from the store without touching the network.
pub const SYNC_COOLDOWN: time::Duration = time::Duration::minutes(5);

/// State shared between the UI and every sync task: the currently active account,
/// and the set of accounts with a sync in flight.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct SessionContext<A: Copy + Eq + Hash> {
    inner: Arc<Mutex<SessionState<A>>>,
}

struct SessionState<A> {
    active: Option<A>,
    in_flight: HashSet<A>,
}

impl<A: Copy + Eq + Hash> SessionContext<A> {
    pub fn new() -> Self {
        SessionContext {
            inner: Arc::new(Mutex::new(SessionState {
                active: None,
                in_flight: HashSet::new(),
            })),
        }
    }

    /// Records which account the user is looking at. Tasks read this through the
    /// context at commit time rather than capturing it when they start.
    pub fn set_active(&self, account: Option<A>) {
        self.lock().active = account;
    }

    pub fn active(&self) -> Option<A> {
        self.lock().active
    }

    pub fn is_active(&self, account: A) -> bool {
        self.lock().active == Some(account)
    }

    /// Claims the per-account sync slot, or returns `None` if a sync for this
    /// account is already running.
    fn try_begin(&self, account: A) -> Option<SyncGuard<A>> {
        let mut state = self.lock();
        if state.in_flight.insert(account) {
            Some(SyncGuard {
                session: self.clone(),
                account,
            })
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<A>> {
        // A panicked sync task must not wedge every later one.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<A: Copy + Eq + Hash> Default for SessionContext<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the per-account sync slot on drop, however the sync ended.
struct SyncGuard<A: Copy + Eq + Hash> {
    session: SessionContext<A>,
    account: A,
}

impl<A: Copy + Eq + Hash> Drop for SyncGuard<A> {
    fn drop(&mut self) {
        self.session.lock().in_flight.remove(&self.account);
    }
}

/// How a call to [`ensure_synced`] concluded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The account was refreshed from the remote ledger.
    Completed { totals: BasketTotals },
    /// A recent refresh already covers this account, or one is underway; nothing
    /// was queried.
    SkippedRecent { totals: BasketTotals },
    /// A background refresh failed; the store's cached view is served instead.
    ServedCached {
        totals: BasketTotals,
        error: RemoteError,
    },
    /// The user switched away from this account mid-sync; nothing was written.
    Superseded,
}

impl SyncOutcome {
    /// The canonical basket totals as of this outcome, where the store was
    /// consulted.
    pub fn totals(&self) -> Option<BasketTotals> {
        match self {
            SyncOutcome::Completed { totals }
            | SyncOutcome::SkippedRecent { totals }
            | SyncOutcome::ServedCached { totals, .. } => Some(*totals),
            SyncOutcome::Superseded => None,
        }
    }
}

/// Everything the remote ledger reported for one address, fetched before any store
/// write happens.
struct AddressSnapshot {
    address: TransparentAddress,
    basket: Basket,
    balance: Satoshis,
    utxos: Vec<(OutPoint, Satoshis)>,
    history: Vec<HistoryEntry>,
}

impl AddressSnapshot {
    /// An empty answer for an address we believe holds coins is the signature of a
    /// rate-limited indexer, not of a spend: a genuine spend leaves history behind.
    fn looks_unreliable(&self, cached_value: u64) -> bool {
        cached_value > 0
            && self.balance.is_zero()
            && self.utxos.is_empty()
            && self.history.is_empty()
    }
}

/// Brings the account's stored view of the chain up to date.
///
/// A first-time sync (no coins and no history on record) queries every address and
/// surfaces failures to the caller, because there is nothing cached to fall back
/// on. Afterwards, syncs are background refreshes: within [`SYNC_COOLDOWN`] of the
/// last success nothing is queried at all, and a refresh that fails leaves the
/// cached view in place rather than erroring.
///
/// `keys` unlocks the optional final step of extending each sender's derived
/// address chain when a payment is first observed; pass `None` where key material
/// is not in memory and that step is skipped.
pub async fn ensure_synced<P, DbT, RlT>(
    params: &P,
    db: &mut DbT,
    remote: &RlT,
    session: &SessionContext<DbT::AccountId>,
    account_id: DbT::AccountId,
    keys: Option<&AccountKeyBundle>,
) -> Result<SyncOutcome, Error<DbT::Error, RemoteError>>
where
    P: Parameters,
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;

    // One outstanding sync per account; a second trigger close behind the first
    // (wallet load plus manual refresh, say) serves the store's current view.
    let _guard = match session.try_begin(account_id) {
        Some(guard) => guard,
        None => {
            debug!("Sync already in flight for {:?}", account_id);
            let totals = db.get_basket_totals(account_id).map_err(Error::DataSource)?;
            return Ok(SyncOutcome::SkippedRecent { totals });
        }
    };
    let was_active = session.is_active(account_id);

    // 1) Decide what kind of sync this is. An account with no recorded coins and
    //    no history needs its blocking first-time sync; anything else is a
    //    background refresh, skipped entirely while the last one is still fresh.
    let needs_initial = !db.has_activity(account_id).map_err(Error::DataSource)?;
    if !needs_initial {
        if let Some(last) = db.last_synced(account_id).map_err(Error::DataSource)? {
            if OffsetDateTime::now_utc() - last < SYNC_COOLDOWN {
                debug!("Account {:?} synced recently; serving stored data", account_id);
                let totals = db.get_basket_totals(account_id).map_err(Error::DataSource)?;
                return Ok(SyncOutcome::SkippedRecent { totals });
            }
        }
    }
    info!(
        "Syncing account {:?} ({})",
        account_id,
        if needs_initial { "initial" } else { "refresh" }
    );

    // 2) Collect the addresses to reconcile: the three role addresses plus every
    //    derived address on record, and the value the store currently has at each.
    let derived_rows = db
        .get_derived_addresses(account_id)
        .map_err(Error::DataSource)?;
    let mut addresses: Vec<(TransparentAddress, Basket)> = account
        .base_addresses()
        .into_iter()
        .map(|(address, basket)| (*address, basket))
        .collect();
    addresses.extend(derived_rows.iter().map(|row| (*row.address(), Basket::Derived)));

    let mut cached: HashMap<TransparentAddress, u64> = HashMap::new();
    for utxo in db.get_unspent_utxos(account_id).map_err(Error::DataSource)? {
        *cached.entry(*utxo.address()).or_insert(0) += utxo.value().into_u64();
    }
    let own_addresses: HashSet<String> = addresses
        .iter()
        .map(|(address, _)| address.encode(params))
        .collect();

    // 3) Fetch every address's snapshot before writing anything. A failure during
    //    a first-time sync is the caller's problem; during a refresh the stored
    //    view keeps rendering and we try again next cycle.
    let mut snapshots = Vec::with_capacity(addresses.len());
    for &(address, basket) in &addresses {
        match fetch_address(remote, &address).await {
            Ok(snapshot) => snapshots.push(AddressSnapshot {
                address,
                basket,
                balance: snapshot.0,
                utxos: snapshot.1.into_iter().map(|u| (u.outpoint, u.value)).collect(),
                history: snapshot.2,
            }),
            Err(e) if needs_initial => return Err(Error::Remote(e)),
            Err(e) => {
                warn!("Refresh of {:?} failed, serving cached data: {}", account_id, e);
                let totals = db.get_basket_totals(account_id).map_err(Error::DataSource)?;
                return Ok(SyncOutcome::ServedCached { totals, error: e });
            }
        }
    }

    // 4) Merge the per-address histories into one transaction view, and resolve
    //    the net amount of any transaction the store does not have one for yet.
    //    Amounts are an enrichment; a failed detail query leaves the amount
    //    unknown for a later pass rather than failing the sync.
    let mut tx_heights: HashMap<TxId, Option<BlockHeight>> = HashMap::new();
    for snapshot in &snapshots {
        for entry in &snapshot.history {
            let slot = tx_heights.entry(entry.txid).or_insert(None);
            if slot.is_none() {
                *slot = entry.height;
            }
        }
    }

    let mut amounts: HashMap<TxId, SatBalance> = HashMap::new();
    for txid in tx_heights.keys() {
        let known = db
            .get_transaction(account_id, txid)
            .map_err(Error::DataSource)?
            .and_then(|tx| tx.amount());
        if known.is_some() {
            continue;
        }
        match remote.get_transaction(txid).await {
            Ok(detail) => match detail.net_amount(|addr| own_addresses.contains(addr)) {
                Ok(amount) => {
                    amounts.insert(*txid, amount);
                }
                Err(e) => debug!("Amount of {} is out of range: {:?}", txid, e),
            },
            Err(e) => debug!("Could not resolve amount of {}: {}", txid, e),
        }
    }

    // 5) If the user switched accounts while we were querying, this data must not
    //    land in the store; the new active account's own sync owns it now.
    if was_active && !session.is_active(account_id) {
        info!("Discarding sync for {:?}: no longer the active account", account_id);
        return Ok(SyncOutcome::Superseded);
    }

    // 6) Commit. Coin reconciliation is per address and idempotent; an empty
    //    answer for an address the store knows to be funded is treated as
    //    rate-limiting noise and skipped, preserving the cached value.
    let mut newly_funded: Vec<&DerivedAddress> = Vec::new();
    for snapshot in &snapshots {
        let cached_value = cached.get(&snapshot.address).copied().unwrap_or(0);
        if snapshot.looks_unreliable(cached_value) {
            warn!(
                "Empty answer for a funded address; keeping {} cached satoshis",
                cached_value
            );
            continue;
        }
        db.replace_address_utxos(account_id, &snapshot.address, snapshot.basket, &snapshot.utxos)
            .map_err(Error::DataSource)?;

        if snapshot.basket == Basket::Derived && cached_value == 0 && !snapshot.utxos.is_empty() {
            if let Some(row) = derived_rows.iter().find(|r| r.address() == &snapshot.address) {
                newly_funded.push(row);
            }
        }
    }

    for (txid, height) in &tx_heights {
        let status = if height.is_some() {
            TxStatus::Confirmed
        } else {
            TxStatus::Pending
        };
        let record = WalletTx::from_parts(*txid, *height, amounts.get(txid).copied(), status, None);
        db.put_transaction(account_id, &record)
            .map_err(Error::DataSource)?;
    }

    // 7) A sender whose derived address was just funded gets the next address in
    //    their chain immediately, so the counterparty always has a fresh unused
    //    address without a round trip.
    if let Some(keys) = keys {
        extend_derived_chains(params, db, account_id, keys, &newly_funded)?;
    } else if !newly_funded.is_empty() {
        debug!(
            "{} sender chain(s) newly funded; extension deferred until keys are available",
            newly_funded.len()
        );
    }

    // 8) Record the success and recompute the displayed totals from the store.
    db.set_last_synced(account_id, OffsetDateTime::now_utc())
        .map_err(Error::DataSource)?;
    let totals = db.get_basket_totals(account_id).map_err(Error::DataSource)?;
    info!(
        "Account {:?} synced; total balance {} satoshis",
        account_id,
        u64::from(totals.total())
    );
    Ok(SyncOutcome::Completed { totals })
}

/// Background-syncs every account other than the active one, sequentially, so that
/// switching accounts finds them already populated.
///
/// Failures are logged and absorbed; one broken account must not starve the rest.
/// Returns the number of accounts actually refreshed.
pub async fn sync_remaining_accounts<P, DbT, RlT>(
    params: &P,
    db: &mut DbT,
    remote: &RlT,
    session: &SessionContext<DbT::AccountId>,
) -> Result<u32, Error<DbT::Error, RemoteError>>
where
    P: Parameters,
    DbT: WalletWrite,
    DbT::Error: std::fmt::Display,
    RlT: RemoteLedger,
{
    let active = session.active();
    let mut refreshed = 0;
    for account_id in db.get_account_ids().map_err(Error::DataSource)? {
        if Some(account_id) == active {
            continue;
        }
        // Sequential on purpose: one account's writes never interleave with
        // another's.
        match ensure_synced(params, db, remote, session, account_id, None).await {
            Ok(SyncOutcome::Completed { .. }) => refreshed += 1,
            Ok(_) => {}
            Err(e) => warn!("Background sync of {:?} failed: {}", account_id, e),
        }
    }
    Ok(refreshed)
}

async fn fetch_address<RlT: RemoteLedger>(
    remote: &RlT,
    address: &TransparentAddress,
) -> Result<
    (
        Satoshis,
        Vec<crate::remote::RemoteUtxo>,
        Vec<HistoryEntry>,
    ),
    RemoteError,
> {
    let balance = remote.get_balance(address).await?;
    let utxos = remote.get_utxos(address).await?;
    let history = remote.get_history(address).await?;
    Ok((balance, utxos, history))
}

/// Derives and records the next invoice-index address for each sender in
/// `newly_funded`, reading the current maximum index from the store so that a
/// (sender, index) pair is never issued twice.
fn extend_derived_chains<P, DbT>(
    params: &P,
    db: &mut DbT,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
    newly_funded: &[&DerivedAddress],
) -> Result<(), Error<DbT::Error, RemoteError>>
where
    P: Parameters,
    DbT: WalletWrite,
{
    let secp = Secp256k1::new();
    let mut seen: HashSet<PublicKey> = HashSet::new();
    for row in newly_funded {
        // Two payments from one sender in a single sync still extend the chain by
        // exactly one address.
        if !seen.insert(*row.sender_pubkey()) {
            continue;
        }

        let next_index = db
            .max_invoice_index(account_id, row.sender_pubkey())
            .map_err(Error::DataSource)?
            .map_or(0, |max| max.saturating_add(1));
        let invoice = brc42::InvoiceNumber::payment(row.label(), next_index);
        let child_sk = brc42::derive_child_private_key(
            &secp,
            keys.identity().secret_key(),
            row.sender_pubkey(),
            &invoice,
        )?;
        let address =
            TransparentAddress::from_pubkey(&PublicKey::from_secret_key(&secp, &child_sk));

        info!("Extending a sender chain to invoice index {}", next_index);
        db.put_derived_address(
            account_id,
            &DerivedAddress::from_parts(
                address,
                *row.sender_pubkey(),
                invoice.to_string(),
                next_index,
                wif::encode_wif(params, &child_sk),
                row.label().to_string(),
                OffsetDateTime::now_utc(),
            ),
        )
        .map_err(Error::DataSource)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use secp256k1::{PublicKey, Secp256k1, SecretKey};
    use time::OffsetDateTime;

    use bsv_keys::brc42;
    use bsv_primitives::{
        address::TransparentAddress,
        consensus::{BlockHeight, MAIN_NETWORK},
        transaction::{OutPoint, TxId},
        value::Satoshis,
    };

    use super::{ensure_synced, sync_remaining_accounts, SessionContext, SyncOutcome};
    use crate::data_api::{
        error::Error,
        testing::{register_test_account, MemoryWalletDb, MockRemoteLedger},
        WalletRead, WalletWrite,
    };
    use crate::remote::{HistoryEntry, RemoteError, RemoteUtxo, TxDetail, TxParticipant};
    use crate::wallet::{Basket, DerivedAddress, TxStatus};

    fn utxo(tx_byte: u8, value: u64, height: u32) -> RemoteUtxo {
        RemoteUtxo {
            outpoint: OutPoint::new(TxId::from_bytes([tx_byte; 32]), 0),
            value: Satoshis::const_from_u64(value),
            height: Some(BlockHeight::from_u32(height)),
        }
    }

    fn history(tx_byte: u8, height: u32) -> HistoryEntry {
        HistoryEntry {
            txid: TxId::from_bytes([tx_byte; 32]),
            height: Some(BlockHeight::from_u32(height)),
        }
    }

    fn age_last_synced(db: &mut MemoryWalletDb, account_id: u32) {
        db.set_last_synced(
            account_id,
            OffsetDateTime::now_utc() - time::Duration::minutes(10),
        )
        .unwrap();
    }

    fn sender_keypair(byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    #[tokio::test]
    async fn initial_sync_populates_the_store() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        session.set_active(Some(account_id));

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let wallet_addr = keys.payment().address();
        let ord_addr = keys.ordinals().address();
        remote.set_utxos(&wallet_addr, vec![utxo(1, 50_000, 881_990)]);
        remote.set_history(&wallet_addr, vec![history(1, 881_990)]);
        remote.set_utxos(&ord_addr, vec![utxo(2, 1, 881_991)]);
        remote.set_history(&ord_addr, vec![history(2, 881_991)]);
        remote.insert_transaction(TxDetail {
            txid: TxId::from_bytes([1; 32]),
            height: Some(BlockHeight::from_u32(881_990)),
            inputs: vec![TxParticipant {
                address: Some("1SenderSomewhereElse".into()),
                value: Satoshis::const_from_u64(60_000),
            }],
            outputs: vec![TxParticipant {
                address: Some(wallet_addr.encode(&MAIN_NETWORK)),
                value: Satoshis::const_from_u64(50_000),
            }],
        });

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        let totals = match outcome {
            SyncOutcome::Completed { totals } => totals,
            other => panic!("expected a completed sync, got {:?}", other),
        };
        assert_eq!(totals.get(Basket::Default), Satoshis::const_from_u64(50_000));
        assert_eq!(totals.get(Basket::Ordinals), Satoshis::const_from_u64(1));

        assert!(db.has_activity(account_id).unwrap());
        assert!(db.last_synced(account_id).unwrap().is_some());
        let unspent = db.get_unspent_utxos(account_id).unwrap();
        assert_eq!(unspent.len(), 2);

        // The net amount was resolved from the staged transaction detail.
        let tx = db
            .get_transaction(account_id, &TxId::from_bytes([1; 32]))
            .unwrap()
            .unwrap();
        assert_eq!(tx.amount().map(i64::from), Some(50_000));
        assert_eq!(tx.status(), TxStatus::Confirmed);

        // The unstaged transaction keeps an unknown amount without failing the sync.
        let tx = db
            .get_transaction(account_id, &TxId::from_bytes([2; 32]))
            .unwrap()
            .unwrap();
        assert_eq!(tx.amount(), None);
    }

    #[tokio::test]
    async fn resync_within_cooldown_stays_local() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&keys.payment().address(), vec![utxo(1, 900, 881_990)]);

        let first = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();
        assert_matches!(first, SyncOutcome::Completed { .. });
        let queries_after_first = remote.query_count();

        let second = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();
        assert_matches!(second, SyncOutcome::SkippedRecent { .. });
        assert_eq!(remote.query_count(), queries_after_first);
        assert_eq!(
            second.totals().unwrap().get(Basket::Default),
            Satoshis::const_from_u64(900)
        );
    }

    #[tokio::test]
    async fn reapplying_the_same_snapshot_changes_nothing() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let wallet_addr = keys.payment().address();
        remote.set_utxos(&wallet_addr, vec![utxo(1, 2_500, 881_990), utxo(2, 400, 881_995)]);
        remote.set_history(&wallet_addr, vec![history(1, 881_990), history(2, 881_995)]);

        ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();
        let utxos_first = db.get_unspent_utxos(account_id).unwrap();
        let txs_first = db.get_transactions(account_id).unwrap();

        age_last_synced(&mut db, account_id);
        ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        assert_eq!(db.get_unspent_utxos(account_id).unwrap(), utxos_first);
        assert_eq!(db.get_transactions(account_id).unwrap(), txs_first);
    }

    #[tokio::test]
    async fn empty_answer_for_funded_address_is_preserved() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        let wallet_addr = keys.payment().address();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&wallet_addr, vec![utxo(1, 50_000, 881_990)]);
        remote.set_history(&wallet_addr, vec![history(1, 881_990)]);
        ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        // The indexer goes quiet: zero balance, no coins, no history.
        remote.set_utxos(&wallet_addr, vec![]);
        remote.set_history(&wallet_addr, vec![]);
        age_last_synced(&mut db, account_id);

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        assert_eq!(
            outcome.totals().unwrap().get(Basket::Default),
            Satoshis::const_from_u64(50_000)
        );
    }

    #[tokio::test]
    async fn empty_coins_with_history_zeroes_the_balance() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        let wallet_addr = keys.payment().address();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&wallet_addr, vec![utxo(1, 50_000, 881_990)]);
        remote.set_history(&wallet_addr, vec![history(1, 881_990)]);
        ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        // The coin was spent elsewhere: no unspent coins, but history remains.
        remote.set_utxos(&wallet_addr, vec![]);
        remote.set_history(&wallet_addr, vec![history(1, 881_990), history(3, 881_999)]);
        age_last_synced(&mut db, account_id);

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        assert_eq!(outcome.totals().unwrap().get(Basket::Default), Satoshis::ZERO);
        assert!(db.get_unspent_utxos(account_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn initial_sync_failure_is_surfaced() {
        let mut db = MemoryWalletDb::new();
        let (account_id, _) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.fail_always(RemoteError::Unavailable("indexer down".into()));

        let result =
            ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None).await;

        assert_matches!(result, Err(Error::Remote(RemoteError::Unavailable(_))));
        assert!(db.last_synced(account_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_serves_the_cached_view() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&keys.payment().address(), vec![utxo(1, 7_000, 881_990)]);
        ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();
        let synced_at = db.last_synced(account_id).unwrap().unwrap();

        age_last_synced(&mut db, account_id);
        let aged_at = db.last_synced(account_id).unwrap().unwrap();
        assert_ne!(synced_at, aged_at);
        remote.fail_always(RemoteError::RateLimited);

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        match outcome {
            SyncOutcome::ServedCached { totals, error } => {
                assert_eq!(totals.get(Basket::Default), Satoshis::const_from_u64(7_000));
                assert_eq!(error, RemoteError::RateLimited);
            }
            other => panic!("expected the cached view, got {:?}", other),
        }
        // A failed refresh is not a successful sync; the timestamp must not move.
        assert_eq!(db.last_synced(account_id).unwrap().unwrap(), aged_at);
    }

    /// A remote ledger that switches the active account away mid-sync, as a user
    /// tapping another account would.
    struct AccountSwitchingLedger {
        inner: MockRemoteLedger,
        session: SessionContext<u32>,
        switch_to: u32,
    }

    #[async_trait::async_trait]
    impl crate::remote::RemoteLedger for AccountSwitchingLedger {
        async fn get_balance(
            &self,
            address: &TransparentAddress,
        ) -> Result<Satoshis, RemoteError> {
            self.inner.get_balance(address).await
        }

        async fn get_utxos(
            &self,
            address: &TransparentAddress,
        ) -> Result<Vec<RemoteUtxo>, RemoteError> {
            self.inner.get_utxos(address).await
        }

        async fn get_history(
            &self,
            address: &TransparentAddress,
        ) -> Result<Vec<HistoryEntry>, RemoteError> {
            self.session.set_active(Some(self.switch_to));
            self.inner.get_history(address).await
        }

        async fn get_transaction(&self, txid: &TxId) -> Result<TxDetail, RemoteError> {
            self.inner.get_transaction(txid).await
        }

        async fn broadcast(&self, raw_tx: &[u8]) -> Result<TxId, RemoteError> {
            self.inner.broadcast(raw_tx).await
        }

        async fn chain_height(&self) -> Result<BlockHeight, RemoteError> {
            self.inner.chain_height().await
        }
    }

    #[tokio::test]
    async fn switching_accounts_discards_the_inflight_sync() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        session.set_active(Some(account_id));

        let inner = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        inner.set_utxos(&keys.payment().address(), vec![utxo(1, 12_345, 881_990)]);
        let remote = AccountSwitchingLedger {
            inner,
            session: session.clone(),
            switch_to: account_id + 1,
        };

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Superseded);
        assert!(db.get_unspent_utxos(account_id).unwrap().is_empty());
        assert!(db.last_synced(account_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn background_sync_of_inactive_account_still_commits() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        // Some other account is active the whole time.
        session.set_active(Some(account_id + 7));

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&keys.payment().address(), vec![utxo(1, 640, 881_990)]);

        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();

        assert_matches!(outcome, SyncOutcome::Completed { .. });
        assert_eq!(db.get_unspent_utxos(account_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_absorbed_by_the_sync_guard() {
        let mut db = MemoryWalletDb::new();
        let (account_id, _) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session: SessionContext<u32> = SessionContext::new();

        // Simulate a sync already running for this account.
        let guard = session.try_begin(account_id).unwrap();
        assert!(session.try_begin(account_id).is_none());

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let outcome = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, account_id, None)
            .await
            .unwrap();
        assert_matches!(outcome, SyncOutcome::SkippedRecent { .. });
        assert_eq!(remote.query_count(), 0);

        // Releasing the slot lets the next trigger proceed.
        drop(guard);
        assert!(session.try_begin(account_id).is_some());
    }

    #[tokio::test]
    async fn funded_derived_address_extends_the_sender_chain() {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let session = SessionContext::new();
        let secp = Secp256k1::new();
        let (_, sender_pk) = sender_keypair(9);

        // The sender already has the index-0 address on record.
        let invoice0 = brc42::InvoiceNumber::payment("coffee", 0);
        let addr0 = brc42::derive_address_for_sender(
            &secp,
            keys.identity().secret_key(),
            &sender_pk,
            &invoice0,
        )
        .unwrap();
        db.put_derived_address(
            account_id,
            &DerivedAddress::from_parts(
                addr0,
                sender_pk,
                invoice0.to_string(),
                0,
                "unused-in-this-test".into(),
                "coffee".into(),
                OffsetDateTime::now_utc(),
            ),
        )
        .unwrap();

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&addr0, vec![utxo(5, 1_000, 881_990)]);
        remote.set_history(&addr0, vec![history(5, 881_990)]);

        let outcome = ensure_synced(
            &MAIN_NETWORK,
            &mut db,
            &remote,
            &session,
            account_id,
            Some(&keys),
        )
        .await
        .unwrap();
        assert_matches!(outcome, SyncOutcome::Completed { .. });

        // Index 1 was derived, recorded, and matches an independent re-derivation.
        assert_eq!(db.max_invoice_index(account_id, &sender_pk).unwrap(), Some(1));
        let rows = db.get_derived_addresses(account_id).unwrap();
        assert_eq!(rows.len(), 2);
        let next = rows.iter().find(|r| r.invoice_index() == 1).unwrap();
        let expected = brc42::derive_address_for_sender(
            &secp,
            keys.identity().secret_key(),
            &sender_pk,
            &brc42::InvoiceNumber::payment("coffee", 1),
        )
        .unwrap();
        assert_eq!(next.address(), &expected);

        // Re-syncing the unchanged chain state must not extend it again.
        age_last_synced(&mut db, account_id);
        ensure_synced(
            &MAIN_NETWORK,
            &mut db,
            &remote,
            &session,
            account_id,
            Some(&keys),
        )
        .await
        .unwrap();
        assert_eq!(db.max_invoice_index(account_id, &sender_pk).unwrap(), Some(1));
        assert_eq!(db.get_derived_addresses(account_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fan_out_skips_the_active_account_and_survives_failures() {
        let mut db = MemoryWalletDb::new();
        let (active_id, _) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let idx1 = bsv_keys::AccountId::ZERO.next().unwrap();
        let (failing_id, _) = register_test_account(&MAIN_NETWORK, &mut db, idx1);
        let (ok_id, ok_keys) = register_test_account(&MAIN_NETWORK, &mut db, idx1.next().unwrap());

        let session = SessionContext::new();
        session.set_active(Some(active_id));

        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.set_utxos(&ok_keys.payment().address(), vec![utxo(3, 800, 881_990)]);
        // The first query of the first background account fails; it is on its
        // initial sync, so that whole account errors out and is skipped.
        remote.fail_next(RemoteError::Unavailable("flaky".into()));

        let refreshed = sync_remaining_accounts(&MAIN_NETWORK, &mut db, &remote, &session)
            .await
            .unwrap();

        assert_eq!(refreshed, 1);
        assert!(db.get_unspent_utxos(failing_id).unwrap().is_empty());
        assert_eq!(db.get_unspent_utxos(ok_id).unwrap().len(), 1);
        // The active account was never touched.
        assert!(db.last_synced(active_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let mut db = MemoryWalletDb::new();
        let session = SessionContext::new();
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));

        let result = ensure_synced(&MAIN_NETWORK, &mut db, &remote, &session, 999, None).await;

        assert_matches!(result, Err(Error::AccountUnknown));
    }
}
