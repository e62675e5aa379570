//! Creating and releasing height-locked coins.
//!
//! A lock moves value from the default basket into an output whose script requires
//! both the wallet's signature and a minimum block height. Maturity is a pure
//! function of the current chain height, computed on read; the store only records
//! the lock row itself. Releasing a matured lock spends it back to the wallet
//! address, so the value reappears in the default basket.
//!
//! Fees here are exact, not estimated: the scripts involved have deterministic
//! sizes, and the rate comes from a process-wide [`FeeSettings`] read at the start
//! of each operation.

use time::OffsetDateTime;
use tracing::{info, warn};

use bsv_keys::AccountKeyBundle;
use bsv_primitives::{
    address::TransparentAddress,
    consensus::BlockHeight,
    script::Script,
    transaction::builder::{build_lock, build_lock_spend, SpendableInput},
    transaction::fees::{FeeRate, FeeSettings},
    transaction::{OutPoint, TxId, TxOut},
    value::{BalanceError, SatBalance, Satoshis},
};

use crate::data_api::{error::Error, WalletWrite};
use crate::remote::{RemoteError, RemoteLedger};
use crate::wallet::{Basket, LockedUtxo, TxStatus, WalletTx, WalletUtxo};

/// The result of a successful [`lock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockReceipt {
    pub txid: TxId,
    /// The first height at which the new lock can be released.
    pub unlock_height: BlockHeight,
    pub fee: Satoshis,
}

/// The result of a successful [`unlock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnlockReceipt {
    pub txid: TxId,
    /// The value returned to the default basket, after the fee.
    pub value: Satoshis,
    pub fee: Satoshis,
}

/// The aggregate outcome of [`unlock_all`]: every lock is accounted for exactly
/// once as released, still immature, or failed.
#[derive(Debug)]
pub struct UnlockSummary<E> {
    /// Transaction ids of the locks spent back to the wallet.
    pub unlocked: Vec<TxId>,
    /// The number of locks whose unlock height is still in the future.
    pub immature: u32,
    /// The locks that could not be released, with the error for each.
    pub failed: Vec<(OutPoint, E)>,
}

/// Locks `value` satoshis until `block_delta` blocks past the current chain tip.
///
/// Funding comes from the default basket. On success the store gains the lock row,
/// a change coin if one was created, and a negative-amount transaction record
/// covering the locked value plus the fee.
pub async fn lock<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
    value: Satoshis,
    block_delta: u32,
) -> Result<LockReceipt, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    if block_delta == 0 {
        return Err(Error::InvalidLockDelta);
    }
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;
    let wallet_address = *account.wallet_address();

    let height = remote.chain_height().await.map_err(Error::Remote)?;
    let unlock_height = height + block_delta;

    let pool = spendable_default_coins(db, account_id, keys)?;
    let built = build_lock(
        &pool,
        &wallet_address,
        unlock_height,
        value,
        &wallet_address,
        fees.fee_rate(),
    )?;
    let txid = remote
        .broadcast(&built.transaction.to_bytes())
        .await
        .map_err(Error::Remote)?;

    // The lock output is always vout 0, change (if any) vout 1.
    db.mark_utxos_spent(account_id, &built.spent)
        .map_err(Error::DataSource)?;
    if built.change.is_positive() {
        db.put_utxo(
            account_id,
            &WalletUtxo::from_parts(
                OutPoint::new(txid, 1),
                built.change,
                wallet_address,
                Basket::Default,
                false,
            ),
        )
        .map_err(Error::DataSource)?;
    }
    db.put_locked_utxo(
        account_id,
        &LockedUtxo::from_parts(
            OutPoint::new(txid, 0),
            value,
            unlock_height,
            OffsetDateTime::now_utc(),
        ),
    )
    .map_err(Error::DataSource)?;
    let spent_total = (value + built.fee).ok_or(BalanceError::Overflow)?;
    db.put_transaction(
        account_id,
        &WalletTx::from_parts(
            txid,
            None,
            Some(-SatBalance::from(spent_total)),
            TxStatus::Pending,
            Some("Lock".into()),
        ),
    )
    .map_err(Error::DataSource)?;

    info!(
        "Locked {} satoshis until height {} in {}",
        u64::from(value),
        unlock_height,
        txid
    );
    Ok(LockReceipt {
        txid,
        unlock_height,
        fee: built.fee,
    })
}

/// Releases one matured lock, paying its value minus the exact fee back to the
/// wallet address.
///
/// Fails with [`Error::NotYetMaturable`] if the chain has not yet reached the
/// lock's unlock height, reporting how many blocks remain.
pub async fn unlock<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
    lock: &LockedUtxo,
) -> Result<UnlockReceipt, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;
    let wallet_address = *account.wallet_address();
    let height = remote.chain_height().await.map_err(Error::Remote)?;
    unlock_at_height(
        db,
        remote,
        account_id,
        &wallet_address,
        keys,
        lock,
        height,
        fees.fee_rate(),
    )
    .await
}

/// Releases every matured lock, one at a time, and reports the batch outcome.
///
/// The chain height is read once for the whole batch. Store failures abort the
/// batch, because later writes would be built on unknown state; anything else is
/// recorded per lock and the batch continues.
pub async fn unlock_all<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
) -> Result<UnlockSummary<Error<DbT::Error, RemoteError>>, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    DbT::Error: std::fmt::Display,
    RlT: RemoteLedger,
{
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;
    let wallet_address = *account.wallet_address();
    let rows = db.get_locked_utxos(account_id).map_err(Error::DataSource)?;

    let mut summary = UnlockSummary {
        unlocked: vec![],
        immature: 0,
        failed: vec![],
    };
    if rows.is_empty() {
        return Ok(summary);
    }
    let height = remote.chain_height().await.map_err(Error::Remote)?;
    let fee_rate = fees.fee_rate();

    // Strictly sequential: each spend must be committed before the next begins, so
    // no two spends ever contend for the same coins.
    for row in &rows {
        if !row.is_mature(height) {
            summary.immature += 1;
            continue;
        }
        match unlock_at_height(
            db,
            remote,
            account_id,
            &wallet_address,
            keys,
            row,
            height,
            fee_rate,
        )
        .await
        {
            Ok(receipt) => summary.unlocked.push(receipt.txid),
            Err(e @ Error::DataSource(_)) => return Err(e),
            Err(e) => {
                warn!("Unlock of {} failed: {}", row.outpoint().txid(), e);
                summary.failed.push((*row.outpoint(), e));
            }
        }
    }
    info!(
        "Unlocked {} lock(s); {} immature, {} failed",
        summary.unlocked.len(),
        summary.immature,
        summary.failed.len()
    );
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn unlock_at_height<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    account_id: DbT::AccountId,
    wallet_address: &TransparentAddress,
    keys: &AccountKeyBundle,
    lock: &LockedUtxo,
    height: BlockHeight,
    fee_rate: FeeRate,
) -> Result<UnlockReceipt, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    if !lock.is_mature(height) {
        return Err(Error::NotYetMaturable {
            blocks_remaining: lock.blocks_remaining(height),
        });
    }

    let spendable = SpendableInput {
        outpoint: *lock.outpoint(),
        coin: TxOut {
            value: lock.value(),
            script_pubkey: Script::time_lock(lock.unlock_height(), wallet_address.pubkey_hash()),
        },
        sk: *keys.payment().secret_key(),
    };
    let built = build_lock_spend(&spendable, wallet_address, fee_rate)?;
    let txid = remote
        .broadcast(&built.transaction.to_bytes())
        .await
        .map_err(Error::Remote)?;

    let value = built.transaction.vout[0].value;
    db.remove_locked_utxo(account_id, lock.outpoint())
        .map_err(Error::DataSource)?;
    db.put_utxo(
        account_id,
        &WalletUtxo::from_parts(
            OutPoint::new(txid, 0),
            value,
            *wallet_address,
            Basket::Default,
            false,
        ),
    )
    .map_err(Error::DataSource)?;
    db.put_transaction(
        account_id,
        &WalletTx::from_parts(
            txid,
            None,
            Some(SatBalance::from(value)),
            TxStatus::Pending,
            Some("Unlock".into()),
        ),
    )
    .map_err(Error::DataSource)?;

    info!(
        "Unlocked {} satoshis from {}",
        u64::from(value),
        lock.outpoint().txid()
    );
    Ok(UnlockReceipt {
        txid,
        value,
        fee: built.fee,
    })
}

/// The account's unspent default-basket coins, paired with the payment key that
/// controls them.
pub(crate) fn spendable_default_coins<DbT, RE>(
    db: &DbT,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
) -> Result<Vec<SpendableInput>, Error<DbT::Error, RE>>
where
    DbT: WalletWrite,
{
    Ok(db
        .get_unspent_utxos(account_id)
        .map_err(Error::DataSource)?
        .into_iter()
        .filter(|utxo| utxo.basket() == Basket::Default)
        .map(|utxo| SpendableInput {
            outpoint: *utxo.outpoint(),
            coin: TxOut {
                value: utxo.value(),
                script_pubkey: utxo.address().script(),
            },
            sk: *keys.payment().secret_key(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use bsv_primitives::{
        address::TransparentAddress,
        consensus::{BlockHeight, MAIN_NETWORK},
        transaction::fees::FeeSettings,
        transaction::{OutPoint, TxId},
        value::{SatBalance, Satoshis},
    };

    use super::{lock, unlock, unlock_all};
    use crate::data_api::{
        error::Error,
        testing::{register_test_account, MemoryWalletDb, MockRemoteLedger},
        WalletRead, WalletWrite,
    };
    use crate::remote::{HistoryEntry, RemoteError, RemoteLedger, RemoteUtxo, TxDetail};
    use crate::wallet::{Basket, LockedUtxo, WalletUtxo};

    fn funded_wallet(
        value: u64,
    ) -> (MemoryWalletDb, u32, bsv_keys::AccountKeyBundle, OutPoint) {
        let mut db = MemoryWalletDb::new();
        let (account_id, keys) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let outpoint = OutPoint::new(TxId::from_bytes([9; 32]), 0);
        if value > 0 {
            db.put_utxo(
                account_id,
                &WalletUtxo::from_parts(
                    outpoint,
                    Satoshis::const_from_u64(value),
                    keys.payment().address(),
                    Basket::Default,
                    false,
                ),
            )
            .unwrap();
        }
        (db, account_id, keys, outpoint)
    }

    fn lock_row(db: &mut MemoryWalletDb, account_id: u32, byte: u8, value: u64, unlock: u32) {
        db.put_locked_utxo(
            account_id,
            &LockedUtxo::from_parts(
                OutPoint::new(TxId::from_bytes([byte; 32]), 0),
                Satoshis::const_from_u64(value),
                BlockHeight::from_u32(unlock),
                OffsetDateTime::now_utc(),
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn lock_moves_value_out_of_the_default_basket() {
        let (mut db, account_id, keys, funding) = funded_wallet(100_000);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let fees = FeeSettings::default();

        let receipt = lock(
            &mut db,
            &remote,
            &fees,
            account_id,
            &keys,
            Satoshis::const_from_u64(10_000),
            10,
        )
        .await
        .unwrap();

        assert_eq!(receipt.unlock_height, BlockHeight::from_u32(882_010));
        assert!(receipt.fee.is_positive());
        assert_eq!(remote.broadcast_attempts(), 1);

        // The lock row carries the full locked value.
        let locks = db.get_locked_utxos(account_id).unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].value(), Satoshis::const_from_u64(10_000));
        assert_eq!(locks[0].unlock_height(), receipt.unlock_height);
        assert_eq!(locks[0].outpoint(), &OutPoint::new(receipt.txid, 0));

        // The funding coin was consumed and replaced by change.
        let unspent = db.get_unspent_utxos(account_id).unwrap();
        assert_eq!(unspent.len(), 1);
        assert_ne!(unspent[0].outpoint(), &funding);
        let expected_change =
            (Satoshis::const_from_u64(90_000) - receipt.fee).unwrap();
        assert_eq!(unspent[0].value(), expected_change);
        assert_eq!(unspent[0].basket(), Basket::Default);

        let totals = db.get_basket_totals(account_id).unwrap();
        assert_eq!(totals.get(Basket::Locks), Satoshis::const_from_u64(10_000));
        assert_eq!(totals.get(Basket::Default), expected_change);

        // History shows the locked value plus the fee leaving the wallet.
        let tx = db.get_transaction(account_id, &receipt.txid).unwrap().unwrap();
        let expected_amount =
            -SatBalance::from((Satoshis::const_from_u64(10_000) + receipt.fee).unwrap());
        assert_eq!(tx.amount(), Some(expected_amount));
        assert_eq!(tx.label(), Some("Lock"));
    }

    #[tokio::test]
    async fn lock_rejects_a_zero_block_delta() {
        let (mut db, account_id, keys, _) = funded_wallet(100_000);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let fees = FeeSettings::default();

        let result = lock(
            &mut db,
            &remote,
            &fees,
            account_id,
            &keys,
            Satoshis::const_from_u64(10_000),
            0,
        )
        .await;

        assert_matches!(result, Err(Error::InvalidLockDelta));
        assert_eq!(remote.query_count(), 0);
    }

    #[tokio::test]
    async fn lock_rejects_insufficient_funds_without_broadcasting() {
        let (mut db, account_id, keys, funding) = funded_wallet(500);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        let fees = FeeSettings::default();

        let result = lock(
            &mut db,
            &remote,
            &fees,
            account_id,
            &keys,
            Satoshis::const_from_u64(10_000),
            10,
        )
        .await;

        assert_matches!(result, Err(Error::InsufficientFunds { .. }));
        assert_eq!(remote.broadcast_attempts(), 0);
        assert!(db.get_locked_utxos(account_id).unwrap().is_empty());
        let unspent = db.get_unspent_utxos(account_id).unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].outpoint(), &funding);
    }

    #[tokio::test]
    async fn unlock_respects_the_maturity_boundary() {
        let (mut db, account_id, keys, _) = funded_wallet(0);
        lock_row(&mut db, account_id, 0xee, 4000, 100);
        let row = db.get_locked_utxos(account_id).unwrap().remove(0);
        let fees = FeeSettings::default();

        // One block short: the lock reports exactly how far away it is.
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(99));
        let result = unlock(&mut db, &remote, &fees, account_id, &keys, &row).await;
        assert_matches!(
            result,
            Err(Error::NotYetMaturable { blocks_remaining: 1 })
        );
        assert_eq!(remote.broadcast_attempts(), 0);

        // At the unlock height itself, the spend goes through.
        remote.set_chain_height(BlockHeight::from_u32(100));
        let receipt = unlock(&mut db, &remote, &fees, account_id, &keys, &row)
            .await
            .unwrap();

        // 192 bytes at the default 500 sats/KB.
        assert_eq!(receipt.fee, Satoshis::const_from_u64(96));
        assert_eq!(receipt.value, Satoshis::const_from_u64(3904));
    }

    #[tokio::test]
    async fn unlocked_value_returns_to_the_default_basket() {
        let (mut db, account_id, keys, _) = funded_wallet(0);
        lock_row(&mut db, account_id, 0xee, 4000, 100);
        let row = db.get_locked_utxos(account_id).unwrap().remove(0);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(150));
        let fees = FeeSettings::default();

        let receipt = unlock(&mut db, &remote, &fees, account_id, &keys, &row)
            .await
            .unwrap();

        assert!(db.get_locked_utxos(account_id).unwrap().is_empty());
        let unspent = db.get_unspent_utxos(account_id).unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].basket(), Basket::Default);
        assert_eq!(unspent[0].value(), receipt.value);
        assert_eq!(unspent[0].outpoint(), &OutPoint::new(receipt.txid, 0));

        let totals = db.get_basket_totals(account_id).unwrap();
        assert_eq!(totals.get(Basket::Locks), Satoshis::ZERO);
        assert_eq!(totals.get(Basket::Default), receipt.value);

        let tx = db.get_transaction(account_id, &receipt.txid).unwrap().unwrap();
        assert_eq!(tx.amount(), Some(SatBalance::from(receipt.value)));
        assert_eq!(tx.label(), Some("Unlock"));
    }

    #[tokio::test]
    async fn unlock_all_accounts_for_every_lock() {
        let (mut db, account_id, keys, _) = funded_wallet(0);
        // Mature and healthy, immature, and mature but too small to pay its fee.
        lock_row(&mut db, account_id, 0x01, 5000, 100);
        lock_row(&mut db, account_id, 0x02, 5000, 200);
        lock_row(&mut db, account_id, 0x03, 50, 150);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(150));
        let fees = FeeSettings::default();

        let summary = unlock_all(&mut db, &remote, &fees, account_id, &keys)
            .await
            .unwrap();

        assert_eq!(summary.unlocked.len(), 1);
        assert_eq!(summary.immature, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(
            summary.failed[0].0,
            OutPoint::new(TxId::from_bytes([0x03; 32]), 0)
        );
        assert_matches!(summary.failed[0].1, Error::InsufficientFunds { .. });
        assert_eq!(remote.broadcast_attempts(), 1);

        // The immature and failed locks are still on record.
        assert_eq!(db.get_locked_utxos(account_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unlock_all_with_no_locks_stays_offline() {
        let (mut db, account_id, keys, _) = funded_wallet(0);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(150));
        let fees = FeeSettings::default();

        let summary = unlock_all(&mut db, &remote, &fees, account_id, &keys)
            .await
            .unwrap();

        assert!(summary.unlocked.is_empty());
        assert_eq!(summary.immature, 0);
        assert!(summary.failed.is_empty());
        assert_eq!(remote.query_count(), 0);
    }

    /// Delegates everything to the mock but makes every broadcast fail.
    struct FailingBroadcastLedger {
        inner: MockRemoteLedger,
    }

    #[async_trait::async_trait]
    impl RemoteLedger for FailingBroadcastLedger {
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
            self.inner.get_history(address).await
        }

        async fn get_transaction(&self, txid: &TxId) -> Result<TxDetail, RemoteError> {
            self.inner.get_transaction(txid).await
        }

        async fn broadcast(&self, raw_tx: &[u8]) -> Result<TxId, RemoteError> {
            self.inner
                .fail_next(RemoteError::Unavailable("broadcast refused".into()));
            self.inner.broadcast(raw_tx).await
        }

        async fn chain_height(&self) -> Result<BlockHeight, RemoteError> {
            self.inner.chain_height().await
        }
    }

    #[tokio::test]
    async fn failed_broadcast_is_attempted_once_and_commits_nothing() {
        let (mut db, account_id, keys, _) = funded_wallet(0);
        lock_row(&mut db, account_id, 0xee, 4000, 100);
        let row = db.get_locked_utxos(account_id).unwrap().remove(0);
        let remote = FailingBroadcastLedger {
            inner: MockRemoteLedger::new(BlockHeight::from_u32(150)),
        };
        let fees = FeeSettings::default();

        let result = unlock(&mut db, &remote, &fees, account_id, &keys, &row).await;

        assert_matches!(result, Err(Error::Remote(RemoteError::Unavailable(_))));
        // Broadcast is never retried; a duplicate spend attempt could conflict
        // with a first attempt that actually reached the network.
        assert_eq!(remote.inner.broadcast_attempts(), 1);
        assert_eq!(db.get_locked_utxos(account_id).unwrap().len(), 1);
        assert!(db.get_unspent_utxos(account_id).unwrap().is_empty());
        assert!(db.get_transactions(account_id).unwrap().is_empty());
    }
}
