//! Functions for querying and updating information in the wallet database.
//!
//! These implement the semantics promised by the [`bsv_client_backend::data_api`]
//! traits; [`crate::WalletDb`] delegates to them. Stored encodings are chosen so the
//! database stays legible from the `sqlite3` shell: addresses are Base58Check text,
//! public keys are compressed hex, baskets and statuses are their stable names, and
//! txids are the raw 32 bytes.

use std::collections::HashSet;

use rusqlite::{named_params, OptionalExtension};
use secp256k1::PublicKey;
use time::OffsetDateTime;
use uuid::Uuid;

use bsv_keys::SeedFingerprint;
use bsv_primitives::{
    address::TransparentAddress,
    consensus::{BlockHeight, Parameters},
    transaction::{OutPoint, TxId},
    value::{SatBalance, Satoshis},
};

use bsv_client_backend::{
    baskets::BasketTotals,
    data_api::AccountParameters,
    wallet::{
        Account, AccountSource, Basket, Contact, DerivedAddress, LockedUtxo, TxStatus, WalletTx,
        WalletUtxo,
    },
};

use crate::{error::SqliteClientError, AccountUuid, WalletDb};

pub mod init;

/// Returns the identifiers of all accounts in the database, in creation order.
pub(crate) fn get_account_ids<P>(
    wdb: &WalletDb<P>,
) -> Result<Vec<AccountUuid>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare("SELECT uuid FROM accounts ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get::<_, Uuid>(0).map(AccountUuid::from_uuid))?;

    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

/// Returns the account with the given identifier, if it exists.
pub(crate) fn get_account<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Option<Account<AccountUuid>>, SqliteClientError> {
    let row = wdb
        .conn
        .query_row(
            "SELECT name, seed_fingerprint, account_index,
                    wallet_address, ord_address, identity_address, created
             FROM accounts
             WHERE uuid = :uuid",
            named_params![":uuid": account.expose_uuid()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, Option<u32>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, OffsetDateTime>(6)?,
                ))
            },
        )
        .optional()?;

    row.map(
        |(name, fingerprint, index, wallet_address, ord_address, identity_address, created)| {
            let source = match (fingerprint, index) {
                (Some(fingerprint), Some(index)) => AccountSource::Derived {
                    seed_fingerprint: decode_fingerprint(fingerprint)?,
                    account_index: bsv_keys::AccountId::try_from(index).map_err(|_| {
                        SqliteClientError::CorruptedData(format!(
                            "account index {} is out of range",
                            index
                        ))
                    })?,
                },
                (None, None) => AccountSource::Imported,
                _ => {
                    return Err(SqliteClientError::CorruptedData(
                        "account row mixes derived and imported fields".to_string(),
                    ))
                }
            };
            Ok(Account::from_parts(
                account,
                name,
                source,
                decode_address(&wdb.params, &wallet_address)?,
                decode_address(&wdb.params, &ord_address)?,
                decode_address(&wdb.params, &identity_address)?,
                created,
            ))
        },
    )
    .transpose()
}

/// Looks up the account that was derived from the given seed at the given index.
pub(crate) fn get_derived_account<P>(
    wdb: &WalletDb<P>,
    seed_fingerprint: &SeedFingerprint,
    account_index: bsv_keys::AccountId,
) -> Result<Option<AccountUuid>, SqliteClientError> {
    wdb.conn
        .query_row(
            "SELECT uuid FROM accounts
             WHERE seed_fingerprint = :seed_fingerprint AND account_index = :account_index",
            named_params![
                ":seed_fingerprint": seed_fingerprint.to_bytes(),
                ":account_index": u32::from(account_index),
            ],
            |row| row.get::<_, Uuid>(0).map(AccountUuid::from_uuid),
        )
        .optional()
        .map_err(SqliteClientError::from)
}

/// Returns whether any coin or transaction has ever been recorded for the account.
pub(crate) fn has_activity<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<bool, SqliteClientError> {
    let mut coin_check = wdb
        .conn
        .prepare_cached("SELECT 1 FROM utxos WHERE account_uuid = :account_uuid")?;
    if coin_check.exists(named_params![":account_uuid": account.expose_uuid()])? {
        return Ok(true);
    }

    let mut tx_check = wdb
        .conn
        .prepare_cached("SELECT 1 FROM transactions WHERE account_uuid = :account_uuid")?;
    tx_check
        .exists(named_params![":account_uuid": account.expose_uuid()])
        .map_err(SqliteClientError::from)
}

/// Returns the time at which the account last completed a full refresh.
pub(crate) fn last_synced<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Option<OffsetDateTime>, SqliteClientError> {
    Ok(wdb
        .conn
        .query_row(
            "SELECT last_synced FROM accounts WHERE uuid = :uuid",
            named_params![":uuid": account.expose_uuid()],
            |row| row.get::<_, Option<OffsetDateTime>>(0),
        )
        .optional()?
        .flatten())
}

/// Returns the account's unspent coins across all baskets, oldest row first.
pub(crate) fn get_unspent_utxos<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Vec<WalletUtxo>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare_cached(
        "SELECT prevout_txid, prevout_idx, value, address, basket
         FROM utxos
         WHERE account_uuid = :account_uuid AND spent = 0
         ORDER BY id",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<WalletUtxo, SqliteClientError> {
            Ok(WalletUtxo::from_parts(
                decode_outpoint(row.get(0)?, row.get(1)?)?,
                decode_value(row.get(2)?)?,
                decode_address(&wdb.params, &row.get::<_, String>(3)?)?,
                decode_basket(&row.get::<_, String>(4)?)?,
                false,
            ))
        },
    )?;

    let mut utxos = Vec::new();
    for utxo in rows {
        utxos.push(utxo?);
    }
    Ok(utxos)
}

/// Returns the per-basket sums of the account's unspent coins, including the value
/// held by active time locks.
pub(crate) fn get_basket_totals<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<BasketTotals, SqliteClientError> {
    let mut totals = BasketTotals::ZERO;

    let mut stmt = wdb.conn.prepare_cached(
        "SELECT basket, SUM(value) FROM utxos
         WHERE account_uuid = :account_uuid AND spent = 0
         GROUP BY basket",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<(Basket, Satoshis), SqliteClientError> {
            Ok((
                decode_basket(&row.get::<_, String>(0)?)?,
                decode_value(row.get(1)?)?,
            ))
        },
    )?;
    for row in rows {
        let (basket, value) = row?;
        totals.add(basket, value).map_err(|_| {
            SqliteClientError::CorruptedData("sum of coin values is out of range".to_string())
        })?;
    }

    let locked: Option<i64> = wdb.conn.query_row(
        "SELECT SUM(value) FROM locked_utxos WHERE account_uuid = :account_uuid",
        named_params![":account_uuid": account.expose_uuid()],
        |row| row.get(0),
    )?;
    if let Some(value) = locked {
        totals.add(Basket::Locks, decode_value(value)?).map_err(|_| {
            SqliteClientError::CorruptedData("sum of locked values is out of range".to_string())
        })?;
    }

    Ok(totals)
}

/// Returns the account's transaction history, most recently recorded first.
pub(crate) fn get_transactions<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Vec<WalletTx>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare_cached(
        "SELECT txid, mined_height, amount, status, label
         FROM transactions
         WHERE account_uuid = :account_uuid
         ORDER BY id_tx DESC",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<WalletTx, SqliteClientError> {
            decode_tx(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                &row.get::<_, String>(3)?,
                row.get(4)?,
            )
        },
    )?;

    let mut transactions = Vec::new();
    for tx in rows {
        transactions.push(tx?);
    }
    Ok(transactions)
}

/// Returns a single transaction record, if the account has one for this txid.
pub(crate) fn get_transaction<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    txid: &TxId,
) -> Result<Option<WalletTx>, SqliteClientError> {
    let row = wdb
        .conn
        .query_row(
            "SELECT txid, mined_height, amount, status, label
             FROM transactions
             WHERE account_uuid = :account_uuid AND txid = :txid",
            named_params![
                ":account_uuid": account.expose_uuid(),
                ":txid": txid.as_ref(),
            ],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(txid, mined_height, amount, status, label)| {
        decode_tx(txid, mined_height, amount, &status, label)
    })
    .transpose()
}

/// Returns every BRC-42 derived address recorded for the account, oldest first.
pub(crate) fn get_derived_addresses<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Vec<DerivedAddress>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare_cached(
        "SELECT address, sender_pubkey, invoice_number, invoice_index,
                private_key_wif, label, created
         FROM derived_addresses
         WHERE account_uuid = :account_uuid
         ORDER BY id",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<DerivedAddress, SqliteClientError> {
            Ok(DerivedAddress::from_parts(
                decode_address(&wdb.params, &row.get::<_, String>(0)?)?,
                decode_pubkey(&row.get::<_, String>(1)?)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        },
    )?;

    let mut addresses = Vec::new();
    for address in rows {
        addresses.push(address?);
    }
    Ok(addresses)
}

/// Returns the highest invoice index recorded for the given sender.
pub(crate) fn max_invoice_index<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    sender: &PublicKey,
) -> Result<Option<u32>, SqliteClientError> {
    wdb.conn
        .query_row(
            "SELECT MAX(invoice_index) FROM derived_addresses
             WHERE account_uuid = :account_uuid AND sender_pubkey = :sender_pubkey",
            named_params![
                ":account_uuid": account.expose_uuid(),
                ":sender_pubkey": hex::encode(sender.serialize()),
            ],
            // MAX of an empty set is a single NULL row, not an empty result.
            |row| row.get::<_, Option<u32>>(0),
        )
        .map_err(SqliteClientError::from)
}

/// Returns the account's active time locks, oldest first.
pub(crate) fn get_locked_utxos<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Vec<LockedUtxo>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare_cached(
        "SELECT prevout_txid, prevout_idx, value, unlock_height, created
         FROM locked_utxos
         WHERE account_uuid = :account_uuid
         ORDER BY id",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<LockedUtxo, SqliteClientError> {
            Ok(LockedUtxo::from_parts(
                decode_outpoint(row.get(0)?, row.get(1)?)?,
                decode_value(row.get(2)?)?,
                BlockHeight::from_u32(row.get(3)?),
                row.get(4)?,
            ))
        },
    )?;

    let mut locks = Vec::new();
    for lock in rows {
        locks.push(lock?);
    }
    Ok(locks)
}

/// Returns the account's address book, oldest entry first.
pub(crate) fn get_contacts<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<Vec<Contact>, SqliteClientError> {
    let mut stmt = wdb.conn.prepare_cached(
        "SELECT pubkey, label FROM contacts
         WHERE account_uuid = :account_uuid
         ORDER BY id",
    )?;
    let rows = stmt.query_and_then(
        named_params![":account_uuid": account.expose_uuid()],
        |row| -> Result<Contact, SqliteClientError> {
            Ok(Contact::new(
                decode_pubkey(&row.get::<_, String>(0)?)?,
                row.get(1)?,
            ))
        },
    )?;

    let mut contacts = Vec::new();
    for contact in rows {
        contacts.push(contact?);
    }
    Ok(contacts)
}

/// Registers a new account and returns the identifier assigned to it.
pub(crate) fn create_account<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountParameters,
) -> Result<AccountUuid, SqliteClientError> {
    let account_uuid = Uuid::new_v4();
    let (seed_fingerprint, account_index) = match &account.source {
        AccountSource::Derived {
            seed_fingerprint,
            account_index,
        } => (
            Some(seed_fingerprint.to_bytes()),
            Some(u32::from(*account_index)),
        ),
        AccountSource::Imported => (None, None),
    };

    wdb.conn.execute(
        "INSERT INTO accounts (uuid, name, seed_fingerprint, account_index,
                               wallet_address, ord_address, identity_address, created)
         VALUES (:uuid, :name, :seed_fingerprint, :account_index,
                 :wallet_address, :ord_address, :identity_address, :created)",
        named_params![
            ":uuid": account_uuid,
            ":name": account.name,
            ":seed_fingerprint": seed_fingerprint,
            ":account_index": account_index,
            ":wallet_address": account.wallet_address.encode(&wdb.params),
            ":ord_address": account.ord_address.encode(&wdb.params),
            ":identity_address": account.identity_address.encode(&wdb.params),
            ":created": OffsetDateTime::now_utc(),
        ],
    )?;

    Ok(AccountUuid::from_uuid(account_uuid))
}

/// Changes an account's display name.
pub(crate) fn rename_account<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    name: &str,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "UPDATE accounts SET name = :name WHERE uuid = :uuid",
        named_params![":uuid": account.expose_uuid(), ":name": name],
    )?;
    Ok(())
}

/// Removes an account and every row that belongs to it.
pub(crate) fn delete_account<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
) -> Result<(), SqliteClientError> {
    let tx = wdb.conn.unchecked_transaction()?;
    for table in [
        "contacts",
        "locked_utxos",
        "derived_addresses",
        "transactions",
        "utxos",
    ] {
        tx.execute(
            &format!("DELETE FROM {} WHERE account_uuid = :account_uuid", table),
            named_params![":account_uuid": account.expose_uuid()],
        )?;
    }
    tx.execute(
        "DELETE FROM accounts WHERE uuid = :uuid",
        named_params![":uuid": account.expose_uuid()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Reconciles the stored coins at `address` with a snapshot reported by the remote
/// ledger.
///
/// Stored unspent coins at this address that are absent from the snapshot are flagged
/// spent; unknown coins are inserted. A coin already flagged spent is left untouched
/// even if the snapshot still reports it, since the snapshot may predate a spend this
/// wallet performed itself.
pub(crate) fn replace_address_utxos<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    address: &TransparentAddress,
    basket: Basket,
    utxos: &[(OutPoint, Satoshis)],
) -> Result<(), SqliteClientError> {
    let tx = wdb.conn.unchecked_transaction()?;

    let reported: HashSet<OutPoint> = utxos.iter().map(|(outpoint, _)| *outpoint).collect();

    let stored: Vec<OutPoint> = {
        let mut stmt = tx.prepare(
            "SELECT prevout_txid, prevout_idx FROM utxos
             WHERE account_uuid = :account_uuid AND address = :address AND spent = 0",
        )?;
        let rows = stmt.query_and_then(
            named_params![
                ":account_uuid": account.expose_uuid(),
                ":address": address.encode(&wdb.params),
            ],
            |row| -> Result<OutPoint, SqliteClientError> {
                decode_outpoint(row.get(0)?, row.get(1)?)
            },
        )?;
        let mut stored = Vec::new();
        for outpoint in rows {
            stored.push(outpoint?);
        }
        stored
    };

    {
        let mut mark_spent = tx.prepare(
            "UPDATE utxos SET spent = 1
             WHERE account_uuid = :account_uuid
               AND prevout_txid = :prevout_txid AND prevout_idx = :prevout_idx",
        )?;
        for outpoint in stored.iter().filter(|op| !reported.contains(*op)) {
            mark_spent.execute(named_params![
                ":account_uuid": account.expose_uuid(),
                ":prevout_txid": outpoint.txid().as_ref(),
                ":prevout_idx": outpoint.n(),
            ])?;
        }
    }

    {
        // The conflict guard keeps spent coins spent: a lagging snapshot cannot
        // resurrect a coin this wallet has spent itself.
        let mut upsert = tx.prepare(
            "INSERT INTO utxos (account_uuid, prevout_txid, prevout_idx,
                                value, address, basket, spent)
             VALUES (:account_uuid, :prevout_txid, :prevout_idx, :value, :address, :basket, 0)
             ON CONFLICT (account_uuid, prevout_txid, prevout_idx) DO UPDATE
             SET value = excluded.value, address = excluded.address, basket = excluded.basket
             WHERE spent = 0",
        )?;
        for (outpoint, value) in utxos {
            upsert.execute(named_params![
                ":account_uuid": account.expose_uuid(),
                ":prevout_txid": outpoint.txid().as_ref(),
                ":prevout_idx": outpoint.n(),
                ":value": i64::from(SatBalance::from(*value)),
                ":address": address.encode(&wdb.params),
                ":basket": basket.name(),
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Flags the given coins as spent, retaining their rows.
pub(crate) fn mark_utxos_spent<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    spent: &[OutPoint],
) -> Result<(), SqliteClientError> {
    let tx = wdb.conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "UPDATE utxos SET spent = 1
             WHERE account_uuid = :account_uuid
               AND prevout_txid = :prevout_txid AND prevout_idx = :prevout_idx",
        )?;
        for outpoint in spent {
            stmt.execute(named_params![
                ":account_uuid": account.expose_uuid(),
                ":prevout_txid": outpoint.txid().as_ref(),
                ":prevout_idx": outpoint.n(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Inserts a single coin, replacing any existing row for the same outpoint.
pub(crate) fn put_utxo<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    utxo: &WalletUtxo,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "INSERT INTO utxos (account_uuid, prevout_txid, prevout_idx,
                            value, address, basket, spent)
         VALUES (:account_uuid, :prevout_txid, :prevout_idx, :value, :address, :basket, :spent)
         ON CONFLICT (account_uuid, prevout_txid, prevout_idx) DO UPDATE
         SET value = excluded.value, address = excluded.address,
             basket = excluded.basket, spent = excluded.spent",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":prevout_txid": utxo.outpoint().txid().as_ref(),
            ":prevout_idx": utxo.outpoint().n(),
            ":value": i64::from(SatBalance::from(utxo.value())),
            ":address": utxo.address().encode(&wdb.params),
            ":basket": utxo.basket().name(),
            ":spent": utxo.is_spent(),
        ],
    )?;
    Ok(())
}

/// Upserts a transaction record.
///
/// Merge rules for an existing row: a known `amount` is never replaced by an unknown
/// one, a known `label` is never cleared, and a mined height is adopted when the new
/// record carries one, recomputing the status from the merged height.
pub(crate) fn put_transaction<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    tx: &WalletTx,
) -> Result<(), SqliteClientError> {
    // The status literals below must stay in step with `TxStatus::name`.
    wdb.conn.execute(
        "INSERT INTO transactions (account_uuid, txid, mined_height, amount, status, label)
         VALUES (:account_uuid, :txid, :mined_height, :amount, :status, :label)
         ON CONFLICT (account_uuid, txid) DO UPDATE
         SET mined_height = COALESCE(excluded.mined_height, mined_height),
             amount = COALESCE(excluded.amount, amount),
             label = COALESCE(excluded.label, label),
             status = CASE
                 WHEN COALESCE(excluded.mined_height, mined_height) IS NULL THEN 'pending'
                 ELSE 'confirmed'
             END",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":txid": tx.txid().as_ref(),
            ":mined_height": tx.mined_height().map(u32::from),
            ":amount": tx.amount().map(i64::from),
            ":status": tx.status().name(),
            ":label": tx.label(),
        ],
    )?;
    Ok(())
}

/// Records a derived address. An address that is already recorded is left untouched.
pub(crate) fn put_derived_address<P: Parameters>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    address: &DerivedAddress,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "INSERT INTO derived_addresses (account_uuid, address, sender_pubkey, invoice_number,
                                        invoice_index, private_key_wif, label, created)
         VALUES (:account_uuid, :address, :sender_pubkey, :invoice_number,
                 :invoice_index, :private_key_wif, :label, :created)
         ON CONFLICT (account_uuid, address) DO NOTHING",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":address": address.address().encode(&wdb.params),
            ":sender_pubkey": hex::encode(address.sender_pubkey().serialize()),
            ":invoice_number": address.invoice_number(),
            ":invoice_index": address.invoice_index(),
            ":private_key_wif": address.private_key_wif(),
            ":label": address.label(),
            ":created": address.created_at(),
        ],
    )?;
    Ok(())
}

/// Records an active time lock, replacing any existing record for the same outpoint.
pub(crate) fn put_locked_utxo<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    lock: &LockedUtxo,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "INSERT INTO locked_utxos (account_uuid, prevout_txid, prevout_idx,
                                   value, unlock_height, created)
         VALUES (:account_uuid, :prevout_txid, :prevout_idx, :value, :unlock_height, :created)
         ON CONFLICT (account_uuid, prevout_txid, prevout_idx) DO UPDATE
         SET value = excluded.value, unlock_height = excluded.unlock_height,
             created = excluded.created",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":prevout_txid": lock.outpoint().txid().as_ref(),
            ":prevout_idx": lock.outpoint().n(),
            ":value": i64::from(SatBalance::from(lock.value())),
            ":unlock_height": u32::from(lock.unlock_height()),
            ":created": lock.created_at(),
        ],
    )?;
    Ok(())
}

/// Removes a time lock record once its coin has been released.
pub(crate) fn remove_locked_utxo<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    outpoint: &OutPoint,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "DELETE FROM locked_utxos
         WHERE account_uuid = :account_uuid
           AND prevout_txid = :prevout_txid AND prevout_idx = :prevout_idx",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":prevout_txid": outpoint.txid().as_ref(),
            ":prevout_idx": outpoint.n(),
        ],
    )?;
    Ok(())
}

/// Adds a contact, or relabels the existing contact with the same public key.
pub(crate) fn put_contact<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    contact: &Contact,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "INSERT INTO contacts (account_uuid, pubkey, label)
         VALUES (:account_uuid, :pubkey, :label)
         ON CONFLICT (account_uuid, pubkey) DO UPDATE SET label = excluded.label",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":pubkey": hex::encode(contact.pubkey().serialize()),
            ":label": contact.label(),
        ],
    )?;
    Ok(())
}

/// Removes the contact with the given public key, if present.
pub(crate) fn delete_contact<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    pubkey: &PublicKey,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "DELETE FROM contacts WHERE account_uuid = :account_uuid AND pubkey = :pubkey",
        named_params![
            ":account_uuid": account.expose_uuid(),
            ":pubkey": hex::encode(pubkey.serialize()),
        ],
    )?;
    Ok(())
}

/// Records the completion time of a full refresh.
pub(crate) fn set_last_synced<P>(
    wdb: &WalletDb<P>,
    account: AccountUuid,
    at: OffsetDateTime,
) -> Result<(), SqliteClientError> {
    wdb.conn.execute(
        "UPDATE accounts SET last_synced = :last_synced WHERE uuid = :uuid",
        named_params![":uuid": account.expose_uuid(), ":last_synced": at],
    )?;
    Ok(())
}

fn decode_tx(
    txid: Vec<u8>,
    mined_height: Option<u32>,
    amount: Option<i64>,
    status: &str,
    label: Option<String>,
) -> Result<WalletTx, SqliteClientError> {
    Ok(WalletTx::from_parts(
        decode_txid(txid)?,
        mined_height.map(BlockHeight::from_u32),
        amount
            .map(|amount| {
                SatBalance::from_i64(amount).map_err(|_| {
                    SqliteClientError::CorruptedData(format!(
                        "transaction amount {} is out of range",
                        amount
                    ))
                })
            })
            .transpose()?,
        decode_status(status)?,
        label,
    ))
}

fn decode_address<P: Parameters>(
    params: &P,
    address: &str,
) -> Result<TransparentAddress, SqliteClientError> {
    TransparentAddress::decode(params, address)
        .map_err(|e| SqliteClientError::CorruptedData(format!("invalid stored address: {}", e)))
}

fn decode_pubkey(pubkey: &str) -> Result<PublicKey, SqliteClientError> {
    let bytes = hex::decode(pubkey)
        .map_err(|e| SqliteClientError::CorruptedData(format!("invalid stored pubkey: {}", e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| SqliteClientError::CorruptedData(format!("invalid stored pubkey: {}", e)))
}

fn decode_txid(bytes: Vec<u8>) -> Result<TxId, SqliteClientError> {
    <[u8; 32]>::try_from(bytes)
        .map(TxId::from_bytes)
        .map_err(|bytes| {
            SqliteClientError::CorruptedData(format!(
                "txid must be 32 bytes, found {}",
                bytes.len()
            ))
        })
}

fn decode_outpoint(txid: Vec<u8>, n: u32) -> Result<OutPoint, SqliteClientError> {
    Ok(OutPoint::new(decode_txid(txid)?, n))
}

fn decode_fingerprint(bytes: Vec<u8>) -> Result<SeedFingerprint, SqliteClientError> {
    <[u8; 32]>::try_from(bytes)
        .map(SeedFingerprint::from_bytes)
        .map_err(|bytes| {
            SqliteClientError::CorruptedData(format!(
                "seed fingerprint must be 32 bytes, found {}",
                bytes.len()
            ))
        })
}

fn decode_value(value: i64) -> Result<Satoshis, SqliteClientError> {
    Satoshis::from_nonnegative_i64(value).map_err(|_| {
        SqliteClientError::CorruptedData(format!("coin value {} is out of range", value))
    })
}

fn decode_basket(name: &str) -> Result<Basket, SqliteClientError> {
    Basket::from_name(name)
        .ok_or_else(|| SqliteClientError::CorruptedData(format!("unrecognized basket: {}", name)))
}

fn decode_status(name: &str) -> Result<TxStatus, SqliteClientError> {
    TxStatus::from_name(name).ok_or_else(|| {
        SqliteClientError::CorruptedData(format!("unrecognized transaction status: {}", name))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::NamedTempFile;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use bsv_keys::{wif, SeedFingerprint};
    use bsv_primitives::{
        address::TransparentAddress,
        consensus::{BlockHeight, Network},
        transaction::{OutPoint, TxId},
        value::{SatBalance, Satoshis},
    };

    use bsv_client_backend::{
        baskets::BasketTotals,
        data_api::{AccountParameters, WalletRead, WalletWrite},
        wallet::{
            AccountSource, Basket, Contact, DerivedAddress, LockedUtxo, TxStatus, WalletTx,
            WalletUtxo,
        },
    };

    use crate::{error::SqliteClientError, wallet::init::init_wallet_db, AccountUuid, WalletDb};

    fn test_db() -> (NamedTempFile, WalletDb<Network>) {
        let data_file = NamedTempFile::new().unwrap();
        let db = WalletDb::for_path(data_file.path(), Network::TestNetwork).unwrap();
        init_wallet_db(&db).unwrap();
        (data_file, db)
    }

    fn address(tag: u8) -> TransparentAddress {
        TransparentAddress::from_pubkey_hash([tag; 20])
    }

    fn outpoint(tag: u8, n: u32) -> OutPoint {
        OutPoint::new(TxId::from_bytes([tag; 32]), n)
    }

    fn keypair(tag: u8) -> (secp256k1::SecretKey, secp256k1::PublicKey) {
        let secp = secp256k1::Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[tag; 32]).unwrap();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn pubkey(tag: u8) -> secp256k1::PublicKey {
        keypair(tag).1
    }

    fn imported_account(db: &mut WalletDb<Network>, name: &str, tag: u8) -> AccountUuid {
        db.create_account(AccountParameters {
            name: name.to_string(),
            source: AccountSource::Imported,
            wallet_address: address(tag),
            ord_address: address(tag + 1),
            identity_address: address(tag + 2),
        })
        .unwrap()
    }

    fn coin(tag: u8, value: u64, addr: TransparentAddress, basket: Basket) -> WalletUtxo {
        WalletUtxo::from_parts(
            outpoint(tag, 0),
            Satoshis::const_from_u64(value),
            addr,
            basket,
            false,
        )
    }

    #[test]
    fn accounts_round_trip() {
        let (_data_file, mut db) = test_db();

        let fingerprint = SeedFingerprint::from_bytes([7; 32]);
        let index = bsv_keys::AccountId::ZERO;
        let derived = db
            .create_account(AccountParameters {
                name: "Account 1".to_string(),
                source: AccountSource::Derived {
                    seed_fingerprint: fingerprint,
                    account_index: index,
                },
                wallet_address: address(1),
                ord_address: address(2),
                identity_address: address(3),
            })
            .unwrap();
        let imported = imported_account(&mut db, "Paper wallet", 10);

        assert_eq!(db.get_account_ids().unwrap(), vec![derived, imported]);

        let account = db.get_account(derived).unwrap().unwrap();
        assert_eq!(account.id(), derived);
        assert_eq!(account.name(), "Account 1");
        assert_eq!(
            account.source(),
            &AccountSource::Derived {
                seed_fingerprint: fingerprint,
                account_index: index,
            }
        );
        assert_eq!(account.wallet_address(), &address(1));
        assert_eq!(account.ord_address(), &address(2));
        assert_eq!(account.identity_address(), &address(3));

        let account = db.get_account(imported).unwrap().unwrap();
        assert_eq!(account.source(), &AccountSource::Imported);

        assert_eq!(
            db.get_derived_account(&fingerprint, index).unwrap(),
            Some(derived)
        );
        assert_eq!(
            db.get_derived_account(&SeedFingerprint::from_bytes([8; 32]), index)
                .unwrap(),
            None
        );
        assert!(db
            .get_account(AccountUuid::from_uuid(Uuid::new_v4()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn rename_and_delete_account() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        let other = imported_account(&mut db, "Spending", 20);

        db.rename_account(account_id, "Cold storage").unwrap();
        assert_eq!(
            db.get_account(account_id).unwrap().unwrap().name(),
            "Cold storage"
        );

        db.put_utxo(account_id, &coin(1, 1000, address(1), Basket::Default))
            .unwrap();
        db.put_contact(account_id, &Contact::new(pubkey(1), "Alice".to_string()))
            .unwrap();
        db.put_utxo(other, &coin(2, 500, address(20), Basket::Default))
            .unwrap();

        db.delete_account(account_id).unwrap();

        assert!(db.get_account(account_id).unwrap().is_none());
        assert_eq!(db.get_account_ids().unwrap(), vec![other]);
        assert_eq!(db.get_unspent_utxos(account_id).unwrap(), vec![]);
        assert_eq!(db.get_contacts(account_id).unwrap(), vec![]);

        // The other account's rows are untouched.
        assert_eq!(db.get_unspent_utxos(other).unwrap().len(), 1);
    }

    #[test]
    fn snapshot_reconciliation_preserves_spent_coins() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        let addr = address(1);

        // One live coin, one coin this wallet already spent, one coin elsewhere.
        db.put_utxo(
            account_id,
            &WalletUtxo::from_parts(
                outpoint(1, 0),
                Satoshis::const_from_u64(1000),
                addr,
                Basket::Default,
                false,
            ),
        )
        .unwrap();
        db.put_utxo(
            account_id,
            &WalletUtxo::from_parts(
                outpoint(2, 0),
                Satoshis::const_from_u64(2000),
                addr,
                Basket::Default,
                true,
            ),
        )
        .unwrap();
        db.put_utxo(
            account_id,
            &WalletUtxo::from_parts(
                outpoint(3, 0),
                Satoshis::const_from_u64(3000),
                address(4),
                Basket::Ordinals,
                false,
            ),
        )
        .unwrap();

        // The snapshot still reports the spent coin, has dropped the live one, and
        // carries a new one.
        let snapshot = [
            (outpoint(2, 0), Satoshis::const_from_u64(2000)),
            (outpoint(4, 1), Satoshis::const_from_u64(4000)),
        ];
        db.replace_address_utxos(account_id, &addr, Basket::Default, &snapshot)
            .unwrap();

        let unspent = db.get_unspent_utxos(account_id).unwrap();
        let outpoints: Vec<OutPoint> = unspent.iter().map(|u| *u.outpoint()).collect();
        assert_eq!(outpoints, vec![outpoint(3, 0), outpoint(4, 1)]);

        // Applying the same snapshot again changes nothing.
        db.replace_address_utxos(account_id, &addr, Basket::Default, &snapshot)
            .unwrap();
        assert_eq!(db.get_unspent_utxos(account_id).unwrap(), unspent);
    }

    #[test]
    fn marking_coins_spent_removes_them_from_balances() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);

        db.put_utxo(account_id, &coin(1, 1000, address(1), Basket::Default))
            .unwrap();
        db.put_utxo(account_id, &coin(2, 700, address(2), Basket::Ordinals))
            .unwrap();

        db.mark_utxos_spent(account_id, &[outpoint(1, 0)]).unwrap();

        let unspent = db.get_unspent_utxos(account_id).unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].outpoint(), &outpoint(2, 0));

        let totals = db.get_basket_totals(account_id).unwrap();
        assert_eq!(totals.get(Basket::Default), Satoshis::ZERO);
        assert_eq!(totals.get(Basket::Ordinals), Satoshis::const_from_u64(700));

        // Re-inserting the outpoint updates the stored row in place.
        db.put_utxo(account_id, &coin(2, 900, address(2), Basket::Ordinals))
            .unwrap();
        let totals = db.get_basket_totals(account_id).unwrap();
        assert_eq!(totals.get(Basket::Ordinals), Satoshis::const_from_u64(900));
    }

    #[test]
    fn basket_totals_include_locked_value() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);

        db.put_utxo(account_id, &coin(1, 1000, address(1), Basket::Default))
            .unwrap();
        db.put_utxo(account_id, &coin(2, 2000, address(1), Basket::Default))
            .unwrap();
        db.put_utxo(account_id, &coin(3, 500, address(2), Basket::Ordinals))
            .unwrap();
        db.put_locked_utxo(
            account_id,
            &LockedUtxo::from_parts(
                outpoint(9, 0),
                Satoshis::const_from_u64(4000),
                BlockHeight::from_u32(900_000),
                OffsetDateTime::UNIX_EPOCH,
            ),
        )
        .unwrap();

        let totals = db.get_basket_totals(account_id).unwrap();
        assert_eq!(totals.get(Basket::Default), Satoshis::const_from_u64(3000));
        assert_eq!(totals.get(Basket::Ordinals), Satoshis::const_from_u64(500));
        assert_eq!(totals.get(Basket::Locks), Satoshis::const_from_u64(4000));
        assert_eq!(totals.spendable(), Satoshis::const_from_u64(3000));
        assert_eq!(totals.total(), Satoshis::const_from_u64(7500));
    }

    #[test]
    fn transaction_merge_keeps_known_fields() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        let txid = TxId::from_bytes([9; 32]);

        db.put_transaction(
            account_id,
            &WalletTx::from_parts(txid, None, None, TxStatus::Pending, Some("Pay Bob".into())),
        )
        .unwrap();

        // A sync pass later learns the height and the net amount, but not the label.
        db.put_transaction(
            account_id,
            &WalletTx::from_parts(
                txid,
                Some(BlockHeight::from_u32(800_000)),
                Some(SatBalance::const_from_i64(-5000)),
                TxStatus::Pending,
                None,
            ),
        )
        .unwrap();

        let stored = db.get_transaction(account_id, &txid).unwrap().unwrap();
        assert_eq!(stored.mined_height(), Some(BlockHeight::from_u32(800_000)));
        assert_eq!(stored.amount(), Some(SatBalance::const_from_i64(-5000)));
        assert_eq!(stored.label(), Some("Pay Bob"));
        assert_eq!(stored.status(), TxStatus::Confirmed);

        // A later sparse record must not erase anything.
        db.put_transaction(
            account_id,
            &WalletTx::from_parts(txid, None, None, TxStatus::Pending, None),
        )
        .unwrap();
        assert_eq!(
            db.get_transaction(account_id, &txid).unwrap().unwrap(),
            stored
        );
    }

    #[test]
    fn transactions_are_listed_most_recent_first() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);

        for tag in 1..=3 {
            db.put_transaction(
                account_id,
                &WalletTx::from_parts(
                    TxId::from_bytes([tag; 32]),
                    None,
                    None,
                    TxStatus::Pending,
                    None,
                ),
            )
            .unwrap();
        }

        let txids: Vec<TxId> = db
            .get_transactions(account_id)
            .unwrap()
            .iter()
            .map(|tx| *tx.txid())
            .collect();
        assert_eq!(
            txids,
            vec![
                TxId::from_bytes([3; 32]),
                TxId::from_bytes([2; 32]),
                TxId::from_bytes([1; 32]),
            ]
        );

        // Merging new detail into the oldest record does not move it.
        db.put_transaction(
            account_id,
            &WalletTx::from_parts(
                TxId::from_bytes([1; 32]),
                Some(BlockHeight::from_u32(800_000)),
                None,
                TxStatus::Pending,
                None,
            ),
        )
        .unwrap();
        let reordered: Vec<TxId> = db
            .get_transactions(account_id)
            .unwrap()
            .iter()
            .map(|tx| *tx.txid())
            .collect();
        assert_eq!(txids, reordered);
    }

    #[test]
    fn derived_addresses_insert_once_and_track_indices() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        let (child_sk, _) = keypair(3);
        let sender = pubkey(5);
        let other_sender = pubkey(6);
        let created = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let child_wif = wif::encode_wif(&Network::TestNetwork, &child_sk);

        let first = DerivedAddress::from_parts(
            address(30),
            sender,
            "3241645161d8-2-default 0".to_string(),
            0,
            child_wif.clone(),
            "Invoice #12".to_string(),
            created,
        );
        db.put_derived_address(account_id, &first).unwrap();

        // Re-recording the same address must neither duplicate nor relabel it.
        let relabeled = DerivedAddress::from_parts(
            address(30),
            sender,
            "3241645161d8-2-default 0".to_string(),
            0,
            child_wif.clone(),
            "Different label".to_string(),
            created,
        );
        db.put_derived_address(account_id, &relabeled).unwrap();

        db.put_derived_address(
            account_id,
            &DerivedAddress::from_parts(
                address(31),
                sender,
                "3241645161d8-2-default 1".to_string(),
                1,
                child_wif.clone(),
                String::new(),
                created,
            ),
        )
        .unwrap();
        db.put_derived_address(
            account_id,
            &DerivedAddress::from_parts(
                address(32),
                other_sender,
                "3241645161d8-2-default 7".to_string(),
                7,
                child_wif.clone(),
                String::new(),
                created,
            ),
        )
        .unwrap();

        let stored = db.get_derived_addresses(account_id).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].address(), &address(30));
        assert_eq!(stored[0].sender_pubkey(), &sender);
        assert_eq!(stored[0].invoice_number(), "3241645161d8-2-default 0");
        assert_eq!(stored[0].invoice_index(), 0);
        assert_eq!(stored[0].private_key_wif(), child_wif);
        assert_eq!(stored[0].label(), "Invoice #12");
        assert_eq!(stored[0].created_at(), created);

        assert_eq!(db.max_invoice_index(account_id, &sender).unwrap(), Some(1));
        assert_eq!(
            db.max_invoice_index(account_id, &other_sender).unwrap(),
            Some(7)
        );
        assert_eq!(db.max_invoice_index(account_id, &pubkey(9)).unwrap(), None);
    }

    #[test]
    fn locks_upsert_and_release() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        let created = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        db.put_locked_utxo(
            account_id,
            &LockedUtxo::from_parts(
                outpoint(8, 0),
                Satoshis::const_from_u64(4000),
                BlockHeight::from_u32(900_000),
                created,
            ),
        )
        .unwrap();

        // Re-recording the same outpoint replaces the row.
        let extended = LockedUtxo::from_parts(
            outpoint(8, 0),
            Satoshis::const_from_u64(4000),
            BlockHeight::from_u32(905_000),
            created,
        );
        db.put_locked_utxo(account_id, &extended).unwrap();
        assert_eq!(
            db.get_locked_utxos(account_id).unwrap(),
            vec![extended.clone()]
        );

        db.remove_locked_utxo(account_id, &outpoint(8, 0)).unwrap();
        assert_eq!(db.get_locked_utxos(account_id).unwrap(), vec![]);
        assert_eq!(
            db.get_basket_totals(account_id).unwrap().get(Basket::Locks),
            Satoshis::ZERO
        );
    }

    #[test]
    fn contacts_upsert_by_pubkey() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);

        db.put_contact(account_id, &Contact::new(pubkey(1), "Alice".to_string()))
            .unwrap();
        db.put_contact(account_id, &Contact::new(pubkey(2), "Bob".to_string()))
            .unwrap();
        db.put_contact(
            account_id,
            &Contact::new(pubkey(1), "Alice (work)".to_string()),
        )
        .unwrap();

        assert_eq!(
            db.get_contacts(account_id).unwrap(),
            vec![
                Contact::new(pubkey(1), "Alice (work)".to_string()),
                Contact::new(pubkey(2), "Bob".to_string()),
            ]
        );

        db.delete_contact(account_id, &pubkey(1)).unwrap();
        assert_eq!(
            db.get_contacts(account_id).unwrap(),
            vec![Contact::new(pubkey(2), "Bob".to_string())]
        );
    }

    #[test]
    fn sync_state_round_trips() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);

        assert_eq!(db.last_synced(account_id).unwrap(), None);
        assert!(!db.has_activity(account_id).unwrap());

        let at = OffsetDateTime::from_unix_timestamp(1_724_000_000).unwrap();
        db.set_last_synced(account_id, at).unwrap();
        assert_eq!(db.last_synced(account_id).unwrap(), Some(at));

        db.put_transaction(
            account_id,
            &WalletTx::from_parts(TxId::from_bytes([1; 32]), None, None, TxStatus::Pending, None),
        )
        .unwrap();
        assert!(db.has_activity(account_id).unwrap());
    }

    #[test]
    fn unknown_account_reads_are_empty() {
        let (_data_file, db) = test_db();
        let unknown = AccountUuid::from_uuid(Uuid::new_v4());

        assert!(db.get_account(unknown).unwrap().is_none());
        assert_eq!(db.get_unspent_utxos(unknown).unwrap(), vec![]);
        assert_eq!(db.get_basket_totals(unknown).unwrap(), BasketTotals::ZERO);
        assert_eq!(db.get_transactions(unknown).unwrap(), vec![]);
        assert_eq!(db.last_synced(unknown).unwrap(), None);
        assert!(!db.has_activity(unknown).unwrap());
    }

    #[test]
    fn corrupted_rows_are_reported() {
        let (_data_file, mut db) = test_db();
        let account_id = imported_account(&mut db, "Savings", 1);
        db.put_utxo(account_id, &coin(1, 1000, address(1), Basket::Default))
            .unwrap();

        db.conn
            .execute("UPDATE utxos SET basket = 'junk'", [])
            .unwrap();
        assert_matches!(
            db.get_unspent_utxos(account_id),
            Err(SqliteClientError::CorruptedData(_))
        );

        db.conn
            .execute("UPDATE utxos SET basket = 'default', value = -1", [])
            .unwrap();
        assert_matches!(
            db.get_unspent_utxos(account_id),
            Err(SqliteClientError::CorruptedData(_))
        );
    }
}
