//! Functions for initializing the wallet database.

use rusqlite::Connection;

use crate::WalletDb;

/// Sets up the internal structure of the wallet database.
///
/// This is a no-op when run against an already-initialized database, so it is safe
/// to call every time the database is opened.
///
/// # Examples
///
/// ```
/// use tempfile::NamedTempFile;
/// use bsv_primitives::consensus::Network;
/// use bsv_client_sqlite::{wallet::init::init_wallet_db, WalletDb};
///
/// let data_file = NamedTempFile::new().unwrap();
/// let db = WalletDb::for_path(data_file.path(), Network::TestNetwork).unwrap();
/// init_wallet_db(&db).unwrap();
/// ```
pub fn init_wallet_db<P>(wdb: &WalletDb<P>) -> Result<(), rusqlite::Error> {
    create_tables(&wdb.conn)
}

fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            uuid BLOB NOT NULL,
            name TEXT NOT NULL,
            seed_fingerprint BLOB,
            account_index INTEGER,
            wallet_address TEXT NOT NULL,
            ord_address TEXT NOT NULL,
            identity_address TEXT NOT NULL,
            created TEXT NOT NULL,
            last_synced TEXT,
            CHECK ((seed_fingerprint IS NULL) = (account_index IS NULL))
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS accounts_uuid ON accounts (uuid)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS accounts_derivation
         ON accounts (seed_fingerprint, account_index)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS utxos (
            id INTEGER PRIMARY KEY,
            account_uuid BLOB NOT NULL,
            prevout_txid BLOB NOT NULL,
            prevout_idx INTEGER NOT NULL,
            value INTEGER NOT NULL,
            address TEXT NOT NULL,
            basket TEXT NOT NULL,
            spent INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (account_uuid) REFERENCES accounts(uuid),
            CONSTRAINT utxo_outpoint UNIQUE (account_uuid, prevout_txid, prevout_idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id_tx INTEGER PRIMARY KEY,
            account_uuid BLOB NOT NULL,
            txid BLOB NOT NULL,
            mined_height INTEGER,
            amount INTEGER,
            status TEXT NOT NULL,
            label TEXT,
            FOREIGN KEY (account_uuid) REFERENCES accounts(uuid),
            CONSTRAINT account_tx UNIQUE (account_uuid, txid)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS derived_addresses (
            id INTEGER PRIMARY KEY,
            account_uuid BLOB NOT NULL,
            address TEXT NOT NULL,
            sender_pubkey TEXT NOT NULL,
            invoice_number TEXT NOT NULL,
            invoice_index INTEGER NOT NULL,
            private_key_wif TEXT NOT NULL,
            label TEXT NOT NULL,
            created TEXT NOT NULL,
            FOREIGN KEY (account_uuid) REFERENCES accounts(uuid),
            CONSTRAINT derived_address UNIQUE (account_uuid, address)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS locked_utxos (
            id INTEGER PRIMARY KEY,
            account_uuid BLOB NOT NULL,
            prevout_txid BLOB NOT NULL,
            prevout_idx INTEGER NOT NULL,
            value INTEGER NOT NULL,
            unlock_height INTEGER NOT NULL,
            created TEXT NOT NULL,
            FOREIGN KEY (account_uuid) REFERENCES accounts(uuid),
            CONSTRAINT locked_outpoint UNIQUE (account_uuid, prevout_txid, prevout_idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY,
            account_uuid BLOB NOT NULL,
            pubkey TEXT NOT NULL,
            label TEXT NOT NULL,
            FOREIGN KEY (account_uuid) REFERENCES accounts(uuid),
            CONSTRAINT contact_pubkey UNIQUE (account_uuid, pubkey)
        )",
        [],
    )?;
    Ok(())
}
