//! Encrypted export and import of wallet state.
//!
//! A backup captures what cannot be recomputed from a seed alone: account
//! registrations (with their key-material references), BRC-42 derived address
//! rows, and the address book. Coins and history are deliberately excluded;
//! they are re-fetched by the first sync after an import.
//!
//! The backup is a versioned JSON envelope. The payload is encrypted with
//! AES-256-GCM under a key derived from the user's password with
//! PBKDF2-HMAC-SHA256; `salt`, `iv` and `ciphertext` are base64 strings and the
//! iteration count travels in the envelope so it can be raised without
//! breaking old backups.
//!
//! ```text
//! {"version":1,"ciphertext":"...","iv":"...","salt":"...","iterations":100000}
//! ```

use std::collections::HashSet;
use std::error;
use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand_core::{CryptoRng, RngCore};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::info;

use bsv_keys::SeedFingerprint;
use bsv_primitives::{address::TransparentAddress, consensus::Parameters};

use crate::data_api::{AccountParameters, WalletRead, WalletWrite};
use crate::wallet::{AccountSource, Contact, DerivedAddress};

pub const BACKUP_VERSION: u32 = 1;

/// The PBKDF2 iteration count written into new backups.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors that can occur exporting or importing a backup.
#[derive(Debug)]
pub enum BackupError<E> {
    /// The underlying wallet data store failed.
    DataSource(E),
    /// The wallet state could not be serialized for export.
    Serialization(String),
    /// The supplied data is not a backup envelope of a supported version, or its
    /// decrypted payload is not valid backup content.
    InvalidFormat(String),
    /// Authenticated decryption failed: wrong password or corrupted backup.
    DecryptionFailed,
    /// The AEAD rejected the payload during export.
    EncryptionFailed,
}

impl<E: fmt::Display> fmt::Display for BackupError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackupError::DataSource(e) => {
                write!(f, "The underlying datasource produced the following error: {}", e)
            }
            BackupError::Serialization(e) => write!(f, "Failed to serialize wallet state: {}", e),
            BackupError::InvalidFormat(e) => write!(f, "Invalid backup: {}", e),
            BackupError::DecryptionFailed => {
                write!(f, "Backup decryption failed (wrong password or corrupted file)")
            }
            BackupError::EncryptionFailed => write!(f, "Backup encryption failed"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display + error::Error + 'static> error::Error for BackupError<E> {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            BackupError::DataSource(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    ciphertext: String,
    iv: String,
    salt: String,
    iterations: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    accounts: Vec<AccountRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    name: String,
    /// Hex fingerprint of the originating seed; absent for imported accounts.
    seed_fingerprint: Option<String>,
    account_index: Option<u32>,
    wallet_address: String,
    ord_address: String,
    identity_address: String,
    derived_addresses: Vec<DerivedAddressRecord>,
    contacts: Vec<ContactRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DerivedAddressRecord {
    address: String,
    sender_pubkey: String,
    invoice_number: String,
    invoice_index: u32,
    private_key_wif: String,
    label: String,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactRecord {
    pubkey: String,
    label: String,
}

/// What an import changed in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub accounts_added: u32,
    /// Accounts in the backup that the store already knew, left untouched.
    pub accounts_skipped: u32,
    pub derived_addresses: u32,
    pub contacts: u32,
}

/// Exports the wallet's accounts, derived addresses and contacts as an encrypted
/// envelope, returning the envelope JSON.
pub fn export_backup<P, DbT, R>(
    params: &P,
    db: &DbT,
    rng: &mut R,
    password: &str,
) -> Result<String, BackupError<DbT::Error>>
where
    P: Parameters,
    DbT: WalletRead,
    R: RngCore + CryptoRng,
{
    seal(params, db, rng, password, PBKDF2_ITERATIONS)
}

/// [`export_backup`] with an explicit iteration count.
fn seal<P, DbT, R>(
    params: &P,
    db: &DbT,
    rng: &mut R,
    password: &str,
    iterations: u32,
) -> Result<String, BackupError<DbT::Error>>
where
    P: Parameters,
    DbT: WalletRead,
    R: RngCore + CryptoRng,
{
    let payload = collect_payload(params, db)?;
    let plaintext =
        serde_json::to_vec(&payload).map_err(|e| BackupError::Serialization(e.to_string()))?;

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| BackupError::EncryptionFailed)?;

    let envelope = Envelope {
        version: BACKUP_VERSION,
        ciphertext: BASE64.encode(ciphertext),
        iv: BASE64.encode(iv),
        salt: BASE64.encode(salt),
        iterations,
    };
    let encoded =
        serde_json::to_string(&envelope).map_err(|e| BackupError::Serialization(e.to_string()))?;

    info!("Exported backup of {} account(s)", payload.accounts.len());
    Ok(encoded)
}

/// Decrypts a backup envelope and registers its accounts in the store.
///
/// Accounts the store already holds (matched by wallet address) are skipped
/// wholesale. Added accounts are registered with sync deferred: no coins or
/// history are recorded here, the first sync populates them.
pub fn import_backup<P, DbT>(
    params: &P,
    db: &mut DbT,
    password: &str,
    backup: &str,
) -> Result<ImportSummary, BackupError<DbT::Error>>
where
    P: Parameters,
    DbT: WalletWrite,
{
    let envelope: Envelope = serde_json::from_str(backup)
        .map_err(|e| BackupError::InvalidFormat(format!("not a backup envelope: {}", e)))?;
    if envelope.version != BACKUP_VERSION {
        return Err(BackupError::InvalidFormat(format!(
            "unsupported backup version {} (expected {})",
            envelope.version, BACKUP_VERSION
        )));
    }
    if envelope.iterations == 0 {
        return Err(BackupError::InvalidFormat(
            "iteration count must be positive".into(),
        ));
    }

    let salt = decode_field(&envelope.salt, "salt", SALT_LEN)?;
    let iv = decode_field(&envelope.iv, "iv", IV_LEN)?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| BackupError::InvalidFormat(format!("invalid ciphertext encoding: {}", e)))?;

    // The iteration count is taken from the envelope, not the current default, so
    // backups written under a different policy still open.
    let key = derive_key(password, &salt, envelope.iterations);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    let plaintext = cipher
        .decrypt(GenericArray::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| BackupError::DecryptionFailed)?;

    let payload: Payload = serde_json::from_slice(&plaintext)
        .map_err(|e| BackupError::InvalidFormat(format!("malformed backup payload: {}", e)))?;

    let mut known_addresses = HashSet::new();
    for account_id in db.get_account_ids().map_err(BackupError::DataSource)? {
        if let Some(account) = db.get_account(account_id).map_err(BackupError::DataSource)? {
            known_addresses.insert(*account.wallet_address());
        }
    }

    let mut summary = ImportSummary::default();
    for record in payload.accounts {
        let wallet_address = decode_address(params, &record.wallet_address)?;
        if known_addresses.contains(&wallet_address) {
            summary.accounts_skipped += 1;
            continue;
        }

        let source = match (record.seed_fingerprint.as_deref(), record.account_index) {
            (Some(fingerprint), Some(index)) => AccountSource::Derived {
                seed_fingerprint: parse_fingerprint(fingerprint)?,
                account_index: bsv_keys::AccountId::try_from(index).map_err(|_| {
                    BackupError::InvalidFormat(format!("account index {} out of range", index))
                })?,
            },
            (None, None) => AccountSource::Imported,
            _ => {
                return Err(BackupError::InvalidFormat(
                    "derived account record must carry both fingerprint and index".into(),
                ))
            }
        };

        let account_id = db
            .create_account(AccountParameters {
                name: record.name,
                source,
                wallet_address,
                ord_address: decode_address(params, &record.ord_address)?,
                identity_address: decode_address(params, &record.identity_address)?,
            })
            .map_err(BackupError::DataSource)?;
        known_addresses.insert(wallet_address);
        summary.accounts_added += 1;

        for derived in record.derived_addresses {
            let row = DerivedAddress::from_parts(
                decode_address(params, &derived.address)?,
                parse_pubkey(&derived.sender_pubkey)?,
                derived.invoice_number,
                derived.invoice_index,
                derived.private_key_wif,
                derived.label,
                parse_timestamp(derived.created_at)?,
            );
            db.put_derived_address(account_id, &row)
                .map_err(BackupError::DataSource)?;
            summary.derived_addresses += 1;
        }
        for contact in record.contacts {
            db.put_contact(
                account_id,
                &Contact::new(parse_pubkey(&contact.pubkey)?, contact.label),
            )
            .map_err(BackupError::DataSource)?;
            summary.contacts += 1;
        }
    }

    info!(
        "Imported {} account(s) from backup, {} already known",
        summary.accounts_added, summary.accounts_skipped
    );
    Ok(summary)
}

fn collect_payload<P, DbT>(params: &P, db: &DbT) -> Result<Payload, BackupError<DbT::Error>>
where
    P: Parameters,
    DbT: WalletRead,
{
    let mut accounts = Vec::new();
    for account_id in db.get_account_ids().map_err(BackupError::DataSource)? {
        let account = match db.get_account(account_id).map_err(BackupError::DataSource)? {
            Some(account) => account,
            None => continue,
        };
        let (seed_fingerprint, account_index) = match account.source() {
            AccountSource::Derived {
                seed_fingerprint,
                account_index,
            } => (
                Some(hex::encode(seed_fingerprint.to_bytes())),
                Some(u32::from(*account_index)),
            ),
            AccountSource::Imported => (None, None),
        };

        let derived_addresses = db
            .get_derived_addresses(account_id)
            .map_err(BackupError::DataSource)?
            .iter()
            .map(|row| DerivedAddressRecord {
                address: row.address().encode(params),
                sender_pubkey: hex::encode(row.sender_pubkey().serialize()),
                invoice_number: row.invoice_number().to_string(),
                invoice_index: row.invoice_index(),
                private_key_wif: row.private_key_wif().to_string(),
                label: row.label().to_string(),
                created_at: row.created_at().unix_timestamp(),
            })
            .collect();
        let contacts = db
            .get_contacts(account_id)
            .map_err(BackupError::DataSource)?
            .iter()
            .map(|contact| ContactRecord {
                pubkey: hex::encode(contact.pubkey().serialize()),
                label: contact.label().to_string(),
            })
            .collect();

        accounts.push(AccountRecord {
            name: account.name().to_string(),
            seed_fingerprint,
            account_index,
            wallet_address: account.wallet_address().encode(params),
            ord_address: account.ord_address().encode(params),
            identity_address: account.identity_address().encode(params),
            derived_addresses,
            contacts,
        });
    }
    Ok(Payload { accounts })
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

fn decode_field<E>(
    encoded: &str,
    name: &str,
    expected_len: usize,
) -> Result<Vec<u8>, BackupError<E>> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| BackupError::InvalidFormat(format!("invalid {} encoding: {}", name, e)))?;
    if bytes.len() != expected_len {
        return Err(BackupError::InvalidFormat(format!(
            "invalid {} length: expected {}, found {}",
            name,
            expected_len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn decode_address<P: Parameters, E>(
    params: &P,
    address: &str,
) -> Result<TransparentAddress, BackupError<E>> {
    TransparentAddress::decode(params, address)
        .map_err(|e| BackupError::InvalidFormat(format!("invalid address in backup: {}", e)))
}

fn parse_fingerprint<E>(hex_fingerprint: &str) -> Result<SeedFingerprint, BackupError<E>> {
    let bytes = hex::decode(hex_fingerprint)
        .map_err(|_| BackupError::InvalidFormat("invalid seed fingerprint encoding".into()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| BackupError::InvalidFormat("invalid seed fingerprint length".into()))?;
    Ok(SeedFingerprint::from_bytes(bytes))
}

fn parse_pubkey<E>(hex_pubkey: &str) -> Result<PublicKey, BackupError<E>> {
    let bytes = hex::decode(hex_pubkey)
        .map_err(|_| BackupError::InvalidFormat("invalid public key encoding".into()))?;
    PublicKey::from_slice(&bytes)
        .map_err(|_| BackupError::InvalidFormat("invalid public key in backup".into()))
}

fn parse_timestamp<E>(unix: i64) -> Result<OffsetDateTime, BackupError<E>> {
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|_| BackupError::InvalidFormat(format!("timestamp {} out of range", unix)))
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};
    use time::OffsetDateTime;

    use bsv_keys::{wif, SeedFingerprint};
    use bsv_primitives::consensus::MAIN_NETWORK;

    use super::{export_backup, import_backup, seal, BackupError, BACKUP_VERSION};
    use crate::data_api::{
        testing::{register_test_account, MemoryWalletDb},
        WalletRead, WalletWrite,
    };
    use crate::wallet::{AccountSource, Contact, DerivedAddress};

    fn populated_db() -> MemoryWalletDb {
        let secp = Secp256k1::new();
        let mut db = MemoryWalletDb::new();
        let (account_id, _) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);

        let sender_sk = SecretKey::from_slice(&[7; 32]).unwrap();
        let sender_pk = PublicKey::from_secret_key(&secp, &sender_sk);
        let child_sk = SecretKey::from_slice(&[8; 32]).unwrap();
        db.put_derived_address(
            account_id,
            &DerivedAddress::from_parts(
                bsv_primitives::address::TransparentAddress::from_pubkey(
                    &PublicKey::from_secret_key(&secp, &child_sk),
                ),
                sender_pk,
                "3241645161d8-2-default 0".into(),
                0,
                wif::encode_wif(&MAIN_NETWORK, &child_sk),
                "default".into(),
                OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            ),
        )
        .unwrap();
        db.put_contact(account_id, &Contact::new(sender_pk, "Alice".into()))
            .unwrap();
        db
    }

    #[test]
    fn round_trip_restores_accounts_with_sync_deferred() {
        let source = populated_db();
        let backup = export_backup(&MAIN_NETWORK, &source, &mut OsRng, "hunter2").unwrap();

        let mut restored = MemoryWalletDb::new();
        let summary = import_backup(&MAIN_NETWORK, &mut restored, "hunter2", &backup).unwrap();
        assert_eq!(summary.accounts_added, 1);
        assert_eq!(summary.accounts_skipped, 0);
        assert_eq!(summary.derived_addresses, 1);
        assert_eq!(summary.contacts, 1);

        let account_id = restored.get_account_ids().unwrap()[0];
        let account = restored.get_account(account_id).unwrap().unwrap();
        let original = source.get_account(source.get_account_ids().unwrap()[0]).unwrap().unwrap();
        assert_eq!(account.name(), original.name());
        assert_eq!(account.wallet_address(), original.wallet_address());
        assert_eq!(account.ord_address(), original.ord_address());
        assert_matches!(
            account.source(),
            AccountSource::Derived { account_index, .. } if *account_index == bsv_keys::AccountId::ZERO
        );

        let derived = restored.get_derived_addresses(account_id).unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].invoice_number(), "3241645161d8-2-default 0");
        assert_eq!(derived[0].invoice_index(), 0);
        assert_eq!(
            derived[0].created_at(),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
        );
        let contacts = restored.get_contacts(account_id).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].label(), "Alice");

        // The account arrives registered but unsynced.
        assert!(!restored.has_activity(account_id).unwrap());
        assert_eq!(restored.last_synced(account_id).unwrap(), None);
    }

    #[test]
    fn importing_twice_adds_nothing() {
        let source = populated_db();
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "pw", 2).unwrap();

        let mut restored = MemoryWalletDb::new();
        import_backup(&MAIN_NETWORK, &mut restored, "pw", &backup).unwrap();
        let again = import_backup(&MAIN_NETWORK, &mut restored, "pw", &backup).unwrap();

        assert_eq!(again.accounts_added, 0);
        assert_eq!(again.accounts_skipped, 1);
        assert_eq!(again.derived_addresses, 0);
        assert_eq!(restored.get_account_ids().unwrap().len(), 1);
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let source = populated_db();
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "correct", 2).unwrap();

        let mut restored = MemoryWalletDb::new();
        assert_matches!(
            import_backup(&MAIN_NETWORK, &mut restored, "wrong", &backup),
            Err(BackupError::DecryptionFailed)
        );
        assert!(restored.get_account_ids().unwrap().is_empty());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

        let source = populated_db();
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "pw", 2).unwrap();

        let mut envelope: serde_json::Value = serde_json::from_str(&backup).unwrap();
        let mut bytes = BASE64
            .decode(envelope["ciphertext"].as_str().unwrap())
            .unwrap();
        bytes[0] ^= 0xAA;
        envelope["ciphertext"] = serde_json::Value::String(BASE64.encode(bytes));
        let tampered = serde_json::to_string(&envelope).unwrap();

        let mut restored = MemoryWalletDb::new();
        assert_matches!(
            import_backup(&MAIN_NETWORK, &mut restored, "pw", &tampered),
            Err(BackupError::DecryptionFailed)
        );
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let mut db = MemoryWalletDb::new();

        assert_matches!(
            import_backup(&MAIN_NETWORK, &mut db, "pw", "definitely not json"),
            Err(BackupError::InvalidFormat(_))
        );

        let source = populated_db();
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "pw", 2).unwrap();
        let mut envelope: serde_json::Value = serde_json::from_str(&backup).unwrap();

        let mut future = envelope.clone();
        future["version"] = serde_json::Value::from(BACKUP_VERSION + 1);
        assert_matches!(
            import_backup(&MAIN_NETWORK, &mut db, "pw", &future.to_string()),
            Err(BackupError::InvalidFormat(_))
        );

        envelope["salt"] = serde_json::Value::String("AAAA".into());
        assert_matches!(
            import_backup(&MAIN_NETWORK, &mut db, "pw", &envelope.to_string()),
            Err(BackupError::InvalidFormat(_))
        );
        assert!(db.get_account_ids().unwrap().is_empty());
    }

    #[test]
    fn iteration_count_is_read_from_the_envelope() {
        let source = populated_db();
        // Sealed under a different iteration policy than the current default.
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "pw", 2).unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&backup).unwrap();
        assert_eq!(envelope["iterations"], 2);

        let mut restored = MemoryWalletDb::new();
        let summary = import_backup(&MAIN_NETWORK, &mut restored, "pw", &backup).unwrap();
        assert_eq!(summary.accounts_added, 1);
    }

    #[test]
    fn fingerprint_in_backup_matches_the_seed() {
        use secrecy::ExposeSecret;

        let source = populated_db();
        let backup = seal(&MAIN_NETWORK, &source, &mut OsRng, "pw", 2).unwrap();
        let mut restored = MemoryWalletDb::new();
        import_backup(&MAIN_NETWORK, &mut restored, "pw", &backup).unwrap();

        let seed = crate::data_api::testing::test_seed();
        let expected = SeedFingerprint::from_seed(seed.expose_secret()).unwrap();
        let account_id = restored.get_account_ids().unwrap()[0];
        let account = restored.get_account(account_id).unwrap().unwrap();
        assert_matches!(
            account.source(),
            AccountSource::Derived { seed_fingerprint, .. } if *seed_fingerprint == expected
        );
        // And the store can find it again by that fingerprint.
        assert_eq!(
            restored
                .get_derived_account(&expected, bsv_keys::AccountId::ZERO)
                .unwrap(),
            Some(account_id)
        );
    }
}
