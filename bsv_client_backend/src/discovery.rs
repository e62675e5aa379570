//! Finding previously-used accounts after a wallet restore.
//!
//! A restored mnemonic tells us nothing about how many accounts its owner created,
//! so [`discover`] walks candidate account indices in order, probing the remote
//! ledger for any trace of use on each candidate's three role addresses, and stops
//! after [`GAP_LIMIT`] consecutive unused candidates. Found accounts are
//! registered with sync deferred; a background pass with
//! [`crate::sync::sync_remaining_accounts`] populates them afterwards.
//!
//! Running discovery twice is harmless: candidates already in the store are
//! treated as active for gap purposes but add nothing to the count.

use secrecy::{ExposeSecret, SecretVec};
use tracing::{debug, info};

use bsv_keys::{AccountId, AccountKeyBundle, DerivationError, SeedFingerprint};
use bsv_primitives::consensus::Parameters;

use crate::data_api::{error::Error, AccountParameters, WalletWrite};
use crate::remote::{RemoteError, RemoteLedger};

/// How many consecutive unused account indices end the search.
pub const GAP_LIMIT: u32 = 5;

/// Walks account indices derived from `seed`, registering every account the chain
/// has seen before, and returns how many were newly registered.
///
/// The seed comes from the restored mnemonic and passphrase via
/// [`bsv_keys::mnemonic::seed_with_passphrase`]. Remote failures surface to the
/// caller: discovery runs in the foreground of a restore, where a silent partial
/// answer would read as "those accounts never existed".
pub async fn discover<P, DbT, RlT>(
    params: &P,
    db: &mut DbT,
    remote: &RlT,
    seed: &SecretVec<u8>,
) -> Result<u32, Error<DbT::Error, RemoteError>>
where
    P: Parameters,
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    let fingerprint = SeedFingerprint::from_seed(seed.expose_secret())
        .ok_or(Error::KeyDerivation(DerivationError::InvalidKeyMaterial))?;

    let mut found = 0;
    let mut gap = 0;
    let mut index = AccountId::ZERO;
    while gap < GAP_LIMIT {
        let keys = AccountKeyBundle::from_seed(params, seed, index)?;

        if db
            .get_derived_account(&fingerprint, index)
            .map_err(Error::DataSource)?
            .is_some()
        {
            // An occupied index (including the account the restore itself created)
            // resets the gap without being re-registered or counted.
            debug!("Account index {} is already registered", index);
            gap = 0;
        } else if probe_activity(remote, &keys).await.map_err(Error::Remote)? {
            info!("Discovered a used account at index {}", index);
            db.create_account(AccountParameters::derived(
                format!("Account {}", u32::from(index) + 1),
                fingerprint,
                &keys,
            ))
            .map_err(Error::DataSource)?;
            found += 1;
            gap = 0;
        } else {
            gap += 1;
        }

        match index.next() {
            Some(next) => index = next,
            None => break,
        }
    }

    info!("Account discovery finished: {} newly registered", found);
    Ok(found)
}

/// Whether any of the candidate's three role addresses has ever appeared on chain.
///
/// History is the authoritative trace: a once-used, now-empty address still has
/// history, while balance alone would miss it.
async fn probe_activity<RlT: RemoteLedger>(
    remote: &RlT,
    keys: &AccountKeyBundle,
) -> Result<bool, RemoteError> {
    for key in [keys.payment(), keys.ordinals(), keys.identity()] {
        if !remote.get_history(&key.address()).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use bsv_primitives::{
        consensus::{BlockHeight, MAIN_NETWORK},
        transaction::TxId,
    };

    use super::{discover, GAP_LIMIT};
    use crate::data_api::{
        error::Error,
        testing::{register_test_account, test_seed, MemoryWalletDb, MockRemoteLedger},
        WalletRead,
    };
    use crate::remote::{HistoryEntry, RemoteError};

    fn mark_used(remote: &MockRemoteLedger, index: u32, tx_byte: u8) -> bsv_keys::AccountKeyBundle {
        let account = bsv_keys::AccountId::try_from(index).unwrap();
        let keys =
            bsv_keys::AccountKeyBundle::from_seed(&MAIN_NETWORK, &test_seed(), account).unwrap();
        remote.set_history(
            &keys.payment().address(),
            vec![HistoryEntry {
                txid: TxId::from_bytes([tx_byte; 32]),
                height: Some(BlockHeight::from_u32(880_000)),
            }],
        );
        keys
    }

    #[tokio::test]
    async fn finds_the_unregistered_used_account() {
        let mut db = MemoryWalletDb::new();
        // The restore itself created the account at index 0.
        let (known_id, _) =
            register_test_account(&MAIN_NETWORK, &mut db, bsv_keys::AccountId::ZERO);
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        mark_used(&remote, 0, 1);
        let index2_keys = mark_used(&remote, 2, 2);

        let found = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed())
            .await
            .unwrap();

        // Index 0 was already known, index 1 is unused, index 2 is new.
        assert_eq!(found, 1);
        let ids = db.get_account_ids().unwrap();
        assert_eq!(ids.len(), 2);
        let new_id = *ids.iter().find(|id| **id != known_id).unwrap();
        let account = db.get_account(new_id).unwrap().unwrap();
        assert_eq!(account.name(), "Account 3");
        assert_eq!(account.wallet_address(), &index2_keys.payment().address());
        // The account is registered but not yet synced.
        assert!(db.get_unspent_utxos(new_id).unwrap().is_empty());
        assert!(db.last_synced(new_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn a_hit_restarts_the_gap_countdown() {
        let mut db = MemoryWalletDb::new();
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        for index in 0..3 {
            mark_used(&remote, index, index as u8 + 1);
        }

        let found = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed())
            .await
            .unwrap();

        assert_eq!(found, 3);
        assert_eq!(db.get_account_ids().unwrap().len(), 3);
        let names: Vec<String> = db
            .get_account_ids()
            .unwrap()
            .into_iter()
            .map(|id| db.get_account(id).unwrap().unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["Account 1", "Account 2", "Account 3"]);
    }

    #[tokio::test]
    async fn an_unused_seed_probes_exactly_the_gap_limit() {
        let mut db = MemoryWalletDb::new();
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));

        let found = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed())
            .await
            .unwrap();

        assert_eq!(found, 0);
        assert!(db.get_account_ids().unwrap().is_empty());
        // Three address probes per candidate, gap-limit candidates.
        assert_eq!(remote.query_count(), GAP_LIMIT * 3);
    }

    #[tokio::test]
    async fn rerunning_discovery_finds_nothing_new() {
        let mut db = MemoryWalletDb::new();
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        mark_used(&remote, 0, 1);
        mark_used(&remote, 1, 2);

        let first = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed())
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed())
            .await
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(db.get_account_ids().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remote_failure_surfaces_and_registers_nothing() {
        let mut db = MemoryWalletDb::new();
        let remote = MockRemoteLedger::new(BlockHeight::from_u32(882_000));
        remote.fail_always(RemoteError::Unavailable("indexer down".into()));

        let result = discover(&MAIN_NETWORK, &mut db, &remote, &test_seed()).await;

        assert_matches!(result, Err(Error::Remote(RemoteError::Unavailable(_))));
        assert!(db.get_account_ids().unwrap().is_empty());
    }
}
