//! Health probes for a wallet that cannot sync.
//!
//! When a refresh fails repeatedly, "is the indexer down, is the local store
//! broken, or is this address genuinely empty" are different problems with
//! different remedies. [`run_diagnostics`] answers by exercising each layer
//! separately and reporting every result: probes run to completion even when an
//! earlier one fails, so one outage does not hide a second.

use std::fmt;

use tracing::info;

use bsv_primitives::{consensus::BlockHeight, value::Satoshis};

use crate::data_api::WalletRead;
use crate::remote::RemoteLedger;

/// The outcome of every diagnostic probe, with failures rendered as messages the
/// caller can display verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticsReport {
    /// The chain tip height, if the remote ledger answered at all.
    pub connectivity: Result<BlockHeight, String>,
    /// Whether the local store answered a trivial read.
    pub store: Result<(), String>,
    /// The balance the remote reports for the account's payment address.
    pub balance: Result<Satoshis, String>,
    /// The number of history entries the remote reports for that address.
    pub history: Result<usize, String>,
}

impl DiagnosticsReport {
    /// Whether every probe passed.
    pub fn healthy(&self) -> bool {
        self.connectivity.is_ok() && self.store.is_ok() && self.balance.is_ok() && self.history.is_ok()
    }
}

/// Probes remote connectivity, store reachability, and the health of the two
/// queries a sync depends on most, for the given account.
///
/// This never fails as a whole; each probe's failure is captured in the report.
pub async fn run_diagnostics<DbT, RlT>(
    db: &DbT,
    remote: &RlT,
    account_id: DbT::AccountId,
) -> DiagnosticsReport
where
    DbT: WalletRead,
    DbT::Error: fmt::Display,
    RlT: RemoteLedger,
{
    let connectivity = remote.chain_height().await.map_err(|e| e.to_string());

    let store = db.get_account_ids().map(|_| ()).map_err(|e| e.to_string());
    let address = match db.get_account(account_id) {
        Ok(Some(account)) => Ok(*account.wallet_address()),
        Ok(None) => Err("account is not present in the store".to_string()),
        Err(e) => Err(e.to_string()),
    };

    let (balance, history) = match &address {
        Ok(address) => (
            remote.get_balance(address).await.map_err(|e| e.to_string()),
            remote
                .get_history(address)
                .await
                .map(|entries| entries.len())
                .map_err(|e| e.to_string()),
        ),
        // Without an address there is nothing to query; report why.
        Err(e) => (Err(e.clone()), Err(e.clone())),
    };

    let report = DiagnosticsReport {
        connectivity,
        store,
        balance,
        history,
    };
    let state = |ok: bool| if ok { "ok" } else { "failed" };
    info!(
        "Diagnostics: connectivity {}, store {}, balance {}, history {}",
        state(report.connectivity.is_ok()),
        state(report.store.is_ok()),
        state(report.balance.is_ok()),
        state(report.history.is_ok()),
    );
    report
}
