//! Access to the remote ledger that backs wallet synchronization.
//!
//! The wallet holds no chain state of its own beyond what its data store caches; all
//! knowledge of balances, coins and confirmations comes from a remote chain indexer
//! queried through the [`RemoteLedger`] trait. [`http`] provides the production
//! implementation; the scripted ledger in [`crate::data_api::testing`] stands in for
//! it in tests.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use bsv_primitives::{
    address::TransparentAddress,
    consensus::BlockHeight,
    transaction::{OutPoint, TxId},
    value::{BalanceError, SatBalance, Satoshis},
};

pub mod http;

/// The default number of times a transient query failure is retried before being
/// reported.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// The longest pause between retries of a transient failure.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors produced by a remote ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote ledger could not be reached, or answered with a server error.
    Unavailable(String),
    /// The remote ledger is shedding load; the same request may succeed later.
    RateLimited,
    /// A response arrived but could not be interpreted.
    UnexpectedResponse(String),
    /// The remote ledger refused a broadcast transaction.
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying the same request later could reasonably succeed.
    ///
    /// Malformed responses and broadcast rejections are deterministic and excluded.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::RateLimited)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Unavailable(msg) => write!(f, "Remote ledger unavailable: {}", msg),
            RemoteError::RateLimited => write!(f, "Remote ledger is rate limiting requests"),
            RemoteError::UnexpectedResponse(msg) => {
                write!(f, "Unexpected response from remote ledger: {}", msg)
            }
            RemoteError::Rejected(msg) => {
                write!(f, "Transaction rejected by the network: {}", msg)
            }
        }
    }
}

impl std::error::Error for RemoteError {}

/// A coin as reported by the remote ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteUtxo {
    pub outpoint: OutPoint,
    pub value: Satoshis,
    /// The height of the block containing the funding transaction; `None` while it
    /// is unconfirmed.
    pub height: Option<BlockHeight>,
}

/// One entry of an address's transaction history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub txid: TxId,
    /// `None` while the transaction is unconfirmed.
    pub height: Option<BlockHeight>,
}

/// One side of a transaction, as resolved by the remote ledger.
///
/// `address` is `None` where the indexer cannot attribute the value to a P2PKH
/// address (coinbase inputs, bare scripts, OP_RETURN outputs, time locks).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxParticipant {
    pub address: Option<String>,
    pub value: Satoshis,
}

/// Full detail of a transaction, sufficient to compute its net effect on a set of
/// addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxDetail {
    pub txid: TxId,
    pub height: Option<BlockHeight>,
    pub inputs: Vec<TxParticipant>,
    pub outputs: Vec<TxParticipant>,
}

impl TxDetail {
    /// Computes the signed net effect of this transaction on the addresses for which
    /// `is_mine` returns true: value received minus value spent.
    pub fn net_amount(&self, is_mine: impl Fn(&str) -> bool) -> Result<SatBalance, BalanceError> {
        let mine = |p: &TxParticipant| p.address.as_deref().is_some_and(&is_mine);

        let received: i64 = self
            .outputs
            .iter()
            .filter(|p| mine(p))
            .map(|p| p.value.into_u64() as i64)
            .sum();
        let spent: i64 = self
            .inputs
            .iter()
            .filter(|p| mine(p))
            .map(|p| p.value.into_u64() as i64)
            .sum();

        SatBalance::from_i64(received - spent)
    }
}

/// The queries a wallet makes of a chain indexer.
///
/// Implementations answer from whatever source they like (HTTP indexer, scripted
/// fixture); callers must treat every answer as a snapshot that may already be
/// stale.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Returns the total balance (confirmed plus pending) of a single address.
    async fn get_balance(&self, address: &TransparentAddress) -> Result<Satoshis, RemoteError>;

    /// Returns the unspent coins currently held by an address.
    async fn get_utxos(&self, address: &TransparentAddress)
        -> Result<Vec<RemoteUtxo>, RemoteError>;

    /// Returns the transaction history of an address, identifiers and heights only.
    async fn get_history(
        &self,
        address: &TransparentAddress,
    ) -> Result<Vec<HistoryEntry>, RemoteError>;

    /// Returns the full detail of a transaction, with input values resolved.
    async fn get_transaction(&self, txid: &TxId) -> Result<TxDetail, RemoteError>;

    /// Submits a raw transaction to the network and returns its id.
    ///
    /// Broadcasts are never retried by this crate: a timed-out broadcast may have
    /// been accepted, and resubmitting double-spends against ourselves.
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<TxId, RemoteError>;

    /// Returns the current chain tip height.
    async fn chain_height(&self) -> Result<BlockHeight, RemoteError>;
}

/// The pause before retry number `attempt` (counted from zero): exponential doubling
/// from one second, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Runs `f` until it succeeds or `retry_limit` retries are exhausted, sleeping
/// [`backoff_delay`] between attempts.
///
/// `retry` decides which errors are worth another attempt; pass `|_| false` for
/// operations that must not be repeated (such as broadcasts).
pub async fn with_retries<T, E, F, Fut>(
    description: &str,
    retry_limit: u32,
    retry: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retry_limit && retry(&e) => {
                let delay = backoff_delay(attempt);
                warn!(
                    "{} failed (attempt {}): {}; retrying in {:?}",
                    description,
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
