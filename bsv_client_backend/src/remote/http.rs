//! An HTTP [`RemoteLedger`] backed by a WhatsOnChain-compatible chain indexer.

use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Buf, Bytes},
    client::conn,
    http::uri::Scheme,
    Request, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_rustls::{
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};
use tracing::{debug, error};

use bsv_primitives::{
    address::TransparentAddress,
    consensus::{BlockHeight, Network, Parameters, MAIN_NETWORK, TEST_NETWORK},
    transaction::TxId,
    value::{Satoshis, COIN},
};

use super::{
    with_retries, HistoryEntry, RemoteError, RemoteLedger, RemoteUtxo, TxDetail, TxParticipant,
    DEFAULT_RETRY_LIMIT,
};

/// The WhatsOnChain API root for the production network.
pub const MAINNET_BASE_URL: &str = "https://api.whatsonchain.com/v1/bsv/main";

/// The WhatsOnChain API root for the test network.
pub const TESTNET_BASE_URL: &str = "https://api.whatsonchain.com/v1/bsv/test";

/// A [`RemoteLedger`] that queries a WhatsOnChain-compatible HTTP indexer.
///
/// Queries that fail transiently (connection failures, HTTP 5xx, HTTP 429) are
/// retried with exponential backoff up to the configured retry limit. Broadcasts are
/// the exception and are submitted exactly once.
pub struct HttpRemoteLedger<P> {
    params: P,
    base_url: String,
    retry_limit: u32,
}

impl HttpRemoteLedger<Network> {
    /// A client for the production network, using the public WhatsOnChain endpoint.
    pub fn mainnet() -> Self {
        HttpRemoteLedger::new(MAIN_NETWORK, MAINNET_BASE_URL, DEFAULT_RETRY_LIMIT)
    }

    /// A client for the test network, using the public WhatsOnChain endpoint.
    pub fn testnet() -> Self {
        HttpRemoteLedger::new(TEST_NETWORK, TESTNET_BASE_URL, DEFAULT_RETRY_LIMIT)
    }
}

impl<P: Parameters> HttpRemoteLedger<P> {
    /// Constructs a client against an arbitrary WhatsOnChain-compatible API root,
    /// e.g. a self-hosted indexer.
    pub fn new(params: P, base_url: impl Into<String>, retry_limit: u32) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpRemoteLedger {
            params,
            base_url,
            retry_limit,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Makes a GET request with retries, parsing the response as JSON.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = self.url(path);
        with_retries(path, self.retry_limit, RemoteError::is_transient, || async {
            let (status, body) = one_request(&url, None).await?;
            classify_status(status)?;
            serde_json::from_reader(body.reader())
                .map_err(|e| RemoteError::UnexpectedResponse(format!("invalid JSON: {}", e)))
        })
        .await
    }
}

#[async_trait]
impl<P: Parameters + Send + Sync> RemoteLedger for HttpRemoteLedger<P> {
    async fn get_balance(&self, address: &TransparentAddress) -> Result<Satoshis, RemoteError> {
        let addr = address.encode(&self.params);
        let balance: WocBalance = self
            .get_json(&format!("/address/{}/balance", addr))
            .await?;
        // A net-negative pending balance still leaves nothing spendable.
        let total = (balance.confirmed + balance.unconfirmed).max(0);
        Satoshis::from_nonnegative_i64(total)
            .map_err(|_| RemoteError::UnexpectedResponse(format!("balance out of range: {}", total)))
    }

    async fn get_utxos(&self, address: &TransparentAddress) -> Result<Vec<RemoteUtxo>, RemoteError> {
        let addr = address.encode(&self.params);
        let utxos: Vec<WocUtxo> = self
            .get_json(&format!("/address/{}/unspent", addr))
            .await?;
        utxos.into_iter().map(WocUtxo::into_remote).collect()
    }

    async fn get_history(
        &self,
        address: &TransparentAddress,
    ) -> Result<Vec<HistoryEntry>, RemoteError> {
        let addr = address.encode(&self.params);
        let entries: Vec<WocHistoryEntry> = self
            .get_json(&format!("/address/{}/history", addr))
            .await?;
        entries
            .into_iter()
            .map(|entry| {
                Ok(HistoryEntry {
                    txid: parse_txid(&entry.tx_hash)?,
                    height: confirmed_height(entry.height),
                })
            })
            .collect()
    }

    async fn get_transaction(&self, txid: &TxId) -> Result<TxDetail, RemoteError> {
        let tx: WocTx = self.get_json(&format!("/tx/hash/{}", txid)).await?;

        let mut inputs = Vec::with_capacity(tx.vin.len());
        for vin in &tx.vin {
            inputs.push(match (&vin.txid, vin.vout) {
                (Some(prev_txid), Some(prev_n)) => {
                    // The indexer reports inputs by reference only; resolve the
                    // address and value from the funding transaction.
                    let prev: WocTx = self.get_json(&format!("/tx/hash/{}", prev_txid)).await?;
                    let prev_out = prev.vout.get(prev_n as usize).ok_or_else(|| {
                        RemoteError::UnexpectedResponse(format!(
                            "input references {}:{} but the transaction has {} outputs",
                            prev_txid,
                            prev_n,
                            prev.vout.len()
                        ))
                    })?;
                    prev_out.to_participant()?
                }
                // Coinbase inputs spend nothing.
                _ => TxParticipant {
                    address: None,
                    value: Satoshis::ZERO,
                },
            });
        }

        let outputs = tx
            .vout
            .iter()
            .map(WocVout::to_participant)
            .collect::<Result<_, _>>()?;

        Ok(TxDetail {
            txid: parse_txid(&tx.txid)?,
            height: tx.blockheight.and_then(confirmed_height),
            inputs,
            outputs,
        })
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<TxId, RemoteError> {
        let body = serde_json::json!({ "txhex": hex::encode(raw_tx) }).to_string();
        let (status, response) = one_request(&self.url("/tx/raw"), Some(body.into())).await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::RateLimited);
        }
        if status.is_server_error() {
            return Err(RemoteError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected(
                String::from_utf8_lossy(&response).trim().to_string(),
            ));
        }

        let txid: String = serde_json::from_reader(response.reader())
            .map_err(|e| RemoteError::UnexpectedResponse(format!("invalid JSON: {}", e)))?;
        parse_txid(txid.trim())
    }

    async fn chain_height(&self) -> Result<BlockHeight, RemoteError> {
        let info: WocChainInfo = self.get_json("/chain/info").await?;
        Ok(BlockHeight::from_u32(info.blocks))
    }
}

/// Performs a single HTTP request: GET when `body` is `None`, otherwise a JSON POST.
async fn one_request(url: &str, body: Option<Bytes>) -> Result<(StatusCode, Bytes), RemoteError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| RemoteError::UnexpectedResponse(format!("invalid URL {}: {}", url, e)))?;
    let (is_https, host, port) = parse_url(&uri)?;

    debug!("Connecting to {}:{}", host, port);
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

    let response = if is_https {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let dnsname = ServerName::try_from(host.clone())
            .map_err(|e| RemoteError::Unavailable(format!("invalid server name: {}", e)))?;
        let stream = connector
            .connect(dnsname, stream)
            .await
            .map_err(|e| RemoteError::Unavailable(format!("TLS: {}", e)))?;
        send_request(stream, uri, &host, body).await?
    } else {
        send_request(stream, uri, &host, body).await?
    };

    Ok(response)
}

async fn send_request(
    stream: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    uri: Uri,
    host: &str,
    body: Option<Bytes>,
) -> Result<(StatusCode, Bytes), RemoteError> {
    let (mut sender, connection) = conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

    // Drive the HTTP state machine in the background for the lifetime of this
    // request.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Connection failed: {}", e);
        }
    });

    let builder = match &body {
        Some(_) => Request::post(uri).header(hyper::header::CONTENT_TYPE, "application/json"),
        None => Request::get(uri),
    };
    let request = builder
        .header(hyper::header::HOST, host)
        .header(hyper::header::ACCEPT, "application/json")
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| RemoteError::UnexpectedResponse(e.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
    let status = response.status();
    debug!("Response status code: {}", status);

    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

    Ok((status, collected.to_bytes()))
}

fn parse_url(url: &Uri) -> Result<(bool, String, u16), RemoteError> {
    let scheme = url
        .scheme()
        .ok_or_else(|| RemoteError::UnexpectedResponse("URL without scheme".into()))?;
    let is_https = scheme == &Scheme::HTTPS;

    let host = url
        .host()
        .ok_or_else(|| RemoteError::UnexpectedResponse("URL without host".into()))?
        .to_string();

    let port = match url.port_u16() {
        Some(port) => port,
        None if is_https => 443,
        None => 80,
    };

    Ok((is_https, host, port))
}

/// Maps HTTP status classes onto the remote error taxonomy; 2xx passes through.
fn classify_status(status: StatusCode) -> Result<(), RemoteError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(RemoteError::RateLimited)
    } else if status.is_server_error() {
        Err(RemoteError::Unavailable(format!("status {}", status)))
    } else if !status.is_success() {
        Err(RemoteError::UnexpectedResponse(format!("status {}", status)))
    } else {
        Ok(())
    }
}

fn parse_txid(s: &str) -> Result<TxId, RemoteError> {
    TxId::from_hex(s).map_err(|_| RemoteError::UnexpectedResponse(format!("invalid txid: {}", s)))
}

/// Unconfirmed entries are reported with heights of zero or below.
fn confirmed_height(height: i64) -> Option<BlockHeight> {
    u32::try_from(height)
        .ok()
        .filter(|h| *h > 0)
        .map(BlockHeight::from_u32)
}

/// Converts a decimal BSV amount (as used in transaction detail) to satoshis.
fn bsv_to_satoshis(value: f64) -> Result<Satoshis, RemoteError> {
    if !value.is_finite() || value < 0.0 {
        return Err(RemoteError::UnexpectedResponse(format!(
            "invalid output value: {}",
            value
        )));
    }
    let sats = (value * COIN as f64).round() as u64;
    Satoshis::from_u64(sats)
        .map_err(|_| RemoteError::UnexpectedResponse(format!("output value out of range: {}", value)))
}

#[derive(Deserialize)]
struct WocBalance {
    confirmed: i64,
    unconfirmed: i64,
}

#[derive(Deserialize)]
struct WocUtxo {
    height: i64,
    tx_pos: u32,
    tx_hash: String,
    value: u64,
}

impl WocUtxo {
    fn into_remote(self) -> Result<RemoteUtxo, RemoteError> {
        Ok(RemoteUtxo {
            outpoint: bsv_primitives::transaction::OutPoint::new(
                parse_txid(&self.tx_hash)?,
                self.tx_pos,
            ),
            value: Satoshis::from_u64(self.value).map_err(|_| {
                RemoteError::UnexpectedResponse(format!("utxo value out of range: {}", self.value))
            })?,
            height: confirmed_height(self.height),
        })
    }
}

#[derive(Deserialize)]
struct WocHistoryEntry {
    tx_hash: String,
    height: i64,
}

#[derive(Deserialize)]
struct WocTx {
    txid: String,
    blockheight: Option<i64>,
    vin: Vec<WocVin>,
    vout: Vec<WocVout>,
}

#[derive(Deserialize)]
struct WocVin {
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Deserialize)]
struct WocVout {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: WocScriptPubKey,
}

impl WocVout {
    fn to_participant(&self) -> Result<TxParticipant, RemoteError> {
        Ok(TxParticipant {
            address: self
                .script_pub_key
                .addresses
                .as_ref()
                .and_then(|addrs| addrs.first())
                .cloned(),
            value: bsv_to_satoshis(self.value)?,
        })
    }
}

#[derive(Deserialize)]
struct WocScriptPubKey {
    addresses: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WocChainInfo {
    blocks: u32,
}


#[cfg(all(test, live_network_tests))]
mod live_network_tests {
    use super::HttpRemoteLedger;
    use bsv_primitives::consensus::BlockHeight;

    #[tokio::test]
    async fn mainnet_chain_height_is_past_genesis_era() {
        use crate::remote::RemoteLedger;

        let client = HttpRemoteLedger::mainnet();
        let height = client.chain_height().await.unwrap();
        assert!(height > BlockHeight::from_u32(800_000));
    }
}
