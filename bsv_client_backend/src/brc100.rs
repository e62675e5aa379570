//! The wallet-core operations behind the BRC-100 request surface.
//!
//! An external approval layer receives application requests, shows them to the
//! user, and on approval calls into this module. Requests arrive as a closed
//! tagged union: one [`Request`] variant per operation, parsed strictly, so an
//! unknown request kind fails at the parse boundary instead of reaching a
//! dispatcher. The operations themselves are ordinary functions over the store,
//! the remote ledger, and the account's key bundle; the approval UI, transport,
//! and response encoding live outside this crate.

use secp256k1::{PublicKey, Secp256k1};
use serde::Deserialize;
use tracing::info;

use bsv_keys::{brc42, message, AccountKeyBundle, DerivationError};
use bsv_primitives::{
    address::TransparentAddress,
    consensus::{BlockHeight, Parameters},
    transaction::{
        builder::{build_consolidation, build_payment},
        fees::FeeSettings,
        OutPoint, TxId,
    },
    value::{BalanceError, SatBalance, Satoshis},
};

use crate::data_api::{error::Error, WalletRead, WalletWrite};
use crate::locks::spendable_default_coins;
use crate::remote::{RemoteError, RemoteLedger};
use crate::wallet::{Basket, TxStatus, WalletTx, WalletUtxo};

/// An inbound BRC-100 request, tagged by its `call` field.
///
/// Parsing is strict in both directions: a `call` value outside this enum is a
/// deserialization error, and the argument-carrying variants reject unknown
/// fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum Request {
    GetNetworkStatus,
    ListOutputs(ListOutputsArgs),
    CreateSignature(CreateSignatureArgs),
    CreateAction(CreateActionArgs),
    Consolidate,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ListOutputsArgs {
    /// Restricts the listing to a single basket when present.
    #[serde(default)]
    pub basket: Option<Basket>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateSignatureArgs {
    pub protocol_id: String,
    pub key_id: String,
    /// The requester's compressed identity public key, hex encoded.
    pub counterparty: String,
    /// The payload to sign; its UTF-8 bytes are hashed.
    pub data: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateActionArgs {
    pub outputs: Vec<ActionOutput>,
    pub description: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ActionOutput {
    /// The recipient address in Base58Check.
    pub to: String,
    pub satoshis: u64,
}

/// The typed result of a handled request; encoding it for the approval layer's
/// transport is the caller's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    NetworkStatus(NetworkStatus),
    Outputs(Vec<WalletUtxo>),
    /// A DER-encoded ECDSA signature.
    Signature(Vec<u8>),
    Action(ActionReceipt),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkStatus {
    pub network: &'static str,
    pub chain_height: BlockHeight,
}

/// The result of a broadcast operation ([`create_action`] or [`consolidate`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionReceipt {
    pub txid: TxId,
    pub fee: Satoshis,
    /// The value returned to the funding basket, zero if no change was created.
    pub change: Satoshis,
}

/// Parses and dispatches one approved request.
pub async fn handle<P, DbT, RlT>(
    params: &P,
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
    request: &Request,
) -> Result<Response, Error<DbT::Error, RemoteError>>
where
    P: Parameters,
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    match request {
        Request::GetNetworkStatus => Ok(Response::NetworkStatus(
            get_network_status(params, remote)
                .await
                .map_err(Error::Remote)?,
        )),
        Request::ListOutputs(args) => Ok(Response::Outputs(
            list_outputs(db, account_id, args.basket).map_err(Error::DataSource)?,
        )),
        Request::CreateSignature(args) => {
            let counterparty = parse_counterparty(&args.counterparty)?;
            let signature = create_signature(
                keys,
                &counterparty,
                &args.protocol_id,
                &args.key_id,
                args.data.as_bytes(),
            )?;
            Ok(Response::Signature(signature))
        }
        Request::CreateAction(args) => {
            let mut outputs = Vec::with_capacity(args.outputs.len());
            for output in &args.outputs {
                let to = TransparentAddress::decode(params, &output.to)?;
                let value = Satoshis::from_u64(output.satoshis)?;
                outputs.push((to, value));
            }
            let receipt =
                create_action(db, remote, fees, account_id, keys, &outputs, &args.description)
                    .await?;
            Ok(Response::Action(receipt))
        }
        Request::Consolidate => Ok(Response::Action(
            consolidate(db, remote, fees, account_id, keys).await?,
        )),
    }
}

/// Reports which network the wallet is on and the height of the chain tip.
pub async fn get_network_status<P, RlT>(
    params: &P,
    remote: &RlT,
) -> Result<NetworkStatus, RemoteError>
where
    P: Parameters,
    RlT: RemoteLedger,
{
    let chain_height = remote.chain_height().await?;
    Ok(NetworkStatus {
        network: params.network_name(),
        chain_height,
    })
}

/// Lists the account's unspent coins, optionally restricted to one basket.
pub fn list_outputs<DbT: WalletRead>(
    db: &DbT,
    account_id: DbT::AccountId,
    basket: Option<Basket>,
) -> Result<Vec<WalletUtxo>, DbT::Error> {
    let mut outputs = db.get_unspent_utxos(account_id)?;
    if let Some(basket) = basket {
        outputs.retain(|utxo| utxo.basket() == basket);
    }
    Ok(outputs)
}

/// Signs `SHA-256(data)` with the child key derived for the requesting
/// application, returning a low-S DER signature.
///
/// The child is specific to the (identity key, counterparty, protocol, key id)
/// tuple, so an application only ever sees signatures under its own derived key,
/// never under the wallet's identity key itself.
pub fn create_signature(
    keys: &AccountKeyBundle,
    counterparty: &PublicKey,
    protocol_id: &str,
    key_id: &str,
    data: &[u8],
) -> Result<Vec<u8>, DerivationError> {
    let secp = Secp256k1::new();
    let invoice = brc42::InvoiceNumber::new(protocol_id, 2, key_id);
    let child = brc42::derive_child_private_key(
        &secp,
        keys.identity().secret_key(),
        counterparty,
        &invoice,
    )?;
    Ok(message::sign_message(&secp, &child, data))
}

/// Builds, signs, and broadcasts a payment to `outputs` from the default basket,
/// recording the spend in the store.
pub async fn create_action<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
    outputs: &[(TransparentAddress, Satoshis)],
    description: &str,
) -> Result<ActionReceipt, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;
    let wallet_address = *account.wallet_address();

    let pool = spendable_default_coins(db, account_id, keys)?;
    let built = build_payment(&pool, outputs, &wallet_address, fees.fee_rate())?;
    let txid = remote
        .broadcast(&built.transaction.to_bytes())
        .await
        .map_err(Error::Remote)?;

    db.mark_utxos_spent(account_id, &built.spent)
        .map_err(Error::DataSource)?;
    if built.change.is_positive() {
        // Change is always the output after the requested ones.
        db.put_utxo(
            account_id,
            &WalletUtxo::from_parts(
                OutPoint::new(txid, outputs.len() as u32),
                built.change,
                wallet_address,
                Basket::Default,
                false,
            ),
        )
        .map_err(Error::DataSource)?;
    }
    let sent = outputs
        .iter()
        .map(|(_, value)| *value)
        .sum::<Option<Satoshis>>()
        .and_then(|total| total + built.fee)
        .ok_or(BalanceError::Overflow)?;
    db.put_transaction(
        account_id,
        &WalletTx::from_parts(
            txid,
            None,
            Some(-SatBalance::from(sent)),
            TxStatus::Pending,
            Some(description.to_string()),
        ),
    )
    .map_err(Error::DataSource)?;

    info!(
        "Sent {} satoshis to {} output(s) in {}",
        u64::from(sent),
        outputs.len(),
        txid
    );
    Ok(ActionReceipt {
        txid,
        fee: built.fee,
        change: built.change,
    })
}

/// Sweeps the account's default-basket coins into a single coin at the wallet
/// address. Requires at least two coins; the net cost to the wallet is the fee.
pub async fn consolidate<DbT, RlT>(
    db: &mut DbT,
    remote: &RlT,
    fees: &FeeSettings,
    account_id: DbT::AccountId,
    keys: &AccountKeyBundle,
) -> Result<ActionReceipt, Error<DbT::Error, RemoteError>>
where
    DbT: WalletWrite,
    RlT: RemoteLedger,
{
    let account = db
        .get_account(account_id)
        .map_err(Error::DataSource)?
        .ok_or(Error::AccountUnknown)?;
    let wallet_address = *account.wallet_address();

    let pool = spendable_default_coins(db, account_id, keys)?;
    let built = build_consolidation(&pool, &wallet_address, fees.fee_rate())?;
    let txid = remote
        .broadcast(&built.transaction.to_bytes())
        .await
        .map_err(Error::Remote)?;

    db.mark_utxos_spent(account_id, &built.spent)
        .map_err(Error::DataSource)?;
    let swept = built.transaction.vout[0].value;
    db.put_utxo(
        account_id,
        &WalletUtxo::from_parts(
            OutPoint::new(txid, 0),
            swept,
            wallet_address,
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
            Some(-SatBalance::from(built.fee)),
            TxStatus::Pending,
            Some("Consolidate".into()),
        ),
    )
    .map_err(Error::DataSource)?;

    info!(
        "Consolidated {} coin(s) into {} satoshis in {}",
        built.spent.len(),
        u64::from(swept),
        txid
    );
    Ok(ActionReceipt {
        txid,
        fee: built.fee,
        change: Satoshis::ZERO,
    })
}

fn parse_counterparty(hex_pubkey: &str) -> Result<PublicKey, DerivationError> {
    let bytes = hex::decode(hex_pubkey.trim()).map_err(|_| DerivationError::InvalidKeyMaterial)?;
    PublicKey::from_slice(&bytes).map_err(|_| DerivationError::InvalidKeyMaterial)
}
