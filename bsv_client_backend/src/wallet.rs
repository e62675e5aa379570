//! Structs representing the data a wallet tracks for each account: coins partitioned
//! into baskets, transaction history, derived receive addresses, time locks, and
//! contacts.

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use bsv_keys::SeedFingerprint;
use bsv_primitives::{
    address::TransparentAddress,
    consensus::BlockHeight,
    transaction::{OutPoint, TxId},
    value::{SatBalance, Satoshis},
};

/// The parameters that went into creating an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountSource {
    /// The account was derived from a seed at a BIP 44 account index, and can be
    /// recovered from the mnemonic for that seed.
    Derived {
        seed_fingerprint: SeedFingerprint,
        account_index: bsv_keys::AccountId,
    },
    /// The account was imported from external key material. It is not recoverable
    /// from any seed the wallet knows about.
    Imported,
}

/// An account tracked by the wallet.
///
/// Accounts are immutable once created, apart from their display name. Each account
/// owns three role addresses; coins arriving at each are classified into the
/// corresponding [`Basket`].
#[derive(Clone, Debug)]
pub struct Account<A> {
    id: A,
    name: String,
    source: AccountSource,
    wallet_address: TransparentAddress,
    ord_address: TransparentAddress,
    identity_address: TransparentAddress,
    created_at: OffsetDateTime,
}

impl<A: Copy> Account<A> {
    pub fn from_parts(
        id: A,
        name: String,
        source: AccountSource,
        wallet_address: TransparentAddress,
        ord_address: TransparentAddress,
        identity_address: TransparentAddress,
        created_at: OffsetDateTime,
    ) -> Self {
        Account {
            id,
            name,
            source,
            wallet_address,
            ord_address,
            identity_address,
            created_at,
        }
    }

    pub fn id(&self) -> A {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &AccountSource {
        &self.source
    }

    /// The primary payment address; coins here land in [`Basket::Default`].
    pub fn wallet_address(&self) -> &TransparentAddress {
        &self.wallet_address
    }

    /// The ordinals address; coins here land in [`Basket::Ordinals`].
    pub fn ord_address(&self) -> &TransparentAddress {
        &self.ord_address
    }

    /// The identity address; coins here land in [`Basket::Identity`].
    pub fn identity_address(&self) -> &TransparentAddress {
        &self.identity_address
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// The three role addresses paired with the basket each one funds.
    pub fn base_addresses(&self) -> [(&TransparentAddress, Basket); 3] {
        [
            (&self.wallet_address, Basket::Default),
            (&self.ord_address, Basket::Ordinals),
            (&self.identity_address, Basket::Identity),
        ]
    }
}

/// The classification buckets the wallet divides its coins into.
///
/// A coin's basket is fixed at insertion time based on which address (and hence which
/// derivation path) produced it; coins never migrate between baskets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basket {
    /// Spendable funds at the wallet address.
    Default,
    /// Outputs at the ordinals address, excluded from fee selection.
    Ordinals,
    /// Outputs at the identity address.
    Identity,
    /// Coins held by OP_CHECKLOCKTIMEVERIFY scripts until a target height.
    Locks,
    /// Coins received at BRC-42 derived addresses.
    Derived,
}

impl Basket {
    pub const ALL: [Basket; 5] = [
        Basket::Default,
        Basket::Ordinals,
        Basket::Identity,
        Basket::Locks,
        Basket::Derived,
    ];

    /// The stable lowercase name used in stores and client-facing APIs.
    pub fn name(&self) -> &'static str {
        match self {
            Basket::Default => "default",
            Basket::Ordinals => "ordinals",
            Basket::Identity => "identity",
            Basket::Locks => "locks",
            Basket::Derived => "derived",
        }
    }

    /// Parses the stable name produced by [`Basket::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Basket::ALL.into_iter().find(|b| b.name() == name)
    }
}

impl std::fmt::Display for Basket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A transaction output tracked by the wallet.
///
/// Spent coins are retained (flagged) rather than deleted, so that a remote snapshot
/// that re-reports an old coin cannot resurrect it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletUtxo {
    outpoint: OutPoint,
    value: Satoshis,
    address: TransparentAddress,
    basket: Basket,
    spent: bool,
}

impl WalletUtxo {
    pub fn from_parts(
        outpoint: OutPoint,
        value: Satoshis,
        address: TransparentAddress,
        basket: Basket,
        spent: bool,
    ) -> Self {
        WalletUtxo {
            outpoint,
            value,
            address,
            basket,
            spent,
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    pub fn value(&self) -> Satoshis {
        self.value
    }

    pub fn address(&self) -> &TransparentAddress {
        &self.address
    }

    pub fn basket(&self) -> Basket {
        self.basket
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }
}

/// Confirmation state of a wallet transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Broadcast (or observed in a mempool) but not yet mined.
    Pending,
    /// Mined into a block.
    Confirmed,
}

impl TxStatus {
    pub fn name(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(TxStatus::Pending),
            "confirmed" => Some(TxStatus::Confirmed),
            _ => None,
        }
    }
}

/// The wallet's view of a transaction that touches one of its accounts.
///
/// `amount` is the signed net effect on the account. It is expensive to compute
/// (requiring full transaction detail from the remote ledger), so it starts out
/// unknown and is cached once resolved; stores must never replace a known amount
/// with an unknown one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletTx {
    txid: TxId,
    mined_height: Option<BlockHeight>,
    amount: Option<SatBalance>,
    status: TxStatus,
    label: Option<String>,
}

impl WalletTx {
    pub fn from_parts(
        txid: TxId,
        mined_height: Option<BlockHeight>,
        amount: Option<SatBalance>,
        status: TxStatus,
        label: Option<String>,
    ) -> Self {
        WalletTx {
            txid,
            mined_height,
            amount,
            status,
            label,
        }
    }

    pub fn txid(&self) -> &TxId {
        &self.txid
    }

    /// The height at which this transaction was mined, if it has been.
    pub fn mined_height(&self) -> Option<BlockHeight> {
        self.mined_height
    }

    pub fn amount(&self) -> Option<SatBalance> {
        self.amount
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// A BRC-42 derived receive address, together with the key material needed to spend
/// coins that arrive at it and the position it occupies in its sender's chain.
#[derive(Clone, Debug)]
pub struct DerivedAddress {
    address: TransparentAddress,
    sender_pubkey: PublicKey,
    invoice_number: String,
    invoice_index: u32,
    private_key_wif: String,
    label: String,
    created_at: OffsetDateTime,
}

impl DerivedAddress {
    pub fn from_parts(
        address: TransparentAddress,
        sender_pubkey: PublicKey,
        invoice_number: String,
        invoice_index: u32,
        private_key_wif: String,
        label: String,
        created_at: OffsetDateTime,
    ) -> Self {
        DerivedAddress {
            address,
            sender_pubkey,
            invoice_number,
            invoice_index,
            private_key_wif,
            label,
            created_at,
        }
    }

    pub fn address(&self) -> &TransparentAddress {
        &self.address
    }

    /// The counterparty whose payments this address receives.
    pub fn sender_pubkey(&self) -> &PublicKey {
        &self.sender_pubkey
    }

    /// The full BRC-43 invoice number this address was derived under.
    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    /// The payment counter, i.e. this address's position in the sender's chain.
    pub fn invoice_index(&self) -> u32 {
        self.invoice_index
    }

    /// The derived child private key in WIF encoding.
    pub fn private_key_wif(&self) -> &str {
        &self.private_key_wif
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

/// A coin held by an OP_CHECKLOCKTIMEVERIFY script until a target block height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedUtxo {
    outpoint: OutPoint,
    value: Satoshis,
    unlock_height: BlockHeight,
    created_at: OffsetDateTime,
}

impl LockedUtxo {
    pub fn from_parts(
        outpoint: OutPoint,
        value: Satoshis,
        unlock_height: BlockHeight,
        created_at: OffsetDateTime,
    ) -> Self {
        LockedUtxo {
            outpoint,
            value,
            unlock_height,
            created_at,
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    pub fn value(&self) -> Satoshis {
        self.value
    }

    /// The first block height at which the coin can be spent.
    pub fn unlock_height(&self) -> BlockHeight {
        self.unlock_height
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Whether the lock can be released in a block at `height`.
    pub fn is_mature(&self, height: BlockHeight) -> bool {
        height >= self.unlock_height
    }

    /// How many more blocks must be mined before the lock matures; zero once mature.
    pub fn blocks_remaining(&self, height: BlockHeight) -> u32 {
        u32::from(self.unlock_height).saturating_sub(u32::from(height))
    }
}

/// An entry in an account's address book, keyed by the contact's public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pubkey: PublicKey,
    label: String,
}

impl Contact {
    pub fn new(pubkey: PublicKey, label: String) -> Self {
        Contact { pubkey, label }
    }

    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
