//! Construction and signing of the transaction shapes the wallet produces: standard
//! P2PKH payments with change, height-locked outputs, spends of matured locks, and
//! consolidation sweeps.

use std::error;
use std::fmt;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, SignOnly};

use crate::address::{hash160, TransparentAddress};
use crate::consensus::BlockHeight;
use crate::constants::{SEQUENCE_FINAL, SEQUENCE_NON_FINAL, TX_VERSION};
use crate::script::Script;
use crate::transaction::fees::{p2pkh_transaction_size, transaction_size, FeeRate, DUST_THRESHOLD};
use crate::transaction::sighash::{signature_hash, SignableInput, SIGHASH_ALL_FORKID};
use crate::transaction::{OutPoint, Transaction, TxIn, TxOut};
use crate::value::{BalanceError, Satoshis};

const P2PKH_SCRIPT_LEN: usize = 25;

/// Errors that can occur during transaction construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Insufficient funds were provided to cover the requested outputs plus the fee.
    InsufficientFunds {
        available: Satoshis,
        required: Satoshis,
    },
    /// A provided coin's locking script cannot be spent with the provided key.
    InvalidAddress,
    /// The transaction would have no outputs, or a requested output value was zero.
    InvalidAmount,
    /// The coin provided to a lock spend does not carry a height-locked script.
    NotTimeLocked,
    /// Consolidation requires at least two inputs.
    TooFewInputs { provided: usize },
    /// An overflow or underflow occurred when computing value balances.
    Balance(BalanceError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "Insufficient funds: have {} satoshis, need {}",
                available.into_u64(),
                required.into_u64()
            ),
            Error::InvalidAddress => {
                write!(f, "The provided key does not control the coin being spent")
            }
            Error::InvalidAmount => write!(f, "Invalid transaction amount"),
            Error::NotTimeLocked => write!(f, "The coin is not a height-locked output"),
            Error::TooFewInputs { provided } => write!(
                f,
                "Consolidation requires at least 2 inputs; {} provided",
                provided
            ),
            Error::Balance(e) => write!(f, "Invalid value balance: {}", e),
        }
    }
}

impl error::Error for Error {}

impl From<BalanceError> for Error {
    fn from(e: BalanceError) -> Self {
        Error::Balance(e)
    }
}

/// A coin that can fund a transaction, paired with the key that controls it.
#[derive(Clone)]
pub struct SpendableInput {
    pub outpoint: OutPoint,
    pub coin: TxOut,
    pub sk: SecretKey,
}

impl SpendableInput {
    pub fn value(&self) -> Satoshis {
        self.coin.value
    }
}

/// A fully-signed transaction together with its accounting.
#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    pub transaction: Transaction,
    /// The fee paid, including any sub-dust remainder folded into it.
    pub fee: Satoshis,
    /// The value returned to the change address, zero if no change output was created.
    pub change: Satoshis,
    /// The outpoints consumed by this transaction.
    pub spent: Vec<OutPoint>,
}

struct TransparentInputInfo {
    sk: SecretKey,
    pubkey: [u8; 33],
    prevout: OutPoint,
    coin: TxOut,
}

/// Assembles and signs a transaction from explicit inputs and outputs.
///
/// Funding selection and fee calculation live in the `build_*` functions below; the
/// builder itself only validates that each input is spendable with its key, computes
/// the per-input signature digests, and produces the authorized transaction.
pub struct Builder {
    secp: Secp256k1<SignOnly>,
    lock_time: u32,
    inputs: Vec<TransparentInputInfo>,
    outputs: Vec<TxOut>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            secp: Secp256k1::signing_only(),
            lock_time: 0,
            inputs: vec![],
            outputs: vec![],
        }
    }

    /// Creates a builder for a transaction that relies on `nLockTime`; its inputs are
    /// given a non-final sequence so the locktime is enforced.
    pub fn with_lock_time(lock_time: BlockHeight) -> Self {
        Builder {
            lock_time: u32::from(lock_time),
            ..Builder::new()
        }
    }

    /// Adds an input, checking that the coin's locking script (plain or height-locked
    /// P2PKH) pays the key's pubkey hash.
    pub fn add_input(
        &mut self,
        sk: SecretKey,
        prevout: OutPoint,
        coin: TxOut,
    ) -> Result<(), Error> {
        let pubkey = PublicKey::from_secret_key(&self.secp, &sk).serialize();
        let spend_hash = coin
            .script_pubkey
            .p2pkh_pubkey_hash()
            .or_else(|| coin.script_pubkey.time_lock_parts().map(|(_, hash)| hash));
        match spend_hash {
            Some(hash) if hash == hash160(&pubkey) => {
                self.inputs.push(TransparentInputInfo {
                    sk,
                    pubkey,
                    prevout,
                    coin,
                });
                Ok(())
            }
            _ => Err(Error::InvalidAddress),
        }
    }

    /// Adds a standard P2PKH output.
    pub fn add_output(&mut self, to: &TransparentAddress, value: Satoshis) {
        self.outputs.push(TxOut {
            value,
            script_pubkey: to.script(),
        });
    }

    /// Adds a height-locked output paying `lock_address` once the chain reaches
    /// `unlock_height`.
    pub fn add_lock_output(
        &mut self,
        lock_address: &TransparentAddress,
        unlock_height: BlockHeight,
        value: Satoshis,
    ) {
        self.outputs.push(TxOut {
            value,
            script_pubkey: Script::time_lock(unlock_height, lock_address.pubkey_hash()),
        });
    }

    /// Signs every input and returns the authorized transaction.
    pub fn build(self) -> Result<Transaction, Error> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(Error::InvalidAmount);
        }
        let sequence = if self.lock_time == 0 {
            SEQUENCE_FINAL
        } else {
            SEQUENCE_NON_FINAL
        };

        let mut tx = Transaction {
            version: TX_VERSION,
            vin: self
                .inputs
                .iter()
                .map(|info| TxIn {
                    prevout: info.prevout,
                    script_sig: Script::default(),
                    sequence,
                })
                .collect(),
            vout: self.outputs,
            lock_time: self.lock_time,
        };

        let script_sigs: Vec<Script> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, info)| {
                let digest = signature_hash(
                    &tx,
                    SIGHASH_ALL_FORKID,
                    &SignableInput {
                        index,
                        script_code: &info.coin.script_pubkey,
                        value: info.coin.value,
                    },
                );
                let sig = self
                    .secp
                    .sign_ecdsa(&Message::from_digest(digest), &info.sk);
                let mut sig_bytes = sig.serialize_der().to_vec();
                sig_bytes.push(SIGHASH_ALL_FORKID as u8);
                Script::p2pkh_sig(&sig_bytes, &info.pubkey)
            })
            .collect();

        for (txin, script_sig) in tx.vin.iter_mut().zip(script_sigs) {
            txin.script_sig = script_sig;
        }
        Ok(tx)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

/// Greedily selects coins from `pool` (in the order given) until the accumulated value
/// covers `target` plus the fee for the selection, assuming a change output.
fn select_funding<'a>(
    pool: &'a [SpendableInput],
    target: Satoshis,
    output_script_lens: &[usize],
    fee_rate: FeeRate,
) -> Result<(Vec<&'a SpendableInput>, Satoshis), Error> {
    let mut lens_with_change = output_script_lens.to_vec();
    lens_with_change.push(P2PKH_SCRIPT_LEN);

    let mut selected: Vec<&SpendableInput> = Vec::new();
    let mut total = Satoshis::ZERO;
    for input in pool {
        if !selected.is_empty() {
            let fee = fee_rate.fee_for_size(transaction_size(selected.len(), &lens_with_change));
            let needed = (target + fee).ok_or(Error::Balance(BalanceError::Overflow))?;
            if total >= needed {
                break;
            }
        }
        selected.push(input);
        total = (total + input.coin.value).ok_or(Error::Balance(BalanceError::Overflow))?;
    }
    Ok((selected, total))
}

/// Computes the fee and optional change for a funded transaction.
///
/// A change output is only created when the remainder after the with-change fee exceeds
/// the dust threshold; otherwise the remainder is folded into the fee.
fn change_and_fee(
    total: Satoshis,
    target: Satoshis,
    num_inputs: usize,
    output_script_lens: &[usize],
    fee_rate: FeeRate,
) -> Result<(Satoshis, Option<Satoshis>), Error> {
    let mut lens_with_change = output_script_lens.to_vec();
    lens_with_change.push(P2PKH_SCRIPT_LEN);
    let fee_with_change = fee_rate.fee_for_size(transaction_size(num_inputs, &lens_with_change));

    if let Some(change) = (total - target).and_then(|rem| rem - fee_with_change) {
        if change > DUST_THRESHOLD {
            return Ok((fee_with_change, Some(change)));
        }
    }

    let fee_bare = fee_rate.fee_for_size(transaction_size(num_inputs, output_script_lens));
    let required = (target + fee_bare).ok_or(Error::Balance(BalanceError::Overflow))?;
    let remainder = (total - target).ok_or(Error::InsufficientFunds {
        available: total,
        required,
    })?;
    if (remainder - fee_bare).is_none() {
        return Err(Error::InsufficientFunds {
            available: total,
            required,
        });
    }
    // The whole remainder is paid as fee.
    Ok((remainder, None))
}

/// Builds and signs a payment from the pool to the given recipients, returning change
/// above the dust threshold to `change_address`.
pub fn build_payment(
    pool: &[SpendableInput],
    recipients: &[(TransparentAddress, Satoshis)],
    change_address: &TransparentAddress,
    fee_rate: FeeRate,
) -> Result<BuiltTransaction, Error> {
    if recipients.is_empty() || recipients.iter().any(|(_, value)| value.is_zero()) {
        return Err(Error::InvalidAmount);
    }
    let target = recipients
        .iter()
        .map(|(_, value)| *value)
        .sum::<Option<Satoshis>>()
        .ok_or(Error::Balance(BalanceError::Overflow))?;
    let lens = vec![P2PKH_SCRIPT_LEN; recipients.len()];

    let (selected, total) = select_funding(pool, target, &lens, fee_rate)?;
    let (fee, change) = change_and_fee(total, target, selected.len(), &lens, fee_rate)?;

    let mut builder = Builder::new();
    for input in &selected {
        builder.add_input(input.sk, input.outpoint, input.coin.clone())?;
    }
    for (to, value) in recipients {
        builder.add_output(to, *value);
    }
    if let Some(change_value) = change {
        builder.add_output(change_address, change_value);
    }

    Ok(BuiltTransaction {
        transaction: builder.build()?,
        fee,
        change: change.unwrap_or(Satoshis::ZERO),
        spent: selected.iter().map(|input| input.outpoint).collect(),
    })
}

/// Builds and signs a transaction whose first output is height-locked to
/// `unlock_height`, funding it from the pool with change to `change_address`.
pub fn build_lock(
    pool: &[SpendableInput],
    lock_address: &TransparentAddress,
    unlock_height: BlockHeight,
    value: Satoshis,
    change_address: &TransparentAddress,
    fee_rate: FeeRate,
) -> Result<BuiltTransaction, Error> {
    if value.is_zero() {
        return Err(Error::InvalidAmount);
    }
    let lock_script_len = Script::time_lock(unlock_height, lock_address.pubkey_hash())
        .as_bytes()
        .len();
    let lens = vec![lock_script_len];

    let (selected, total) = select_funding(pool, value, &lens, fee_rate)?;
    let (fee, change) = change_and_fee(total, value, selected.len(), &lens, fee_rate)?;

    let mut builder = Builder::new();
    for input in &selected {
        builder.add_input(input.sk, input.outpoint, input.coin.clone())?;
    }
    builder.add_lock_output(lock_address, unlock_height, value);
    if let Some(change_value) = change {
        builder.add_output(change_address, change_value);
    }

    Ok(BuiltTransaction {
        transaction: builder.build()?,
        fee,
        change: change.unwrap_or(Satoshis::ZERO),
        spent: selected.iter().map(|input| input.outpoint).collect(),
    })
}

/// Builds and signs the spend of a matured height-locked coin, paying its full value
/// minus the exact fee to `recipient`.
///
/// The transaction's `nLockTime` is set to the script's unlock height; whether that
/// height has been reached is the caller's check.
pub fn build_lock_spend(
    locked: &SpendableInput,
    recipient: &TransparentAddress,
    fee_rate: FeeRate,
) -> Result<BuiltTransaction, Error> {
    let (unlock_height, _) = locked
        .coin
        .script_pubkey
        .time_lock_parts()
        .ok_or(Error::NotTimeLocked)?;

    let fee = fee_rate.fee_for_size(p2pkh_transaction_size(1, 1));
    let output_value = (locked.coin.value - fee)
        .filter(|value| value.is_positive())
        .ok_or(Error::InsufficientFunds {
            available: locked.coin.value,
            required: fee,
        })?;

    let mut builder = Builder::with_lock_time(unlock_height);
    builder.add_input(locked.sk, locked.outpoint, locked.coin.clone())?;
    builder.add_output(recipient, output_value);

    Ok(BuiltTransaction {
        transaction: builder.build()?,
        fee,
        change: Satoshis::ZERO,
        spent: vec![locked.outpoint],
    })
}

/// Builds and signs a sweep of two or more coins into a single output to `recipient`.
pub fn build_consolidation(
    inputs: &[SpendableInput],
    recipient: &TransparentAddress,
    fee_rate: FeeRate,
) -> Result<BuiltTransaction, Error> {
    if inputs.len() < 2 {
        return Err(Error::TooFewInputs {
            provided: inputs.len(),
        });
    }
    let total = inputs
        .iter()
        .map(|input| input.coin.value)
        .sum::<Option<Satoshis>>()
        .ok_or(Error::Balance(BalanceError::Overflow))?;
    let fee = fee_rate.fee_for_size(p2pkh_transaction_size(inputs.len(), 1));
    let output_value = (total - fee)
        .filter(|value| value.is_positive())
        .ok_or(Error::InsufficientFunds {
            available: total,
            required: fee,
        })?;

    let mut builder = Builder::new();
    for input in inputs {
        builder.add_input(input.sk, input.outpoint, input.coin.clone())?;
    }
    builder.add_output(recipient, output_value);

    Ok(BuiltTransaction {
        transaction: builder.build()?,
        fee,
        change: Satoshis::ZERO,
        spent: inputs.iter().map(|input| input.outpoint).collect(),
    })
}
