//! Types for wallet error handling.

use std::error;
use std::fmt::{self, Debug, Display};

use bsv_keys::DerivationError;
use bsv_primitives::{
    address::AddressError,
    transaction::builder,
    value::{BalanceError, Satoshis},
};

/// Errors that can occur as a consequence of wallet operations.
#[derive(Debug)]
pub enum Error<DataSourceError, RemoteError> {
    /// An error occurred in the underlying wallet data store.
    DataSource(DataSourceError),

    /// An error occurred querying the remote ledger.
    Remote(RemoteError),

    /// Unable to fund a spend because the selectable balance is not sufficient.
    InsufficientFunds {
        available: Satoshis,
        required: Satoshis,
    },

    /// A time lock cannot be released before its unlock height.
    NotYetMaturable { blocks_remaining: u32 },

    /// Key material failed to parse or derive.
    KeyDerivation(DerivationError),

    /// An error occurred building a new transaction.
    Builder(builder::Error),

    /// An amount computation overflowed or underflowed the valid range.
    BalanceError(BalanceError),

    /// An address could not be decoded.
    Address(AddressError),

    /// The referenced account is not known to the wallet store.
    AccountUnknown,

    /// A lock was requested with a block delta of zero.
    InvalidLockDelta,
}

impl<DE, RE> fmt::Display for Error<DE, RE>
where
    DE: fmt::Display,
    RE: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DataSource(e) => {
                write!(f, "The underlying datasource produced the following error: {}", e)
            }
            Error::Remote(e) => write!(f, "The remote ledger produced the following error: {}", e),
            Error::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "Insufficient balance (have {}, need {} including fee)",
                u64::from(*available),
                u64::from(*required)
            ),
            Error::NotYetMaturable { blocks_remaining } => write!(
                f,
                "The lock matures in {} more block(s)",
                blocks_remaining
            ),
            Error::KeyDerivation(e) => write!(f, "Key derivation failed: {}", e),
            Error::Builder(e) => write!(f, "An error occurred building the transaction: {}", e),
            Error::BalanceError(e) => write!(
                f,
                "The value lies outside the valid range of BSV amounts: {:?}.",
                e
            ),
            Error::Address(e) => write!(f, "An address could not be decoded: {}", e),
            Error::AccountUnknown => {
                write!(f, "The wallet does not contain the referenced account")
            }
            Error::InvalidLockDelta => {
                write!(f, "Locks must mature at least one block in the future")
            }
        }
    }
}

impl<DE, RE> error::Error for Error<DE, RE>
where
    DE: Debug + Display + error::Error + 'static,
    RE: Debug + Display + error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self {
            Error::DataSource(e) => Some(e),
            Error::Remote(e) => Some(e),
            Error::KeyDerivation(e) => Some(e),
            Error::Builder(e) => Some(e),
            _ => None,
        }
    }
}

impl<DE, RE> From<builder::Error> for Error<DE, RE> {
    fn from(e: builder::Error) -> Self {
        // Funding and balance failures have wallet-level meaning; everything else is
        // reported as a construction failure.
        match e {
            builder::Error::InsufficientFunds {
                available,
                required,
            } => Error::InsufficientFunds {
                available,
                required,
            },
            builder::Error::Balance(e) => Error::BalanceError(e),
            other => Error::Builder(other),
        }
    }
}

impl<DE, RE> From<DerivationError> for Error<DE, RE> {
    fn from(e: DerivationError) -> Self {
        Error::KeyDerivation(e)
    }
}

impl<DE, RE> From<BalanceError> for Error<DE, RE> {
    fn from(e: BalanceError) -> Self {
        Error::BalanceError(e)
    }
}

impl<DE, RE> From<AddressError> for Error<DE, RE> {
    fn from(e: AddressError) -> Self {
        Error::Address(e)
    }
}
