//! The basket read-model: per-purpose balance partitions over an account's coins.
//!
//! Basket totals are always recomputed from stored coin rows, never accumulated
//! independently, so a displayed balance can never disagree with the unspent coin
//! set it summarizes.

use bsv_primitives::value::{BalanceError, Satoshis};

use crate::data_api::WalletRead;
use crate::wallet::Basket;

/// The balance of a single account, partitioned by basket. The sum of this struct's
/// fields is the total balance of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketTotals {
    /// The value of unspent coins received at the account's payment address.
    default: Satoshis,

    /// The value of unspent coins held at the account's ordinals address.
    ordinals: Satoshis,

    /// The value of unspent coins held at the account's identity address.
    identity: Satoshis,

    /// The value currently held by active time locks.
    locks: Satoshis,

    /// The value of unspent coins received at sender-derived addresses.
    derived: Satoshis,
}

impl BasketTotals {
    /// The [`BasketTotals`] value having zero values for all its fields.
    pub const ZERO: Self = Self {
        default: Satoshis::ZERO,
        ordinals: Satoshis::ZERO,
        identity: Satoshis::ZERO,
        locks: Satoshis::ZERO,
        derived: Satoshis::ZERO,
    };

    fn check_total(&self) -> Result<Satoshis, BalanceError> {
        (self.default + self.ordinals + self.identity + self.locks + self.derived)
            .ok_or(BalanceError::Overflow)
    }

    /// Returns the value held in the given basket.
    pub fn get(&self, basket: Basket) -> Satoshis {
        match basket {
            Basket::Default => self.default,
            Basket::Ordinals => self.ordinals,
            Basket::Identity => self.identity,
            Basket::Locks => self.locks,
            Basket::Derived => self.derived,
        }
    }

    /// Adds the specified value to the given basket, checking for overflow of the
    /// total account balance.
    pub fn add(&mut self, basket: Basket, value: Satoshis) -> Result<(), BalanceError> {
        let slot = match basket {
            Basket::Default => &mut self.default,
            Basket::Ordinals => &mut self.ordinals,
            Basket::Identity => &mut self.identity,
            Basket::Locks => &mut self.locks,
            Basket::Derived => &mut self.derived,
        };
        *slot = (*slot + value).ok_or(BalanceError::Overflow)?;
        self.check_total()?;
        Ok(())
    }

    /// Returns the value of coins that are immediately spendable for payments.
    pub fn spendable(&self) -> Satoshis {
        self.default
    }

    /// Returns the total value of funds belonging to the account.
    pub fn total(&self) -> Satoshis {
        (self.default + self.ordinals + self.identity + self.locks + self.derived)
            .expect("Account balance cannot overflow MAX_MONEY")
    }
}

/// Returns the per-basket totals for the given account, aggregated from the stored
/// unspent coin rows and active time locks.
pub fn totals<DbT: WalletRead>(
    db: &DbT,
    account_id: DbT::AccountId,
) -> Result<BasketTotals, DbT::Error> {
    db.get_basket_totals(account_id)
}
