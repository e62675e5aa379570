use std::convert::{Infallible, TryFrom};
use std::error;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

pub const COIN: u64 = 1_0000_0000;
pub const MAX_MONEY: u64 = 21_000_000 * COIN;
pub const MAX_BALANCE: i64 = MAX_MONEY as i64;

/// A type-safe representation of a BSV value delta, in satoshis.
///
/// A SatBalance can only be constructed from an integer that is within the valid monetary
/// range of `{-MAX_MONEY..MAX_MONEY}` (where `MAX_MONEY` = 21,000,000 × 10⁸ satoshis).
/// However, this range is not preserved as an invariant internally; it is possible to
/// add two valid SatBalances together to obtain an invalid SatBalance. It is the user's
/// responsibility to handle the result of serializing potentially-invalid SatBalances.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub struct SatBalance(i64);

impl SatBalance {
    /// Returns a zero-valued SatBalance.
    pub const fn zero() -> Self {
        SatBalance(0)
    }

    /// Creates a constant SatBalance from an i64.
    ///
    /// Panics: if the amount is outside the range `{-MAX_BALANCE..MAX_BALANCE}`.
    pub const fn const_from_i64(amount: i64) -> Self {
        assert!(-MAX_BALANCE <= amount && amount <= MAX_BALANCE); // contains is not const
        SatBalance(amount)
    }

    /// Creates a SatBalance from an i64.
    ///
    /// Returns an error if the amount is outside the range `{-MAX_BALANCE..MAX_BALANCE}`.
    pub fn from_i64(amount: i64) -> Result<Self, BalanceError> {
        if (-MAX_BALANCE..=MAX_BALANCE).contains(&amount) {
            Ok(SatBalance(amount))
        } else if amount < 0 {
            Err(BalanceError::Underflow)
        } else {
            Err(BalanceError::Overflow)
        }
    }

    /// Creates a non-negative SatBalance from an i64.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_BALANCE}`.
    pub fn from_nonnegative_i64(amount: i64) -> Result<Self, BalanceError> {
        if (0..=MAX_BALANCE).contains(&amount) {
            Ok(SatBalance(amount))
        } else if amount < 0 {
            Err(BalanceError::Underflow)
        } else {
            Err(BalanceError::Overflow)
        }
    }

    /// Creates a SatBalance from a u64.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_u64(amount: u64) -> Result<Self, BalanceError> {
        if amount <= MAX_MONEY {
            Ok(SatBalance(amount as i64))
        } else {
            Err(BalanceError::Overflow)
        }
    }

    /// Returns `true` if `self` is positive and `false` if the SatBalance is zero or
    /// negative.
    pub const fn is_positive(self) -> bool {
        self.0.is_positive()
    }

    /// Returns `true` if `self` is negative and `false` if the SatBalance is zero or
    /// positive.
    pub const fn is_negative(self) -> bool {
        self.0.is_negative()
    }

    pub fn sum<I: IntoIterator<Item = SatBalance>>(values: I) -> Option<SatBalance> {
        let mut result = SatBalance::zero();
        for value in values {
            result = (result + value)?;
        }
        Some(result)
    }
}

impl TryFrom<i64> for SatBalance {
    type Error = BalanceError;

    fn try_from(value: i64) -> Result<Self, BalanceError> {
        SatBalance::from_i64(value)
    }
}

impl From<SatBalance> for i64 {
    fn from(amount: SatBalance) -> i64 {
        amount.0
    }
}

impl From<&SatBalance> for i64 {
    fn from(amount: &SatBalance) -> i64 {
        amount.0
    }
}

impl TryFrom<SatBalance> for u64 {
    type Error = BalanceError;

    fn try_from(value: SatBalance) -> Result<Self, Self::Error> {
        value.0.try_into().map_err(|_| BalanceError::Underflow)
    }
}

impl Add<SatBalance> for SatBalance {
    type Output = Option<SatBalance>;

    fn add(self, rhs: SatBalance) -> Option<SatBalance> {
        SatBalance::from_i64(self.0 + rhs.0).ok()
    }
}

impl Add<SatBalance> for Option<SatBalance> {
    type Output = Self;

    fn add(self, rhs: SatBalance) -> Option<SatBalance> {
        self.and_then(|lhs| lhs + rhs)
    }
}

impl AddAssign<SatBalance> for SatBalance {
    fn add_assign(&mut self, rhs: SatBalance) {
        *self = (*self + rhs).expect("Addition must produce a valid amount value.")
    }
}

impl Sub<SatBalance> for SatBalance {
    type Output = Option<SatBalance>;

    fn sub(self, rhs: SatBalance) -> Option<SatBalance> {
        SatBalance::from_i64(self.0 - rhs.0).ok()
    }
}

impl Sub<SatBalance> for Option<SatBalance> {
    type Output = Self;

    fn sub(self, rhs: SatBalance) -> Option<SatBalance> {
        self.and_then(|lhs| lhs - rhs)
    }
}

impl SubAssign<SatBalance> for SatBalance {
    fn sub_assign(&mut self, rhs: SatBalance) {
        *self = (*self - rhs).expect("Subtraction must produce a valid amount value.")
    }
}

impl Sum<SatBalance> for Option<SatBalance> {
    fn sum<I: Iterator<Item = SatBalance>>(iter: I) -> Self {
        iter.fold(Some(SatBalance::zero()), |acc, a| acc? + a)
    }
}

impl<'a> Sum<&'a SatBalance> for Option<SatBalance> {
    fn sum<I: Iterator<Item = &'a SatBalance>>(iter: I) -> Self {
        iter.fold(Some(SatBalance::zero()), |acc, a| acc? + *a)
    }
}

impl Neg for SatBalance {
    type Output = Self;

    fn neg(self) -> Self {
        SatBalance(-self.0)
    }
}

impl Mul<usize> for SatBalance {
    type Output = Option<SatBalance>;

    fn mul(self, rhs: usize) -> Option<SatBalance> {
        let rhs: i64 = rhs.try_into().ok()?;
        self.0
            .checked_mul(rhs)
            .and_then(|i| SatBalance::try_from(i).ok())
    }
}

/// A type-safe representation of some nonnegative amount of BSV.
///
/// A Satoshis value can only be constructed from an integer that is within the valid
/// monetary range of `{0..MAX_MONEY}` (where `MAX_MONEY` = 21,000,000 × 10⁸ satoshis).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Satoshis(u64);

impl Satoshis {
    /// Returns the identity `Satoshis`
    pub const ZERO: Self = Satoshis(0);

    /// Returns this Satoshis as a u64.
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Creates a Satoshis from a u64.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_u64(amount: u64) -> Result<Self, BalanceError> {
        if (0..=MAX_MONEY).contains(&amount) {
            Ok(Satoshis(amount))
        } else {
            Err(BalanceError::Overflow)
        }
    }

    /// Creates a constant Satoshis from a u64.
    ///
    /// Panics: if the amount is outside the range `{0..MAX_MONEY}`.
    pub const fn const_from_u64(amount: u64) -> Self {
        assert!(amount <= MAX_MONEY); // contains is not const
        Satoshis(amount)
    }

    /// Creates a Satoshis from an i64.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_nonnegative_i64(amount: i64) -> Result<Self, BalanceError> {
        u64::try_from(amount)
            .map_err(|_| BalanceError::Underflow)
            .and_then(Self::from_u64)
    }

    /// Reads a Satoshis from an unsigned 64-bit little-endian integer.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_u64_le_bytes(bytes: [u8; 8]) -> Result<Self, BalanceError> {
        let amount = u64::from_le_bytes(bytes);
        Self::from_u64(amount)
    }

    /// Returns this Satoshis encoded as an unsigned 64-bit little-endian value.
    pub fn to_u64_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Returns whether or not this `Satoshis` is the zero value.
    pub fn is_zero(&self) -> bool {
        self == &Satoshis::ZERO
    }

    /// Returns whether or not this `Satoshis` is positive.
    pub fn is_positive(&self) -> bool {
        self > &Satoshis::ZERO
    }
}

impl From<Satoshis> for SatBalance {
    fn from(n: Satoshis) -> Self {
        SatBalance(n.0 as i64)
    }
}

impl From<&Satoshis> for SatBalance {
    fn from(n: &Satoshis) -> Self {
        SatBalance(n.0 as i64)
    }
}

impl From<Satoshis> for u64 {
    fn from(n: Satoshis) -> Self {
        n.into_u64()
    }
}

impl TryFrom<u64> for Satoshis {
    type Error = BalanceError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Satoshis::from_u64(value)
    }
}

impl TryFrom<SatBalance> for Satoshis {
    type Error = BalanceError;

    fn try_from(value: SatBalance) -> Result<Self, Self::Error> {
        Satoshis::from_nonnegative_i64(value.0)
    }
}

impl Add<Satoshis> for Satoshis {
    type Output = Option<Satoshis>;

    fn add(self, rhs: Satoshis) -> Option<Satoshis> {
        Self::from_u64(self.0.checked_add(rhs.0)?).ok()
    }
}

impl Add<Satoshis> for Option<Satoshis> {
    type Output = Self;

    fn add(self, rhs: Satoshis) -> Option<Satoshis> {
        self.and_then(|lhs| lhs + rhs)
    }
}

impl Sub<Satoshis> for Satoshis {
    type Output = Option<Satoshis>;

    fn sub(self, rhs: Satoshis) -> Option<Satoshis> {
        Satoshis::from_u64(self.0.checked_sub(rhs.0)?).ok()
    }
}

impl Sub<Satoshis> for Option<Satoshis> {
    type Output = Self;

    fn sub(self, rhs: Satoshis) -> Option<Satoshis> {
        self.and_then(|lhs| lhs - rhs)
    }
}

impl Mul<usize> for Satoshis {
    type Output = Option<Self>;

    fn mul(self, rhs: usize) -> Option<Satoshis> {
        Satoshis::from_u64(self.0.checked_mul(u64::try_from(rhs).ok()?)?).ok()
    }
}

impl Sum<Satoshis> for Option<Satoshis> {
    fn sum<I: Iterator<Item = Satoshis>>(iter: I) -> Self {
        iter.fold(Some(Satoshis::ZERO), |acc, a| acc? + a)
    }
}

impl<'a> Sum<&'a Satoshis> for Option<Satoshis> {
    fn sum<I: Iterator<Item = &'a Satoshis>>(iter: I) -> Self {
        iter.fold(Some(Satoshis::ZERO), |acc, a| acc? + *a)
    }
}

/// A type for balance violations in amount addition and subtraction
/// (overflow and underflow of allowed ranges)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BalanceError {
    Overflow,
    Underflow,
}

impl error::Error for BalanceError {}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            BalanceError::Overflow => {
                write!(
                    f,
                    "Amount addition resulted in a value outside the valid range."
                )
            }
            BalanceError::Underflow => write!(
                f,
                "Amount subtraction resulted in a value outside the valid range."
            ),
        }
    }
}

impl From<Infallible> for BalanceError {
    fn from(_value: Infallible) -> Self {
        unreachable!()
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::prop_compose;

    use super::{SatBalance, Satoshis, MAX_BALANCE, MAX_MONEY};

    prop_compose! {
        pub fn arb_sat_balance()(amt in -MAX_BALANCE..MAX_BALANCE) -> SatBalance {
            SatBalance::from_i64(amt).unwrap()
        }
    }

    prop_compose! {
        pub fn arb_positive_sat_balance()(amt in 1i64..MAX_BALANCE) -> SatBalance {
            SatBalance::from_i64(amt).unwrap()
        }
    }

    prop_compose! {
        pub fn arb_satoshis()(amt in 0u64..MAX_MONEY) -> Satoshis {
            Satoshis::from_u64(amt).unwrap()
        }
    }
}
