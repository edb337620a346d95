use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;

/// A derived wallet balance in the smallest currency unit.
///
/// Balances are never persisted; they are the sum of a wallet's ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub i64);

/// A strictly positive transfer amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, LedgerError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::InvalidAmount(value))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Neg for Amount {
    type Output = i64;

    fn neg(self) -> i64 {
        -self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.0
    }

    /// Sums entry amounts, or `None` when the total does not fit in an `i64`.
    ///
    /// Partial sums are widened, so the order of entries never matters.
    pub fn from_amounts<I: IntoIterator<Item = i64>>(amounts: I) -> Option<Self> {
        let total: i128 = amounts.into_iter().map(i128::from).sum();
        i64::try_from(total).ok().map(Self)
    }

    /// The balance after posting `delta`, or `None` on overflow.
    pub fn checked_add(self, delta: i64) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
