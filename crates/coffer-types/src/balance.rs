//! Non-negative integer balances.
//!
//! A balance is a whole number of currency units. There is no fractional
//! part and no decimal arithmetic: the authoritative value is an `i64`
//! (matching the `BIGINT` column it is persisted to) that is never negative.

use serde::{Deserialize, Serialize};

/// Rejected attempt to create or store a negative balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("balance must not be negative, got {attempted}")]
pub struct NegativeBalance {
    /// The value that was rejected.
    pub attempted: i64,
}

/// A non-negative account balance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Balance(i64);

impl Balance {
    /// The balance every new account starts with.
    pub const ZERO: Self = Self(0);

    /// Create a balance, rejecting negative amounts.
    ///
    /// # Errors
    ///
    /// Returns [`NegativeBalance`] if `amount < 0`.
    pub const fn new(amount: i64) -> Result<Self, NegativeBalance> {
        if amount < 0 {
            return Err(NegativeBalance { attempted: amount });
        }
        Ok(Self(amount))
    }

    /// Return the raw amount.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Balance {
    type Error = NegativeBalance;

    fn try_from(amount: i64) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl core::fmt::Display for Balance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_zero_and_positive() {
        assert_eq!(Balance::new(0), Ok(Balance::ZERO));
        assert_eq!(Balance::new(500).map(Balance::get), Ok(500));
        assert_eq!(Balance::new(i64::MAX).map(Balance::get), Ok(i64::MAX));
    }

    #[test]
    fn rejects_negative() {
        assert_eq!(Balance::new(-1), Err(NegativeBalance { attempted: -1 }));
        assert!(Balance::try_from(i64::MIN).is_err());
    }

    #[test]
    fn deserialize_enforces_invariant() {
        let ok: Result<Balance, _> = serde_json::from_str("42");
        assert_eq!(ok.ok(), Balance::new(42).ok());

        let bad: Result<Balance, _> = serde_json::from_str("-3");
        assert!(bad.is_err());
    }

    #[test]
    fn displays_as_integer() {
        assert_eq!(Balance::new(1234).map(|b| b.to_string()).ok().as_deref(), Some("1234"));
    }
}
