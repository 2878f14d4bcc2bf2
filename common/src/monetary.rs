//! Monetary types for the wallet ledger.
//!
//! Amounts are held as signed integers of minor units (hundredths). Decimal
//! values only appear at the edges: parsing user input, display and
//! serialization.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits carried by an [`Amount`].
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Minor units in one major unit.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Errors raised while converting or combining amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// The value has more fractional digits than the ledger keeps.
    #[error("Amount {0} has more than two decimal places")]
    TooPrecise(Decimal),

    /// The value does not fit in the minor-unit representation.
    #[error("Amount out of range")]
    Overflow,

    /// The input is not a decimal number.
    #[error("Invalid amount: {0}")]
    Parse(String),
}

/// A signed fixed-point amount in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Create from a count of minor units.
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Create from a whole number of major units.
    pub fn from_major(major: i64) -> Result<Self, AmountError> {
        major
            .checked_mul(MINOR_UNITS_PER_MAJOR)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Convert a decimal value, rejecting excess precision.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.normalize().scale() > MINOR_UNIT_SCALE {
            return Err(AmountError::TooPrecise(value));
        }

        value
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .and_then(|minor| minor.to_i64())
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Get the raw minor-unit count.
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Get the value as a decimal with two fractional digits.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, MINOR_UNIT_SCALE)
    }

    /// Check if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Check if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Add two amounts.
    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Subtract `other` from this amount.
    pub fn checked_sub(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Flip the sign.
    pub fn checked_neg(self) -> Result<Amount, AmountError> {
        self.0.checked_neg().map(Amount).ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| AmountError::Parse(e.to_string()))?;
        Self::from_decimal(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_decimal(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.to_decimal()
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Amount::from_decimal(value).map_err(serde::de::Error::custom)
    }
}
