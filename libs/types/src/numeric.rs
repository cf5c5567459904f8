//! Decimal-as-string numeric types
//!
//! Uses rust_decimal so the client holds exact decimal values (no
//! floating-point drift). All three types serialize as JSON strings to
//! prevent precision loss in transit, mirroring the wire contract.
//!
//! The client core performs no money arithmetic: these types expose parsing,
//! comparison, and display only. The two comparison semantics are distinct
//! on purpose: equality is string-exact (`"1.5"` and `"1.50"` are different
//! values, as transported), while ordering (for sorting book levels) is the
//! numeric ordering of the inner decimal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Price of a book level or trade.
///
/// Must be strictly positive. Serialized as a string.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Price(Decimal);

/// Equality is string-exact; `"1.50"` and `"1.5"` differ even though they
/// order as equal.
impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

impl Eq for Price {}

impl Price {
    /// Try to create a Price, returning None if not strictly positive.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Create from integer (for testing/convenience).
    ///
    /// # Panics
    /// Panics if the value is zero.
    pub fn from_u64(value: u64) -> Self {
        Self::try_new(Decimal::from(value)).expect("price must be positive")
    }

    /// Get the inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s)?;
        Self::try_new(decimal).ok_or(rust_decimal::Error::LessThanMinimumPossibleValue)
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decimal = Decimal::from_str(&s).map_err(serde::de::Error::custom)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("price must be positive"))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantity at a book level or in a trade.
///
/// Non-negative; zero is meaningful on the wire (a delta level with quantity
/// "0" removes that price from the book). Serialized as a string.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Quantity(Decimal);

/// Equality is string-exact, like [`Price`].
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

impl Eq for Quantity {}

impl Quantity {
    /// Try to create a Quantity, returning None if negative.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    /// The zero quantity (level-removal marker).
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Create from integer (for testing/convenience).
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Get the inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether this is the removal marker.
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }
}

impl FromStr for Quantity {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s)?;
        Self::try_new(decimal).ok_or(rust_decimal::Error::LessThanMinimumPossibleValue)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decimal = Decimal::from_str(&s).map_err(serde::de::Error::custom)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("quantity cannot be negative"))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative monetary amount: account balances and ticker statistics.
///
/// Serialized as a string.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

/// Equality is string-exact, like [`Price`].
impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

impl Eq for Amount {}

impl Amount {
    /// Try to create an Amount, returning None if negative.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    /// The zero amount (default for absent ticker fields).
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Create from integer (for testing/convenience).
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Get the inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s)?;
        Self::try_new(decimal).ok_or(rust_decimal::Error::LessThanMinimumPossibleValue)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decimal = Decimal::from_str(&s).map_err(serde::de::Error::custom)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("amount cannot be negative"))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
