//! Stream sequence numbers and event timestamps
//!
//! Sequences are strictly-positive integers that the server transports as
//! decimal strings, because they can exceed 2^53 and JSON consumers that
//! read numbers as 64-bit floats would silently corrupt them. Here they are
//! held as exact `u64` integers; comparison and increment are integer
//! operations. Deserialization accepts either form (string or integer) since
//! replay batches from older gateways emit bare integers.

use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of an event in its stream.
///
/// `Sequence::ZERO` means "no event applied yet"; server-issued sequences
/// are always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sequence(u64);

impl Sequence {
    /// The initial cursor value: no event applied.
    pub const ZERO: Sequence = Sequence(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The sequence expected immediately after this one.
    pub fn next(&self) -> Sequence {
        Sequence(self.0 + 1)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Sequence {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Sequence(s.parse()?))
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Sequence(value)
    }
}

impl Serialize for Sequence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct SequenceVisitor;

impl<'de> Visitor<'de> for SequenceVisitor {
    type Value = Sequence;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence number as a decimal string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Sequence, E> {
        v.parse().map(Sequence).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Sequence, E> {
        Ok(Sequence(v))
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(SequenceVisitor)
    }
}

/// Unix-epoch nanosecond timestamp, transported as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimestampNs(i64);

impl TimestampNs {
    pub fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimestampNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TimestampNs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = TimestampNs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a nanosecond timestamp as a decimal string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TimestampNs, E> {
        v.parse().map(TimestampNs).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TimestampNs, E> {
        Ok(TimestampNs(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TimestampNs, E> {
        i64::try_from(v).map(TimestampNs).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for TimestampNs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_next() {
        assert_eq!(Sequence::ZERO.next(), Sequence::new(1));
        assert_eq!(Sequence::new(100).next(), Sequence::new(101));
    }

    #[test]
    fn test_sequence_serializes_as_string() {
        let seq = Sequence::new(101);
        assert_eq!(serde_json::to_string(&seq).unwrap(), "\"101\"");
    }

    #[test]
    fn test_sequence_deserializes_from_string_or_integer() {
        let from_str: Sequence = serde_json::from_str("\"101\"").unwrap();
        let from_int: Sequence = serde_json::from_str("101").unwrap();
        assert_eq!(from_str, from_int);
    }

    #[test]
    fn test_sequence_exact_beyond_f64_precision() {
        // 2^53 + 1 is not representable as f64; must survive exactly
        let raw = (1u64 << 53) + 1;
        let json = format!("\"{}\"", raw);
        let seq: Sequence = serde_json::from_str(&json).unwrap();
        assert_eq!(seq.value(), raw);
        assert_eq!(serde_json::to_string(&seq).unwrap(), json);
    }

    #[test]
    fn test_sequence_rejects_garbage() {
        assert!(serde_json::from_str::<Sequence>("\"abc\"").is_err());
        assert!(serde_json::from_str::<Sequence>("\"-1\"").is_err());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = TimestampNs::new(1708123456789000000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1708123456789000000\"");
        let back: TimestampNs = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }
}
