//! Identifier types for entities received from the exchange
//!
//! All identifiers are issued by the server and treated as opaque strings:
//! the client never parses or generates them, only compares and displays
//! them. Newtypes keep the different id spaces from mixing.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Unique identifier of a pushed event, used for duplicate suppression.
    EventId
}

string_id! {
    /// Identifier of an order belonging to the authenticated account.
    OrderId
}

string_id! {
    /// Identifier of an executed trade on the public tape.
    TradeId
}

string_id! {
    /// Identifier of the authenticated account.
    AccountId
}

string_id! {
    /// Market symbol (e.g. `BTC_USD`), stored verbatim as received.
    Symbol
}
