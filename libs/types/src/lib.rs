//! Shared domain types for the client state core
//!
//! Identifiers, decimal-as-string numeric types, sequence numbers, and the
//! canonical event envelope exchanged between the transport client and the
//! state store. Both components depend on this crate and on nothing of each
//! other.
//!
//! # Modules
//! - `ids`: opaque server-issued identifiers (EventId, OrderId, ...)
//! - `numeric`: decimal-as-string types (Price, Quantity, Amount)
//! - `sequence`: exact integer stream sequence numbers and timestamps
//! - `order`: order side / status / per-account order record
//! - `event`: the canonical event envelope and channel names

pub mod event;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod sequence;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::event::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::sequence::*;
}
