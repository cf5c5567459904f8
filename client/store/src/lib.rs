//! Event-sourced state store
//!
//! Consumes the authenticated event stream and maintains deterministic
//! in-memory projections:
//! - Order books (bids descending, asks ascending) per symbol
//! - Tickers per symbol
//! - A bounded public trade tape per symbol
//! - The authenticated account's balances and open orders
//!
//! The dispatch pipeline deduplicates events, tracks per-stream sequence
//! cursors, buffers deltas that arrive ahead of their stream, and requests
//! snapshot replay from the transport when a gap cannot be closed locally.
//!
//! ```text
//! Event
//!   │
//! ┌─▼────────┐   bad payload → dropped (counted)
//! │Interpret │
//! └─┬────────┘
//! ┌─▼────────┐   duplicate → ignored (counted)
//! │Dedupe/Seq│
//! └─┬────────┘
//!   ├─ in order ──► reducer ──► buffer flush ──► notify
//!   └─ ahead ─────► buffer ──► snapshot request
//! ```
//!
//! Reducers are pure: current projection in, new projection out. The store
//! never panics into the caller; every fault becomes a metric or a recovery
//! request.

pub mod account;
pub mod book;
pub mod buffer;
pub mod cursor;
pub mod key;
pub mod metrics;
pub mod payload;
pub mod store;
pub mod tape;
pub mod ticker;

pub use key::DomainKey;
pub use store::{SnapshotRequest, StateChange, Store, StoreConfig};
