//! Store counters
//!
//! Every fault in the dispatch pipeline lands in a counter rather than an
//! error: duplicates, gaps, rejected payloads, buffer overflows. Counters
//! are plain integers; the store is single-threaded by contract.

use std::collections::BTreeMap;

/// Counters for the dispatch pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    /// Events applied through a reducer (live or from the buffer).
    pub events_applied: u64,
    /// Dispatched events dropped as duplicates (by id, or by sequence at or
    /// behind the cursor on a non-snapshot).
    pub events_ignored: u64,
    /// Deltas that arrived beyond the expected sequence on a live stream.
    pub gaps_detected: u64,
    /// Snapshots applied (also counted in `events_applied`).
    pub snapshots_applied: u64,
    /// Buffer overflows that forced a full stream resynchronisation.
    pub buffer_overflows: u64,
    /// Events dropped because their payload did not fit their channel.
    pub payloads_rejected: u64,
}

impl StoreMetrics {
    /// Export as a sorted map for scraping or logging.
    pub fn export(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("buffer_overflows", self.buffer_overflows),
            ("events_applied", self.events_applied),
            ("events_ignored", self.events_ignored),
            ("gaps_detected", self.gaps_detected),
            ("payloads_rejected", self.payloads_rejected),
            ("snapshots_applied", self.snapshots_applied),
        ])
    }
}
