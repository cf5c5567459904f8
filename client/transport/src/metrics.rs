//! Transport counters
//!
//! Shared between the caller and the driver task, so counters are atomics.
//! Exported as a sorted map for scraping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the transport client.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Successful `connected` handshakes.
    pub connections_established: AtomicU64,
    /// Reconnect attempts scheduled after unexpected closes.
    pub reconnects_scheduled: AtomicU64,
    /// Frames parsed and processed.
    pub frames_received: AtomicU64,
    /// Malformed frames dropped.
    pub frames_dropped: AtomicU64,
    /// Events handed to channel handlers.
    pub events_delivered: AtomicU64,
    /// Server error frames surfaced via the error handlers.
    pub errors_surfaced: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_surfaced.fetch_add(1, Ordering::Relaxed);
    }

    /// Export as a sorted map for scraping or logging.
    pub fn export(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("connections_established", self.connections_established.load(Ordering::Relaxed)),
            ("errors_surfaced", self.errors_surfaced.load(Ordering::Relaxed)),
            ("events_delivered", self.events_delivered.load(Ordering::Relaxed)),
            ("frames_dropped", self.frames_dropped.load(Ordering::Relaxed)),
            ("frames_received", self.frames_received.load(Ordering::Relaxed)),
            ("reconnects_scheduled", self.reconnects_scheduled.load(Ordering::Relaxed)),
        ])
    }
}
