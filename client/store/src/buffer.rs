//! Pending delta buffer for out-of-order arrivals
//!
//! Deltas that land ahead of their stream's expected sequence, or before the
//! initial snapshot, wait here until the missing events arrive. The buffer
//! is strictly bounded; a push that would exceed the cap is refused and the
//! store responds by clearing the buffer and forcing a full
//! resynchronisation of the stream.

use crate::payload::Payload;
use types::event::Event;

/// A buffered delta together with its already-interpreted payload, so a
/// flush does not re-parse JSON.
#[derive(Debug, Clone)]
pub struct BufferedDelta {
    pub event: Event,
    pub payload: Payload,
}

/// Bounded per-stream buffer of deltas awaiting their predecessors.
#[derive(Debug, Clone)]
pub struct DeltaBuffer {
    entries: Vec<BufferedDelta>,
    capacity: usize,
}

impl DeltaBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Buffer a delta. Returns `false` if the buffer is at capacity; the
    /// caller must then clear and resynchronise.
    #[must_use]
    pub fn push(&mut self, entry: BufferedDelta) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Sort entries into ascending sequence order for the flush scan.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.event.sequence.cmp(&b.event.sequence));
    }

    /// The lowest-sequence entry, once sorted.
    pub fn front(&self) -> Option<&BufferedDelta> {
        self.entries.first()
    }

    /// Remove and return the lowest-sequence entry, once sorted.
    pub fn pop_front(&mut self) -> Option<BufferedDelta> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BookLevels, Payload};
    use serde_json::json;
    use types::event::{Channel, EventKind};
    use types::ids::{EventId, Symbol};
    use types::sequence::{Sequence, TimestampNs};

    fn make_entry(seq: u64) -> BufferedDelta {
        BufferedDelta {
            event: Event {
                event_id: EventId::new(format!("evt-{seq}")),
                event_type: EventKind::Delta,
                sequence: Sequence::new(seq),
                timestamp: TimestampNs::new(0),
                source: Channel::MarketData,
                payload: json!({}),
                metadata: None,
            },
            payload: Payload::BookDelta(BookLevels {
                symbol: Symbol::new("BTC_USD"),
                bids: None,
                asks: None,
            }),
        }
    }

    #[test]
    fn test_push_refused_at_capacity() {
        let mut buf = DeltaBuffer::new(2);
        assert!(buf.push(make_entry(1)));
        assert!(buf.push(make_entry(2)));
        assert!(!buf.push(make_entry(3)));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_sort_orders_by_sequence() {
        let mut buf = DeltaBuffer::new(10);
        for seq in [5, 1, 3] {
            assert!(buf.push(make_entry(seq)));
        }
        buf.sort();
        assert_eq!(buf.front().unwrap().event.sequence, Sequence::new(1));

        let seqs: Vec<u64> = std::iter::from_fn(|| buf.pop_front())
            .map(|e| e.event.sequence.value())
            .collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    #[test]
    fn test_clear() {
        let mut buf = DeltaBuffer::new(10);
        assert!(buf.push(make_entry(1)));
        buf.clear();
        assert!(buf.is_empty());
    }
}
