//! Heartbeat liveness tracking
//!
//! The server pings roughly every 15 seconds; the client answers each ping
//! with a pong and treats 20 seconds of silence (interval plus tolerance) as
//! a dead connection, closing locally with code 4000 so the reconnect path
//! takes over.
//!
//! The monitor takes instants as arguments rather than reading the clock,
//! so timeout behaviour is testable without timers.

use std::time::{Duration, Instant};

/// Expected interval between server pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(15);
/// Grace period on top of the interval.
pub const PING_TOLERANCE: Duration = Duration::from_secs(5);
/// Close code used when the server goes silent.
pub const HEARTBEAT_CLOSE_CODE: u16 = 4000;

/// Total silence budget before the connection is declared dead.
pub fn heartbeat_timeout() -> Duration {
    PING_INTERVAL + PING_TOLERANCE
}

/// Tracks the last observed server ping.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_ping: Instant,
}

impl LivenessMonitor {
    /// Start the clock at connection establishment.
    pub fn new(now: Instant) -> Self {
        Self {
            timeout: heartbeat_timeout(),
            last_ping: now,
        }
    }

    /// Record a server ping.
    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping = now;
    }

    /// Instant at which silence becomes fatal.
    pub fn deadline(&self) -> Instant {
        self.last_ping + self.timeout
    }

    /// Whether the server has been silent past the budget.
    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_monitor_is_live() {
        let start = Instant::now();
        let monitor = LivenessMonitor::new(start);
        assert!(!monitor.is_stale(start + Duration::from_secs(19)));
    }

    #[test]
    fn test_silence_past_budget_is_stale() {
        let start = Instant::now();
        let monitor = LivenessMonitor::new(start);
        assert!(monitor.is_stale(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_ping_extends_deadline() {
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(start);

        let ping_at = start + Duration::from_secs(15);
        monitor.record_ping(ping_at);

        assert!(!monitor.is_stale(start + Duration::from_secs(30)));
        assert!(monitor.is_stale(ping_at + Duration::from_secs(20)));
    }
}
