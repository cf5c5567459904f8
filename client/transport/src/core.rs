//! Sans-IO connection core
//!
//! The full connect / authenticate / subscribe / heartbeat / reconnect
//! logic as a state machine with no socket, no clock, and no futures:
//! inputs are observed frames and socket transitions, outputs are
//! `CoreAction`s for the driver to perform. Everything the transport
//! guarantees is testable here without a server.
//!
//! State machine:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──connected──► Authenticated
//!      ▲                          ▲                          │
//!      │                          │ backoff elapsed          │ unexpected close
//!      └──────disconnect()────────┴────── Reconnecting ◄─────┘
//! ```

use crate::backoff::Backoff;
use crate::error::{SubscribeError, TransportError};
use crate::heartbeat::HEARTBEAT_CLOSE_CODE;
use crate::protocol::{ClientFrame, Params, ServerFrame};
use crate::subscription::{SubscriptionKey, SubscriptionTable};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::event::{Channel, Event};
use types::sequence::Sequence;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Reconnecting,
}

/// What the driver must do in response to an input.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreAction {
    /// Write a frame to the socket.
    Send(ClientFrame),
    /// Close the socket with the given code.
    Close { code: u16, reason: &'static str },
    /// Open a new socket after the delay.
    ScheduleReconnect { delay: Duration },
    /// Hand an event to the registered channel handlers.
    Deliver(Event),
    /// Resolve the pending subscribe for this key.
    SubscribeResolved { key: SubscriptionKey },
    /// Reject the pending subscribe for this key.
    SubscribeRejected {
        key: SubscriptionKey,
        error: SubscribeError,
    },
    /// Invoke the registered error handlers.
    SurfaceError(TransportError),
    /// The server acknowledged the session; `connect()` resolves.
    Established { session_id: String },
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Already acknowledged on this connection; resolve immediately.
    AlreadyActive,
    /// Sent (or queued for the next connection); resolution follows the
    /// server's acknowledgement.
    Requested,
}

/// The transport state machine.
pub struct ConnectionCore {
    state: ConnectionState,
    intentional_close: bool,
    backoff: Backoff,
    subscriptions: SubscriptionTable,
    /// Subscribe attempts awaiting acknowledgement, oldest first. Server
    /// error frames carry no correlation id, so a non-rate-limit error
    /// rejects the oldest outstanding attempt.
    pending: VecDeque<SubscriptionKey>,
    session_id: Option<String>,
}

impl ConnectionCore {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            intentional_close: false,
            backoff: Backoff::new(),
            subscriptions: SubscriptionTable::new(),
            pending: VecDeque::new(),
            session_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Caller asked to connect.
    pub fn begin_connect(&mut self) {
        self.intentional_close = false;
        self.state = ConnectionState::Connecting;
    }

    /// A reconnect attempt is opening a socket.
    pub fn begin_reconnect_attempt(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The socket failed to open during a reconnect; schedule the next try.
    pub fn reconnect_attempt_failed(&mut self) -> CoreAction {
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff.next_delay();
        warn!(
            attempts = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "connection attempt failed, backing off"
        );
        CoreAction::ScheduleReconnect { delay }
    }

    /// The initial connect failed before authentication; back to idle.
    pub fn connect_failed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Process one parsed server frame.
    pub fn on_frame(&mut self, frame: ServerFrame) -> Vec<CoreAction> {
        match frame {
            ServerFrame::Connected { session_id } => self.on_connected(session_id),
            ServerFrame::Ping => vec![CoreAction::Send(ClientFrame::Pong)],
            ServerFrame::Subscribed {
                channel,
                params,
                snapshot_seq,
            } => self.on_subscribed(channel, params, snapshot_seq),
            ServerFrame::Unsubscribed { channel, params } => {
                debug!(channel = %channel, ?params, "unsubscribe acknowledged");
                Vec::new()
            }
            ServerFrame::SnapshotSinceResponse {
                channel,
                from_seq,
                to_seq,
                events,
            } => self.on_replay_batch(channel, from_seq, to_seq, events),
            ServerFrame::Error { code, message } => self.on_error_frame(code, message),
            ServerFrame::Event(event) => self.on_event(event),
        }
    }

    fn on_connected(&mut self, session_id: String) -> Vec<CoreAction> {
        self.state = ConnectionState::Authenticated;
        self.backoff.reset();
        info!(session_id = %session_id, "session established");
        self.session_id = Some(session_id.clone());

        let mut actions = vec![CoreAction::Established { session_id }];

        // Re-subscribe everything we know about, then ask for replay of
        // whatever each live stream missed while we were away.
        for (key, state) in self.subscriptions.iter() {
            actions.push(CoreAction::Send(ClientFrame::Subscribe {
                channel: key.channel,
                params: key.params.clone(),
            }));
            if !state.last_seq.is_zero() {
                actions.push(CoreAction::Send(ClientFrame::SnapshotSince {
                    channel: key.channel,
                    params: key.params.clone(),
                    last_seq: state.last_seq.value(),
                }));
            }
        }

        actions
    }

    fn on_subscribed(
        &mut self,
        channel: Channel,
        params: Params,
        snapshot_seq: Sequence,
    ) -> Vec<CoreAction> {
        let key = SubscriptionKey::new(channel, params);
        if !self.subscriptions.confirm(&key, snapshot_seq) {
            debug!(key = %key, "acknowledgement for unknown subscription");
            return Vec::new();
        }

        if let Some(position) = self.pending.iter().position(|pending| *pending == key) {
            self.pending.remove(position);
            vec![CoreAction::SubscribeResolved { key }]
        } else {
            // Ack from an automatic re-subscribe; nobody is waiting.
            Vec::new()
        }
    }

    fn on_replay_batch(
        &mut self,
        channel: Channel,
        from_seq: Sequence,
        to_seq: Sequence,
        events: Vec<Event>,
    ) -> Vec<CoreAction> {
        let out_of_bracket = events
            .iter()
            .filter(|e| e.sequence < from_seq || e.sequence > to_seq)
            .count();
        if out_of_bracket > 0 {
            warn!(
                channel = %channel,
                from = from_seq.value(),
                to = to_seq.value(),
                out_of_bracket,
                "replay batch contains events outside its declared range"
            );
        }
        debug!(
            channel = %channel,
            from = from_seq.value(),
            to = to_seq.value(),
            count = events.len(),
            "replaying recovery batch"
        );

        // Replayed events flow through the same path as live ones.
        events.into_iter().flat_map(|e| self.on_event(e)).collect()
    }

    fn on_error_frame(&mut self, code: String, message: String) -> Vec<CoreAction> {
        // Rate limiting never touches subscription state.
        if code == "RATE_LIMIT_EXCEEDED" || self.pending.is_empty() {
            return vec![CoreAction::SurfaceError(TransportError::Server { code, message })];
        }

        // No correlation id on the wire: attribute to the oldest
        // outstanding subscribe attempt.
        match self.pending.pop_front() {
            Some(key) => {
                self.subscriptions.remove(&key);
                vec![CoreAction::SubscribeRejected {
                    key,
                    error: SubscribeError::Rejected { code, message },
                }]
            }
            None => vec![CoreAction::SurfaceError(TransportError::Server { code, message })],
        }
    }

    fn on_event(&mut self, event: Event) -> Vec<CoreAction> {
        let symbol = event.payload.get("symbol").and_then(|v| v.as_str());
        self.subscriptions
            .observe_event(event.source, symbol, event.sequence);
        vec![CoreAction::Deliver(event)]
    }

    /// The socket closed. Unexpected closes schedule a reconnect;
    /// intentional ones land in the terminal `Disconnected` state.
    pub fn on_socket_closed(&mut self) -> Vec<CoreAction> {
        self.subscriptions.mark_all_unconfirmed();
        self.session_id = None;

        if self.intentional_close {
            self.state = ConnectionState::Disconnected;
            return Vec::new();
        }

        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff.next_delay();
        warn!(delay_ms = delay.as_millis() as u64, "connection lost, scheduling reconnect");
        vec![CoreAction::ScheduleReconnect { delay }]
    }

    /// The server went silent past the heartbeat budget.
    pub fn on_heartbeat_timeout(&mut self) -> Vec<CoreAction> {
        warn!("no ping within heartbeat budget, closing connection");
        vec![CoreAction::Close {
            code: HEARTBEAT_CLOSE_CODE,
            reason: "heartbeat timeout",
        }]
    }

    /// Caller requested a subscription.
    pub fn request_subscribe(
        &mut self,
        channel: Channel,
        params: Params,
    ) -> (SubscribeOutcome, Vec<CoreAction>) {
        let key = SubscriptionKey::new(channel, params.clone());
        if self.subscriptions.is_confirmed(&key) {
            return (SubscribeOutcome::AlreadyActive, Vec::new());
        }

        self.subscriptions.register(key.clone());
        if !self.pending.contains(&key) {
            self.pending.push_back(key.clone());
        }

        // Off-line requests wait in the table; the connected handshake
        // re-subscribes them.
        let actions = if self.is_authenticated() {
            vec![CoreAction::Send(ClientFrame::Subscribe { channel, params })]
        } else {
            Vec::new()
        };
        (SubscribeOutcome::Requested, actions)
    }

    /// Caller requested an unsubscribe: local state goes unconditionally,
    /// the frame is fire-and-forget.
    pub fn request_unsubscribe(&mut self, channel: Channel, params: Params) -> Vec<CoreAction> {
        let key = SubscriptionKey::new(channel, params.clone());
        self.subscriptions.remove(&key);
        self.pending.retain(|pending| *pending != key);

        if self.is_authenticated() {
            vec![CoreAction::Send(ClientFrame::Unsubscribe { channel, params })]
        } else {
            Vec::new()
        }
    }

    /// Store-initiated replay request.
    pub fn request_snapshot_since(
        &mut self,
        channel: Channel,
        params: Params,
        last_seq: u64,
    ) -> Vec<CoreAction> {
        if self.is_authenticated() {
            vec![CoreAction::Send(ClientFrame::SnapshotSince {
                channel,
                params,
                last_seq,
            })]
        } else {
            // The reconnect handshake replays cursors anyway.
            Vec::new()
        }
    }

    /// Caller requested a clean shutdown: close with 1000, cancel pending
    /// subscribes, never reconnect.
    pub fn request_disconnect(&mut self) -> Vec<CoreAction> {
        self.intentional_close = true;
        self.state = ConnectionState::Disconnected;
        self.session_id = None;
        self.subscriptions.mark_all_unconfirmed();

        let mut actions: Vec<CoreAction> = self
            .pending
            .drain(..)
            .map(|key| CoreAction::SubscribeRejected {
                key,
                error: SubscribeError::Cancelled,
            })
            .collect();
        actions.push(CoreAction::Close {
            code: 1000,
            reason: "client disconnect",
        });
        actions
    }

    pub fn is_intentionally_closed(&self) -> bool {
        self.intentional_close
    }
}

impl Default for ConnectionCore {
    fn default() -> Self {
        Self::new()
    }
}
