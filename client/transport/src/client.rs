//! Tokio WebSocket driver
//!
//! Owns the socket and drives the sans-IO `ConnectionCore`: it opens
//! connections (fetching a fresh token for every attempt), pumps frames
//! through the parser and the core, performs the core's actions, enforces
//! the heartbeat budget, and sleeps out reconnect backoff while staying
//! responsive to commands.
//!
//! The caller talks to the driver over a command channel; `connect()` and
//! `subscribe()` await oneshot resolutions that the driver completes when
//! the corresponding server acknowledgement arrives.

use crate::core::{ConnectionCore, CoreAction, SubscribeOutcome};
use crate::error::{SubscribeError, TransportError};
use crate::heartbeat::heartbeat_timeout;
use crate::metrics::TransportMetrics;
use crate::protocol::{parse_frame, Params, ServerFrame};
use crate::subscription::SubscriptionKey;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use types::event::{Channel, Event};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Future returned by a token provider.
pub type TokenFuture = Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send>>;

/// Supplies a fresh authentication token before every connection attempt.
///
/// Tokens are never cached by the transport; the provider is consulted on
/// the initial connect and on every reconnect.
pub trait TokenProvider: Send + Sync + 'static {
    fn fetch(&self) -> TokenFuture;
}

/// Fixed token provider for demos and tests.
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn fetch(&self) -> TokenFuture {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint, e.g. `wss://stream.example.com/v1`.
    pub url: String,
}

pub type EventHandler = Box<dyn Fn(Event) + Send + Sync>;
pub type ErrorHandler = Box<dyn Fn(&TransportError) + Send + Sync>;

enum Command {
    Connect {
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Disconnect,
    Subscribe {
        channel: Channel,
        params: Params,
        done: oneshot::Sender<Result<(), SubscribeError>>,
    },
    Unsubscribe {
        channel: Channel,
        params: Params,
    },
    SnapshotSince {
        channel: Channel,
        params: Params,
        last_seq: u64,
    },
    OnEvent {
        channel: Channel,
        handler: EventHandler,
    },
    OnError {
        handler: ErrorHandler,
    },
}

/// Handle to the transport driver task. Cheap to clone; all clones talk to
/// the same driver.
#[derive(Clone)]
pub struct WsClient {
    commands: mpsc::UnboundedSender<Command>,
    metrics: Arc<TransportMetrics>,
}

impl WsClient {
    /// Spawn the driver task. The client is usable immediately; nothing
    /// touches the network until `connect()`.
    pub fn new(config: TransportConfig, token_provider: Arc<dyn TokenProvider>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(TransportMetrics::new());

        let driver = Driver {
            config,
            token_provider,
            core: ConnectionCore::new(),
            metrics: Arc::clone(&metrics),
            event_handlers: HashMap::new(),
            error_handlers: Vec::new(),
            pending_subscribes: HashMap::new(),
            connect_waiter: None,
            reconnect_delay: None,
        };
        tokio::spawn(driver.run(command_rx));

        Self { commands, metrics }
    }

    /// Open a connection and resolve once the server's `connected` frame
    /// has been observed.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Connect { done })
            .map_err(|_| TransportError::ConnectionClosed)?;
        wait.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    /// Close cleanly and cancel any scheduled reconnect. Terminal.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Subscribe and resolve on the server's acknowledgement for exactly
    /// this (channel, params) pair. Idempotent for active subscriptions.
    pub async fn subscribe(&self, channel: Channel, params: Params) -> Result<(), SubscribeError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                channel,
                params,
                done,
            })
            .map_err(|_| SubscribeError::TransportClosed)?;
        wait.await.map_err(|_| SubscribeError::Cancelled)?
    }

    /// Fire-and-forget unsubscribe; local state is removed immediately.
    pub fn unsubscribe(&self, channel: Channel, params: Params) {
        let _ = self.commands.send(Command::Unsubscribe { channel, params });
    }

    /// Ask the server to replay everything after `last_seq` on a stream.
    pub fn snapshot_since(&self, channel: Channel, params: Params, last_seq: u64) {
        let _ = self.commands.send(Command::SnapshotSince {
            channel,
            params,
            last_seq,
        });
    }

    /// Register an event observer for one channel.
    pub fn on_event(&self, channel: Channel, handler: impl Fn(Event) + Send + Sync + 'static) {
        let _ = self.commands.send(Command::OnEvent {
            channel,
            handler: Box::new(handler),
        });
    }

    /// Register an error observer.
    pub fn on_error(&self, handler: impl Fn(&TransportError) + Send + Sync + 'static) {
        let _ = self.commands.send(Command::OnError {
            handler: Box::new(handler),
        });
    }

    pub fn metrics(&self) -> Arc<TransportMetrics> {
        Arc::clone(&self.metrics)
    }
}

enum SocketExit {
    /// `disconnect()` was requested; do not reconnect.
    Intentional,
    /// The connection died; reconnect after backoff.
    Lost,
    /// The command channel closed; the client was dropped.
    Shutdown,
}

enum BackoffOutcome {
    Elapsed,
    Cancelled,
    Shutdown,
}

struct Driver {
    config: TransportConfig,
    token_provider: Arc<dyn TokenProvider>,
    core: ConnectionCore,
    metrics: Arc<TransportMetrics>,
    event_handlers: HashMap<Channel, Vec<EventHandler>>,
    error_handlers: Vec<ErrorHandler>,
    pending_subscribes: HashMap<SubscriptionKey, Vec<oneshot::Sender<Result<(), SubscribeError>>>>,
    connect_waiter: Option<oneshot::Sender<Result<(), TransportError>>>,
    reconnect_delay: Option<Duration>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        'idle: loop {
            // Absorb commands until the caller asks to connect.
            loop {
                match commands.recv().await {
                    None => return,
                    Some(Command::Connect { done }) => {
                        self.connect_waiter = Some(done);
                        break;
                    }
                    Some(command) => self.handle_command_offline(command),
                }
            }
            self.core.begin_connect();

            'session: loop {
                let url = match self.handshake_url().await {
                    Ok(url) => url,
                    Err(err) => match self.attempt_failed(err, &mut commands).await {
                        BackoffOutcome::Elapsed => continue 'session,
                        BackoffOutcome::Cancelled => continue 'idle,
                        BackoffOutcome::Shutdown => return,
                    },
                };

                match connect_async(url.as_str()).await {
                    Ok((socket, _response)) => {
                        debug!(url = %self.config.url, "socket open, awaiting connected frame");
                        match self.drive_socket(socket, &mut commands).await {
                            SocketExit::Shutdown => return,
                            SocketExit::Intentional => continue 'idle,
                            SocketExit::Lost => match self.await_backoff(&mut commands).await {
                                BackoffOutcome::Elapsed => {
                                    self.core.begin_reconnect_attempt();
                                    continue 'session;
                                }
                                BackoffOutcome::Cancelled => continue 'idle,
                                BackoffOutcome::Shutdown => return,
                            },
                        }
                    }
                    Err(err) => {
                        let err = TransportError::Connect(err.to_string());
                        match self.attempt_failed(err, &mut commands).await {
                            BackoffOutcome::Elapsed => continue 'session,
                            BackoffOutcome::Cancelled => continue 'idle,
                            BackoffOutcome::Shutdown => return,
                        }
                    }
                }
            }
        }
    }

    /// A connection attempt failed before any frame was exchanged.
    ///
    /// The initial `connect()` rejects immediately (per its contract);
    /// reconnect attempts back off and retry. Returns `Cancelled` to drop
    /// back to idle.
    async fn attempt_failed(
        &mut self,
        err: TransportError,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> BackoffOutcome {
        if let Some(waiter) = self.connect_waiter.take() {
            warn!(error = %err, "connection attempt failed");
            let _ = waiter.send(Err(err));
            self.core.connect_failed();
            return BackoffOutcome::Cancelled;
        }

        warn!(error = %err, "reconnect attempt failed, backing off");
        let action = self.core.reconnect_attempt_failed();
        self.perform_offline(vec![action]);
        match self.await_backoff(commands).await {
            BackoffOutcome::Elapsed => {
                self.core.begin_reconnect_attempt();
                BackoffOutcome::Elapsed
            }
            other => other,
        }
    }

    /// Fetch a fresh token and build the handshake URL with it.
    async fn handshake_url(&self) -> Result<Url, TransportError> {
        let token = self.token_provider.fetch().await?;
        let mut url = Url::parse(&self.config.url)
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut().append_pair("token", &token);
        Ok(url)
    }

    /// Pump one socket until it dies or the caller disconnects.
    async fn drive_socket(
        &mut self,
        socket: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> SocketExit {
        let (mut sink, mut source): (WsSink, WsSource) = socket.split();
        let liveness = tokio::time::sleep(heartbeat_timeout());
        tokio::pin!(liveness);

        loop {
            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.metrics.record_frame();
                        match parse_frame(&text) {
                            Some(frame) => {
                                if matches!(frame, ServerFrame::Ping | ServerFrame::Connected { .. }) {
                                    liveness
                                        .as_mut()
                                        .reset(tokio::time::Instant::now() + heartbeat_timeout());
                                }
                                let actions = self.core.on_frame(frame);
                                if self.perform(actions, &mut sink).await.is_err() {
                                    self.socket_lost();
                                    return SocketExit::Lost;
                                }
                            }
                            None => {
                                self.metrics.record_dropped_frame();
                                debug!("dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        // protocol-level ping, distinct from the app-level one
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let intentional = self.core.is_intentionally_closed();
                        self.socket_lost();
                        return if intentional {
                            SocketExit::Intentional
                        } else {
                            SocketExit::Lost
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "socket error");
                        self.socket_lost();
                        return SocketExit::Lost;
                    }
                },
                _ = &mut liveness => {
                    let actions = self.core.on_heartbeat_timeout();
                    let _ = self.perform(actions, &mut sink).await;
                    self.socket_lost();
                    return SocketExit::Lost;
                },
                command = commands.recv() => match command {
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SocketExit::Shutdown;
                    }
                    Some(Command::Disconnect) => {
                        let actions = self.core.request_disconnect();
                        let _ = self.perform(actions, &mut sink).await;
                        self.cancel_connect_waiter();
                        info!("transport disconnected");
                        return SocketExit::Intentional;
                    }
                    Some(Command::Connect { done }) => {
                        if self.core.is_authenticated() {
                            let _ = done.send(Ok(()));
                        } else {
                            self.connect_waiter = Some(done);
                        }
                    }
                    Some(command) => {
                        let actions = self.command_actions(command);
                        if self.perform(actions, &mut sink).await.is_err() {
                            self.socket_lost();
                            return SocketExit::Lost;
                        }
                    }
                },
            }
        }
    }

    /// The socket is gone: run the core's close transition (which schedules
    /// the reconnect unless the close was intentional).
    fn socket_lost(&mut self) {
        let actions = self.core.on_socket_closed();
        self.perform_offline(actions);
    }

    /// Sleep out the reconnect delay while staying responsive to commands.
    async fn await_backoff(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> BackoffOutcome {
        let delay = self
            .reconnect_delay
            .take()
            .unwrap_or_else(|| Duration::from_millis(500));
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return BackoffOutcome::Elapsed,
                command = commands.recv() => match command {
                    None => return BackoffOutcome::Shutdown,
                    Some(Command::Disconnect) => {
                        let actions = self.core.request_disconnect();
                        self.perform_offline(actions);
                        self.cancel_connect_waiter();
                        return BackoffOutcome::Cancelled;
                    }
                    Some(command) => self.handle_command_offline(command),
                },
            }
        }
    }

    /// Translate a caller command into core actions, wiring up resolution
    /// plumbing for subscribes.
    fn command_actions(&mut self, command: Command) -> Vec<CoreAction> {
        match command {
            Command::Subscribe {
                channel,
                params,
                done,
            } => {
                let key = SubscriptionKey::new(channel, params.clone());
                let (outcome, actions) = self.core.request_subscribe(channel, params);
                match outcome {
                    SubscribeOutcome::AlreadyActive => {
                        let _ = done.send(Ok(()));
                    }
                    SubscribeOutcome::Requested => {
                        self.pending_subscribes.entry(key).or_default().push(done);
                    }
                }
                actions
            }
            Command::Unsubscribe { channel, params } => self.core.request_unsubscribe(channel, params),
            Command::SnapshotSince {
                channel,
                params,
                last_seq,
            } => self.core.request_snapshot_since(channel, params, last_seq),
            Command::OnEvent { channel, handler } => {
                self.event_handlers.entry(channel).or_default().push(handler);
                Vec::new()
            }
            Command::OnError { handler } => {
                self.error_handlers.push(handler);
                Vec::new()
            }
            Command::Connect { done } => {
                self.connect_waiter = Some(done);
                Vec::new()
            }
            Command::Disconnect => {
                let actions = self.core.request_disconnect();
                self.cancel_connect_waiter();
                actions
            }
        }
    }

    /// Reject a pending `connect()` future on intentional disconnect.
    fn cancel_connect_waiter(&mut self) {
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Err(TransportError::ConnectionClosed));
        }
    }

    fn handle_command_offline(&mut self, command: Command) {
        let actions = self.command_actions(command);
        self.perform_offline(actions);
    }

    /// Perform actions against a live sink. `Err` means the socket is dead.
    async fn perform(&mut self, actions: Vec<CoreAction>, sink: &mut WsSink) -> Result<(), ()> {
        for action in actions {
            match action {
                CoreAction::Send(frame) => {
                    if sink.send(Message::Text(frame.to_message())).await.is_err() {
                        return Err(());
                    }
                }
                CoreAction::Close { code, reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                other => self.handle_local_action(other),
            }
        }
        Ok(())
    }

    /// Perform actions with no socket available; send/close actions are
    /// dropped (the reconnect handshake re-establishes subscriptions).
    fn perform_offline(&mut self, actions: Vec<CoreAction>) {
        for action in actions {
            match action {
                CoreAction::Send(_) | CoreAction::Close { .. } => {
                    debug!("dropping socket action while offline");
                }
                other => self.handle_local_action(other),
            }
        }
    }

    fn handle_local_action(&mut self, action: CoreAction) {
        match action {
            CoreAction::Send(_) | CoreAction::Close { .. } => {}
            CoreAction::ScheduleReconnect { delay } => {
                self.metrics.record_reconnect();
                self.reconnect_delay = Some(delay);
            }
            CoreAction::Deliver(event) => {
                self.metrics.record_delivery();
                if let Some(handlers) = self.event_handlers.get(&event.source) {
                    for handler in handlers {
                        handler(event.clone());
                    }
                }
            }
            CoreAction::SubscribeResolved { key } => {
                if let Some(waiters) = self.pending_subscribes.remove(&key) {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
            CoreAction::SubscribeRejected { key, error } => {
                if let Some(waiters) = self.pending_subscribes.remove(&key) {
                    for waiter in waiters {
                        let _ = waiter.send(Err(error.clone()));
                    }
                }
            }
            CoreAction::SurfaceError(error) => {
                self.metrics.record_error();
                for handler in &self.error_handlers {
                    handler(&error);
                }
            }
            CoreAction::Established { session_id } => {
                self.metrics.record_connection();
                info!(session_id = %session_id, "transport connected");
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_when_socket_cannot_open() {
        // nothing listens on this port
        let client = WsClient::new(
            TransportConfig {
                url: "ws://127.0.0.1:9".to_string(),
            },
            Arc::new(StaticToken("jwt".to_string())),
        );

        let result = client.connect().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_token_provider_failure_rejects_connect() {
        struct FailingToken;
        impl TokenProvider for FailingToken {
            fn fetch(&self) -> TokenFuture {
                Box::pin(async { Err(TransportError::Token("no session".to_string())) })
            }
        }

        let client = WsClient::new(
            TransportConfig {
                url: "ws://127.0.0.1:9".to_string(),
            },
            Arc::new(FailingToken),
        );

        let result = client.connect().await;
        assert_eq!(result, Err(TransportError::Token("no session".to_string())));
    }

    #[test]
    fn test_handshake_url_carries_urlencoded_token() {
        let mut url = Url::parse("wss://stream.example.com/v1").unwrap();
        url.query_pairs_mut().append_pair("token", "a+b/c=");
        assert_eq!(url.as_str(), "wss://stream.example.com/v1?token=a%2Bb%2Fc%3D");
    }
}
