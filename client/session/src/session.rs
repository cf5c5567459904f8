//! The session: one store, one transport, wired through callbacks

use crate::config::SessionConfig;
use std::sync::{Arc, Mutex};
use store::{Store, StoreConfig};
use tracing::{debug, warn};
use transport::{Params, SubscribeError, TransportConfig, TransportError, WsClient};
use types::event::Channel;

/// Owns the client state core for one authenticated login.
///
/// All store mutation happens on the transport driver's callbacks, so the
/// store mutex is uncontended in normal operation; hosts read projections by
/// locking it between events.
///
/// Store listeners registered by the host run inside `dispatch` while the
/// store lock is held: they must not lock the store themselves. Forward
/// notifications to a channel and read the store from the receiving side,
/// as the stream demo does.
pub struct Session {
    store: Arc<Mutex<Store>>,
    transport: WsClient,
}

impl Session {
    /// Build the pair and wire the event and recovery paths.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_store_config(config, StoreConfig::default())
    }

    pub fn with_store_config(config: SessionConfig, store_config: StoreConfig) -> Self {
        let transport = WsClient::new(
            TransportConfig {
                url: config.url.clone(),
            },
            config.token_provider,
        );
        let store = Arc::new(Mutex::new(Store::new(store_config)));

        // Transport events → store dispatch.
        for channel in [Channel::MarketData, Channel::Account, Channel::Trades] {
            let store_for_channel = Arc::clone(&store);
            transport.on_event(channel, move |event| {
                match store_for_channel.lock() {
                    Ok(mut store) => store.dispatch(event),
                    Err(poisoned) => {
                        warn!("store lock poisoned, dispatching anyway");
                        poisoned.into_inner().dispatch(event);
                    }
                }
            });
        }

        // Store recovery requests → snapshot_since frames. A request with
        // since_seq 0 asks for a full stream (fresh snapshot plus tail);
        // the server treats last_seq=0 as "from the beginning".
        if let Ok(mut guard) = store.lock() {
            let transport_for_recovery = transport.clone();
            guard.on_request_snapshot(move |request| {
                let mut params = Params::new();
                if let Some(symbol) = &request.symbol {
                    params.insert("symbol".to_string(), symbol.as_str().to_string());
                }
                debug!(
                    channel = %request.channel,
                    since = request.since_seq.value(),
                    "forwarding recovery request"
                );
                transport_for_recovery.snapshot_since(
                    request.channel,
                    params,
                    request.since_seq.value(),
                );
            });
        }

        Self { store, transport }
    }

    /// Connect and authenticate.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    /// Subscribe to a channel, with the symbol parameter for per-symbol
    /// streams (market data, trades) and none for the account stream.
    pub async fn subscribe(
        &self,
        channel: Channel,
        symbol: Option<&str>,
    ) -> Result<(), SubscribeError> {
        let mut params = Params::new();
        if let Some(symbol) = symbol {
            params.insert("symbol".to_string(), symbol.to_string());
        }
        self.transport.subscribe(channel, params).await
    }

    /// The shared store; lock to read projections or register listeners.
    pub fn store(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.store)
    }

    /// The underlying transport handle.
    pub fn transport(&self) -> &WsClient {
        &self.transport
    }

    /// Tear down on logout: close the connection for good and drop both
    /// components. Projections are not persisted anywhere; the next login
    /// starts from fresh snapshots.
    pub fn shutdown(self) {
        self.transport.disconnect();
    }
}
