//! Session configuration

use std::sync::Arc;
use transport::TokenProvider;

/// Everything a session needs from the host: where to connect and how to
/// obtain authentication tokens.
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://stream.example.com/v1`.
    pub url: String,
    /// Consulted for a fresh token before every connection attempt.
    pub token_provider: Arc<dyn TokenProvider>,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            url: url.into(),
            token_provider,
        }
    }
}
