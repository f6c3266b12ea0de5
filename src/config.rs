//! Connection-level configuration.

use crate::protocol::ClientInfo;
use std::time::Duration;

/// Default deadline for a whole turn (`turn/start` plus draining its steps).
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(180);

/// Default deadline for a single request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const WS_URL_ENV: &str = "CODEX_APP_SERVER_WS_URL";
pub const WS_TOKEN_ENV: &str = "CODEX_APP_SERVER_TOKEN";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8765";

/// Settings shared by every thread opened on one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub turn_timeout: Duration,
    pub request_timeout: Duration,
    pub client_info: ClientInfo,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_info: ClientInfo::default(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }
}

/// Where to find a websocket app-server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when connecting.
    pub token: Option<String>,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read `CODEX_APP_SERVER_WS_URL` and `CODEX_APP_SERVER_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup(WS_URL_ENV)
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            token: lookup(WS_TOKEN_ENV).filter(|t| !t.is_empty()),
        }
    }
}
