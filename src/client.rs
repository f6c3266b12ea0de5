//! Entry point for talking to a Codex app-server.
//!
//! A [`Client`] owns one [`Connection`] over one [`Transport`]. It performs
//! the `initialize` handshake, opens [`ThreadHandle`]s, and exposes the
//! server's listing and config helpers.
//!
//! ```no_run
//! use codex_app_server_client::{AppServerBuilder, Client, ThreadConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> codex_app_server_client::Result<()> {
//! let client = Client::connect_stdio(&AppServerBuilder::new(), Duration::from_secs(180)).await?;
//! client.initialize().await?;
//!
//! let thread = client
//!     .start_thread(ThreadConfig::new().developer_instructions("Focus on tests."))
//!     .await?;
//! let result = thread.chat_once("hi").await?;
//! println!("{}", result.final_text);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::cli::AppServerBuilder;
use crate::config::ClientConfig;
#[cfg(feature = "websocket")]
use crate::config::WebSocketConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::io::{ChatResult, ThreadConfig};
use crate::protocol::{
    methods, ConfigReadParams, InitializeParams, InitializeResponse, ModelListParams,
    SortDirection, ThreadListParams, ThreadResponse, ThreadResumeParams, ThreadSortKey,
    ThreadStartParams,
};
use crate::thread::ThreadHandle;
use crate::transport::Transport;
use crate::turn::TurnStream;
use log::debug;
use serde_json::Value;
use std::time::Duration;

/// What the server reported during the handshake.
#[derive(Debug, Clone)]
pub struct InitializeResult {
    pub protocol_version: Option<String>,
    pub user_agent: Option<String>,
    /// The full `initialize` result.
    pub raw: Value,
}

/// Asynchronous multi-thread client for the Codex app-server.
///
/// Dropping the client without [`close`](Client::close) still kills the
/// server process and stops the dispatch loop.
pub struct Client {
    connection: Connection,
    config: ClientConfig,
}

impl Client {
    /// Spawn an app-server and connect to it over stdio.
    pub async fn connect_stdio(builder: &AppServerBuilder, turn_timeout: Duration) -> Result<Self> {
        let transport = Transport::spawn(builder)?;
        Ok(Self::connect(
            transport,
            ClientConfig::new().turn_timeout(turn_timeout),
        ))
    }

    /// Connect to a websocket app-server.
    #[cfg(feature = "websocket")]
    pub async fn connect_websocket(
        url: &str,
        token: Option<&str>,
        turn_timeout: Duration,
    ) -> Result<Self> {
        let transport = Transport::websocket(url, token).await?;
        Ok(Self::connect(
            transport,
            ClientConfig::new().turn_timeout(turn_timeout),
        ))
    }

    /// Connect to the websocket app-server described by `ws`, e.g.
    /// [`WebSocketConfig::from_env`].
    #[cfg(feature = "websocket")]
    pub async fn connect_websocket_with(ws: &WebSocketConfig, config: ClientConfig) -> Result<Self> {
        let transport = Transport::websocket(&ws.url, ws.token.as_deref()).await?;
        Ok(Self::connect(transport, config))
    }

    /// Use an already-built transport. Must be called within a tokio runtime.
    pub fn connect(transport: Transport, config: ClientConfig) -> Self {
        let connection = Connection::new(transport, config.request_timeout);
        Self { connection, config }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform the `initialize` / `initialized` handshake.
    ///
    /// Call once, before any thread operation.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            client_info: self.config.client_info.clone(),
            capabilities: None,
        };
        let raw: Value = self
            .connection
            .call(methods::INITIALIZE, &params)
            .await?;
        let response: InitializeResponse = serde_json::from_value(raw.clone())?;
        self.connection
            .notify(methods::INITIALIZED, &serde_json::json!({}))
            .await?;

        if let Some(user_agent) = &response.user_agent {
            crate::version::check_server_version(user_agent);
        }
        debug!(
            "[CLIENT] Initialized (user agent: {})",
            response.user_agent.as_deref().unwrap_or("unknown")
        );

        Ok(InitializeResult {
            protocol_version: response.protocol_version,
            user_agent: response.user_agent,
            raw,
        })
    }

    /// Start a new thread with `config` as its defaults.
    pub async fn start_thread(&self, config: ThreadConfig) -> Result<ThreadHandle> {
        let params = ThreadStartParams {
            config: config.clone(),
        };
        let response: ThreadResponse = self
            .connection
            .call(methods::THREAD_START, &params)
            .await?;
        Ok(self.handle(response.thread_id()?, config))
    }

    /// Reopen an existing thread by id, applying `overrides` as its defaults.
    pub async fn resume_thread(
        &self,
        thread_id: &str,
        overrides: ThreadConfig,
    ) -> Result<ThreadHandle> {
        let params = ThreadResumeParams {
            thread_id: thread_id.to_string(),
            config: overrides.clone(),
        };
        let response: ThreadResponse = self
            .connection
            .call(methods::THREAD_RESUME, &params)
            .await?;
        Ok(self.handle(response.thread_id()?, overrides))
    }

    /// Raw `thread/list` page.
    pub async fn list_threads(
        &self,
        limit: Option<u32>,
        sort_key: Option<ThreadSortKey>,
        sort_direction: Option<SortDirection>,
    ) -> Result<Value> {
        let params = ThreadListParams {
            limit,
            sort_key,
            sort_direction,
            cursor: None,
        };
        self.connection.call(methods::THREAD_LIST, &params).await
    }

    /// Raw `model/list` page.
    pub async fn list_models(&self, limit: Option<u32>) -> Result<Value> {
        let params = ModelListParams {
            limit,
            cursor: None,
        };
        self.connection.call(methods::MODEL_LIST, &params).await
    }

    /// Raw `config/read` snapshot.
    pub async fn read_config(&self, include_layers: bool) -> Result<Value> {
        self.connection
            .call(methods::CONFIG_READ, &ConfigReadParams { include_layers })
            .await
    }

    /// Stream a turn on `thread_id`, or on a fresh thread if `None`.
    pub async fn chat(&self, prompt: impl Into<String>, thread_id: Option<&str>) -> Result<TurnStream> {
        self.thread_for(thread_id).await?.chat(prompt).await
    }

    /// Run one turn on `thread_id`, or on a fresh thread if `None`.
    pub async fn chat_once(
        &self,
        prompt: impl Into<String>,
        thread_id: Option<&str>,
    ) -> Result<ChatResult> {
        self.thread_for(thread_id).await?.chat_once(prompt).await
    }

    /// Fail everything in flight and release the transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }

    async fn thread_for(&self, thread_id: Option<&str>) -> Result<ThreadHandle> {
        match thread_id {
            Some(id) => self.resume_thread(id, ThreadConfig::default()).await,
            None => self.start_thread(ThreadConfig::default()).await,
        }
    }

    fn handle(&self, thread_id: String, defaults: ThreadConfig) -> ThreadHandle {
        ThreadHandle::new(
            self.connection.clone(),
            thread_id,
            defaults,
            self.config.turn_timeout,
        )
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.abort();
    }
}
