//! An async client for the Codex app-server JSON-RPC protocol.
//!
//! This crate drives `codex app-server` over a child-process pipe or a
//! websocket. It opens conversation threads, submits prompts as turns, and
//! turns the server's notification firehose into per-turn ordered step
//! streams, with many threads and turns in flight over one connection.
//!
//! # Feature Flags
//!
//! | Feature | Description | WASM-compatible |
//! |---------|-------------|-----------------|
//! | `types` | Wire types, items, settings and steps only | Yes |
//! | `async-client` | Connection engine, threads and turn streams using tokio | No |
//! | `websocket` | Websocket transport via tokio-tungstenite | No |
//! | `integration-tests` | Live tests against a real `codex` binary | No |
//!
//! `types`, `async-client` and `websocket` are enabled by default.
//!
//! # Architecture
//!
//! - [`transport`] - stdio, websocket and in-memory frame channels
//! - [`jsonrpc`] - frame codec (no `"jsonrpc"` field on the wire)
//! - [`connection`] - dispatch loop, pending requests, notification routing
//! - [`turn`] - per-turn step streams
//! - [`thread`] - thread handles with per-handle defaults
//! - [`client`] - the [`Client`] façade
//!
//! # Example
//!
//! ```no_run
//! use codex_app_server_client::{AppServerBuilder, Client, StepType, ThreadConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect_stdio(&AppServerBuilder::new(), Duration::from_secs(180)).await?;
//!     client.initialize().await?;
//!
//!     let thread = client.start_thread(ThreadConfig::new()).await?;
//!     let mut steps = thread.chat("Summarize this repository").await?;
//!     while let Some(step) = steps.next().await {
//!         let step = step?;
//!         if step.step_type == StepType::Completed {
//!             println!("{}", step.text.unwrap_or_default());
//!         }
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Version Compatibility
//!
//! The app-server protocol is evolving. After `initialize` the client checks
//! the server's user agent and logs a warning if it is newer than tested.

mod io;

pub mod error;
pub mod jsonrpc;
pub mod protocol;

#[cfg(feature = "async-client")]
pub mod cli;

#[cfg(feature = "async-client")]
pub mod client;

#[cfg(feature = "async-client")]
pub mod config;

#[cfg(feature = "async-client")]
pub mod connection;

#[cfg(feature = "async-client")]
pub mod thread;

#[cfg(feature = "async-client")]
pub mod transport;

#[cfg(feature = "async-client")]
pub mod turn;

#[cfg(feature = "async-client")]
pub mod version;

// Thread item types
pub use io::{
    AgentMessageItem, CommandExecutionItem, CommandExecutionStatus, ErrorItem, FileChangeItem,
    FileUpdateChange, McpToolCallError, McpToolCallItem, McpToolCallResult, McpToolCallStatus,
    PatchApplyStatus, PatchChangeKind, ReasoningItem, ThreadItem, TodoItem, TodoListItem,
    UserMessageItem, WebSearchItem,
};

// Configuration types
pub use io::{
    ApprovalMode, ReasoningEffort, ReasoningSummary, SandboxMode, Setting, ThreadConfig,
    TurnOverrides,
};

// Step and result types
pub use io::{ChatResult, ConversationStep, StepType, TurnState};

// Error types (always available)
pub use error::{Error, Result};

// JSON-RPC types (always available)
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorData, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};

// App-server protocol types (always available)
pub use protocol::{
    ClientInfo, ErrorNotification, InitializeParams, InitializeResponse,
    ItemCompletedNotification, ItemDeltaNotification, ItemStartedNotification, SortDirection,
    ThreadInfo, ThreadResponse, ThreadSortKey, Turn, TurnCompletedNotification, TurnError,
    TurnFailedNotification, TurnStartParams, TurnStartResponse, TurnStartedNotification,
    TurnStatus, UserInput,
};

#[cfg(feature = "async-client")]
pub use cli::AppServerBuilder;

#[cfg(feature = "async-client")]
pub use client::{Client, InitializeResult};

#[cfg(feature = "async-client")]
pub use config::{ClientConfig, WebSocketConfig};

#[cfg(feature = "async-client")]
pub use connection::Connection;

#[cfg(feature = "async-client")]
pub use thread::ThreadHandle;

#[cfg(feature = "async-client")]
pub use transport::Transport;

#[cfg(feature = "async-client")]
pub use turn::{TurnCanceller, TurnStream};
