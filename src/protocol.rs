//! App-server v2 protocol types.
//!
//! These types represent the JSON-RPC request parameters, response payloads,
//! and notification bodies used by `codex app-server`. All wire types use
//! camelCase field names via `#[serde(rename_all = "camelCase")]`.
//!
//! # Organization
//!
//! - **Request/Response pairs**: [`ThreadStartParams`]/[`ThreadResponse`],
//!   [`TurnStartParams`]/[`TurnStartResponse`], etc.
//! - **Server notifications**: Structs like [`TurnCompletedNotification`] and
//!   [`ItemDeltaNotification`] decoded from a notification's `params`
//! - **Method constants**: The [`methods`] module contains all JSON-RPC method
//!   name strings
//!
//! # Parsing notifications
//!
//! ```
//! use codex_app_server_client::protocol::{methods, TurnCompletedNotification};
//! use serde_json::Value;
//!
//! fn handle_notification(method: &str, params: Value) {
//!     if method == methods::TURN_COMPLETED {
//!         let notif: TurnCompletedNotification = serde_json::from_value(params).unwrap();
//!         println!("Turn {} completed", notif.turn_id());
//!     }
//! }
//! ```

use crate::error::{Error, Result};
use crate::io::{ThreadConfig, ThreadItem, TurnOverrides};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// User input sent as part of a [`TurnStartParams`].
///
/// # Example
///
/// ```
/// use codex_app_server_client::UserInput;
///
/// let text = UserInput::text("What is 2+2?");
/// let json = serde_json::to_string(&text).unwrap();
/// assert!(json.contains(r#""type":"text""#));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserInput {
    /// Text input from the user.
    Text { text: String },
    /// Image referenced by URL or data URI (e.g., `data:image/png;base64,...`).
    Image { url: String },
    /// Image on the server's local filesystem.
    LocalImage { path: String },
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        UserInput::Text { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Identifies this client to the server during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            title: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_info: ClientInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

/// Response from `initialize`.
///
/// Servers differ in what they report here, so every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

// ---------------------------------------------------------------------------
// Thread lifecycle requests
// ---------------------------------------------------------------------------

/// Parameters for `thread/start`.
///
/// Use `ThreadStartParams::default()` for a thread that inherits every
/// server-side default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    #[serde(flatten)]
    pub config: ThreadConfig,
}

/// Parameters for `thread/resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeParams {
    pub thread_id: String,
    #[serde(flatten)]
    pub config: ThreadConfig,
}

/// Parameters for `thread/fork`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadForkParams {
    pub thread_id: String,
    #[serde(flatten)]
    pub config: ThreadConfig,
}

/// Parameters for `thread/updateDefaults`: only the fields being changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUpdateDefaultsParams {
    pub thread_id: String,
    #[serde(flatten)]
    pub config: ThreadConfig,
}

/// Thread metadata as returned by the thread lifecycle calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Response from `thread/start`, `thread/resume` and `thread/fork`.
///
/// Newer servers nest the thread under `thread`; older ones return a bare
/// `threadId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ThreadResponse {
    /// The thread id, wherever the server put it.
    pub fn thread_id(&self) -> Result<String> {
        self.thread
            .as_ref()
            .map(|t| t.id.clone())
            .or_else(|| self.thread_id.clone())
            .ok_or_else(|| Error::protocol("thread response carries no thread id"))
    }
}

/// Parameters for `thread/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadReadParams {
    pub thread_id: String,
    pub include_turns: bool,
}

/// Sort key for `thread/list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSortKey {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Parameters for `thread/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<ThreadSortKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Parameters for `thread/setName`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSetNameParams {
    pub thread_id: String,
    pub name: String,
}

/// Parameters for `thread/archive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArchiveParams {
    pub thread_id: String,
}

/// Parameters for `model/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Parameters for `config/read`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReadParams {
    pub include_layers: bool,
}

// ---------------------------------------------------------------------------
// Turn lifecycle requests
// ---------------------------------------------------------------------------

/// Parameters for `turn/start`.
///
/// Starts a new agent turn within an existing thread. The agent processes the
/// input and streams notifications until the turn completes. The effective
/// settings are the thread's defaults with the turn's overrides layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    pub thread_id: String,
    /// One or more user inputs (text and/or images).
    pub input: Vec<UserInput>,
    #[serde(flatten)]
    pub config: ThreadConfig,
    /// JSON schema the final agent message must conform to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl TurnStartParams {
    pub fn new(
        thread_id: impl Into<String>,
        input: Vec<UserInput>,
        defaults: &ThreadConfig,
        overrides: &TurnOverrides,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            input,
            config: defaults.with_turn_overrides(overrides),
            output_schema: overrides.output_schema.as_value().cloned(),
        }
    }
}

/// Response from `turn/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

impl TurnStartResponse {
    pub fn turn_id(&self) -> Result<String> {
        self.turn
            .as_ref()
            .map(|t| t.id.clone())
            .or_else(|| self.turn_id.clone())
            .ok_or_else(|| Error::protocol("turn/start response carries no turn id"))
    }
}

/// Parameters for `turn/interrupt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInterruptParams {
    pub thread_id: String,
    pub turn_id: String,
}

// ---------------------------------------------------------------------------
// Turn status & data types
// ---------------------------------------------------------------------------

/// Status of a turn within a [`Turn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnStatus {
    /// The agent finished normally.
    Completed,
    /// The turn was interrupted by the client via `turn/interrupt`.
    Interrupted,
    /// The turn failed with an error (see [`Turn::error`]).
    Failed,
    /// The turn is still being processed.
    InProgress,
    #[serde(other)]
    Unknown,
}

/// Error information from a failed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_error_info: Option<Value>,
}

/// A turn with its items and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Unique turn identifier.
    pub id: String,
    /// Items produced during this turn (messages, commands, file changes, etc.).
    #[serde(default)]
    pub items: Vec<ThreadItem>,
    #[serde(default = "in_progress")]
    pub status: TurnStatus,
    /// Error details if `status` is [`TurnStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TurnError>,
}

fn in_progress() -> TurnStatus {
    TurnStatus::InProgress
}

// ---------------------------------------------------------------------------
// Server notifications
// ---------------------------------------------------------------------------

/// `turn/started` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartedNotification {
    pub thread_id: String,
    pub turn: Turn,
}

/// `turn/completed` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompletedNotification {
    pub thread_id: String,
    pub turn: Turn,
}

impl TurnCompletedNotification {
    pub fn turn_id(&self) -> &str {
        &self.turn.id
    }
}

/// `turn/failed` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFailedNotification {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TurnError>,
}

impl TurnFailedNotification {
    /// The failure message from the notification or its turn, if any.
    pub fn message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .or_else(|| self.turn.as_ref().and_then(|t| t.error.as_ref()))
            .map(|e| e.message.as_str())
    }
}

/// `item/started` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStartedNotification {
    pub thread_id: String,
    pub turn_id: String,
    pub item: ThreadItem,
}

/// `item/completed` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCompletedNotification {
    pub thread_id: String,
    pub turn_id: String,
    pub item: ThreadItem,
}

/// Body shared by every streaming delta notification:
/// `item/agentMessage/delta`, `item/commandExecution/outputDelta`,
/// `item/fileChange/outputDelta`, `item/reasoning/summaryTextDelta` and
/// `item/reasoning/textDelta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDeltaNotification {
    pub thread_id: String,
    pub turn_id: String,
    pub item_id: String,
    pub delta: String,
}

/// `error` notification.
///
/// `error` is either a bare string or a [`TurnError`]-shaped object depending
/// on the server version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotification {
    pub error: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub will_retry: bool,
}

impl ErrorNotification {
    pub fn message(&self) -> String {
        match &self.error {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Method name constants
// ---------------------------------------------------------------------------

/// JSON-RPC method names used by the app-server protocol.
pub mod methods {
    // Client → server requests
    pub const INITIALIZE: &str = "initialize";
    pub const THREAD_START: &str = "thread/start";
    pub const THREAD_RESUME: &str = "thread/resume";
    pub const THREAD_FORK: &str = "thread/fork";
    pub const THREAD_READ: &str = "thread/read";
    pub const THREAD_LIST: &str = "thread/list";
    pub const THREAD_SET_NAME: &str = "thread/setName";
    pub const THREAD_ARCHIVE: &str = "thread/archive";
    pub const THREAD_UPDATE_DEFAULTS: &str = "thread/updateDefaults";
    pub const TURN_START: &str = "turn/start";
    pub const TURN_INTERRUPT: &str = "turn/interrupt";
    pub const MODEL_LIST: &str = "model/list";
    pub const CONFIG_READ: &str = "config/read";

    // Client → server notifications
    pub const INITIALIZED: &str = "initialized";

    // Server → client notifications
    pub const TURN_STARTED: &str = "turn/started";
    pub const TURN_COMPLETED: &str = "turn/completed";
    pub const TURN_FAILED: &str = "turn/failed";
    pub const ITEM_STARTED: &str = "item/started";
    pub const ITEM_COMPLETED: &str = "item/completed";
    pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    pub const CMD_OUTPUT_DELTA: &str = "item/commandExecution/outputDelta";
    pub const FILE_CHANGE_OUTPUT_DELTA: &str = "item/fileChange/outputDelta";
    pub const REASONING_SUMMARY_DELTA: &str = "item/reasoning/summaryTextDelta";
    pub const REASONING_TEXT_DELTA: &str = "item/reasoning/textDelta";
    pub const ERROR: &str = "error";

    /// Notification methods that carry an [`ItemDeltaNotification`](super::ItemDeltaNotification).
    pub const DELTAS: [&str; 5] = [
        AGENT_MESSAGE_DELTA,
        CMD_OUTPUT_DELTA,
        FILE_CHANGE_OUTPUT_DELTA,
        REASONING_SUMMARY_DELTA,
        REASONING_TEXT_DELTA,
    ];

    pub fn is_delta(method: &str) -> bool {
        DELTAS.iter().any(|m| *m == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ReasoningEffort, Setting};

    #[test]
    fn test_user_input_text() {
        let input = UserInput::text("Hello");
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains(r#""type":"text""#));
        let parsed: UserInput = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, UserInput::Text { text } if text == "Hello"));
    }

    #[test]
    fn test_initialize_params() {
        let params = InitializeParams {
            client_info: ClientInfo::default(),
            capabilities: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["clientInfo"]["name"], "codex-app-server-client");
        assert!(json.get("capabilities").is_none());
    }

    #[test]
    fn test_thread_start_params_flatten_config() {
        let params = ThreadStartParams {
            config: ThreadConfig::new()
                .developer_instructions("Focus on tests.")
                .clear_model(),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["developerInstructions"], "Focus on tests.");
        assert!(json["model"].is_null());
        assert!(json.as_object().unwrap().contains_key("model"));
        assert!(!json.as_object().unwrap().contains_key("cwd"));
    }

    #[test]
    fn test_thread_response_nested_id() {
        let json = r#"{"thread":{"id":"th_abc123","preview":""},"model":"gpt-5-codex"}"#;
        let resp: ThreadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.thread_id().unwrap(), "th_abc123");
    }

    #[test]
    fn test_thread_response_flat_id() {
        let resp: ThreadResponse = serde_json::from_str(r#"{"threadId":"th_1"}"#).unwrap();
        assert_eq!(resp.thread_id().unwrap(), "th_1");
    }

    #[test]
    fn test_thread_response_missing_id() {
        let resp: ThreadResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(resp.thread_id(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_thread_list_params_sort() {
        let params = ThreadListParams {
            limit: Some(5),
            sort_key: Some(ThreadSortKey::UpdatedAt),
            sort_direction: Some(SortDirection::Desc),
            cursor: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["sortKey"], "updated_at");
        assert_eq!(json["sortDirection"], "desc");
        assert!(json.get("cursor").is_none());
    }

    #[test]
    fn test_turn_start_params_merges_overrides() {
        let defaults = ThreadConfig::new().model("gpt-5-codex").cwd("/repo");
        let overrides = TurnOverrides::new()
            .effort(ReasoningEffort::Low)
            .output_schema(serde_json::json!({"type": "object"}));
        let params = TurnStartParams::new("th_1", vec![UserInput::text("hi")], &defaults, &overrides);

        assert_eq!(params.config.effort, Setting::Value(ReasoningEffort::Low));
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["threadId"], "th_1");
        assert_eq!(json["model"], "gpt-5-codex");
        assert_eq!(json["effort"], "low");
        assert_eq!(json["outputSchema"]["type"], "object");
        assert_eq!(json["input"][0]["text"], "hi");
    }

    #[test]
    fn test_turn_start_response() {
        let json = r#"{"turn":{"id":"t_1","items":[],"status":"inProgress"}}"#;
        let resp: TurnStartResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.turn_id().unwrap(), "t_1");

        let resp: TurnStartResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.turn_id().is_err());
    }

    #[test]
    fn test_turn_status() {
        let status: TurnStatus = serde_json::from_str(r#""completed""#).unwrap();
        assert_eq!(status, TurnStatus::Completed);
        let status: TurnStatus = serde_json::from_str(r#""somethingNew""#).unwrap();
        assert_eq!(status, TurnStatus::Unknown);
    }

    #[test]
    fn test_turn_completed_notification() {
        let json = r#"{
            "threadId": "th_1",
            "turn": {
                "id": "t_1",
                "items": [],
                "status": "completed"
            }
        }"#;
        let notif: TurnCompletedNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notif.thread_id, "th_1");
        assert_eq!(notif.turn_id(), "t_1");
        assert_eq!(notif.turn.status, TurnStatus::Completed);
    }

    #[test]
    fn test_turn_failed_message_from_turn() {
        let json = r#"{
            "threadId": "th_1",
            "turn": {"id": "t_1", "status": "failed", "error": {"message": "quota"}}
        }"#;
        let notif: TurnFailedNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notif.message(), Some("quota"));
    }

    #[test]
    fn test_item_delta() {
        let json = r#"{"threadId":"th_1","turnId":"t_1","itemId":"msg_1","delta":"Hello "}"#;
        let notif: ItemDeltaNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notif.delta, "Hello ");
        assert!(methods::is_delta(methods::REASONING_TEXT_DELTA));
        assert!(!methods::is_delta(methods::ITEM_COMPLETED));
    }

    #[test]
    fn test_error_notification_string_and_object() {
        let json = r#"{"error":"something failed","willRetry":true}"#;
        let notif: ErrorNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notif.message(), "something failed");
        assert!(notif.will_retry);

        let json = r#"{"error":{"message":"stream dropped"},"threadId":"th_1","turnId":"t_1"}"#;
        let notif: ErrorNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notif.message(), "stream dropped");
        assert!(!notif.will_retry);
    }
}
