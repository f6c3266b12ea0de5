use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Status of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandExecutionStatus {
    #[serde(alias = "in_progress")]
    InProgress,
    Completed,
    Failed,
    Declined,
}

/// A command execution item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecutionItem {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, alias = "aggregated_output")]
    pub aggregated_output: Option<String>,
    #[serde(default, alias = "exit_code", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: CommandExecutionStatus,
}

/// Kind of patch change applied to a file.
///
/// Newer servers send `{"type": "update", ...}` objects; older ones a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchChangeKind {
    Add,
    Delete,
    Update,
}

/// A single file update within a file change item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpdateChange {
    pub path: String,
    #[serde(default)]
    pub kind: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl FileUpdateChange {
    /// The change kind, accepting both the string and the object encodings.
    pub fn change_kind(&self) -> Option<PatchChangeKind> {
        let tag = match &self.kind {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("type")?.as_str()?,
            _ => return None,
        };
        serde_json::from_value(Value::String(tag.to_string())).ok()
    }
}

/// Status of a patch apply operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchApplyStatus {
    #[serde(alias = "in_progress")]
    InProgress,
    Completed,
    Failed,
    Declined,
}

/// A file change item representing one or more file modifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeItem {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<FileUpdateChange>,
    pub status: PatchApplyStatus,
}

/// Status of an MCP tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum McpToolCallStatus {
    #[serde(alias = "in_progress")]
    InProgress,
    Completed,
    Failed,
}

/// Result of an MCP tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, alias = "structured_content")]
    pub structured_content: Value,
}

/// Error from an MCP tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCallError {
    pub message: String,
}

/// An MCP tool call item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCallItem {
    pub id: String,
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<McpToolCallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpToolCallError>,
    pub status: McpToolCallStatus,
}

/// An agent message item containing text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessageItem {
    pub id: String,
    pub text: String,
}

/// A reasoning item.
///
/// App-server items carry `summary`/`content` parts; older payloads a flat `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningItem {
    pub id: String,
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The echo of the user's own input for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageItem {
    pub id: String,
    #[serde(default)]
    pub content: Vec<Value>,
}

/// A web search item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchItem {
    pub id: String,
    pub query: String,
}

/// An error item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorItem {
    pub id: String,
    pub message: String,
}

/// A single todo entry within a todo list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub completed: bool,
}

/// A todo list item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoListItem {
    pub id: String,
    pub items: Vec<TodoItem>,
}

/// Item kinds this crate knows how to decode. Tags are camelCase on the
/// app-server; the snake_case aliases cover `codex exec --json` captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum KnownItem {
    #[serde(alias = "agent_message")]
    AgentMessage(AgentMessageItem),
    Reasoning(ReasoningItem),
    #[serde(alias = "command_execution")]
    CommandExecution(CommandExecutionItem),
    #[serde(alias = "file_change")]
    FileChange(FileChangeItem),
    #[serde(alias = "mcp_tool_call")]
    McpToolCall(McpToolCallItem),
    #[serde(alias = "user_message")]
    UserMessage(UserMessageItem),
    #[serde(alias = "web_search")]
    WebSearch(WebSearchItem),
    #[serde(alias = "todo_list")]
    TodoList(TodoListItem),
    Error(ErrorItem),
}

/// One item of turn activity, dispatched on its `type` tag.
///
/// Unknown tags, and known tags whose payload does not match the expected
/// shape, decode to [`ThreadItem::Other`] with the raw JSON preserved.
#[derive(Debug, Clone)]
pub enum ThreadItem {
    AgentMessage(AgentMessageItem),
    Reasoning(ReasoningItem),
    CommandExecution(CommandExecutionItem),
    FileChange(FileChangeItem),
    McpToolCall(McpToolCallItem),
    UserMessage(UserMessageItem),
    WebSearch(WebSearchItem),
    TodoList(TodoListItem),
    Error(ErrorItem),
    Other(Value),
}

impl KnownItem {
    fn into_item(self) -> ThreadItem {
        match self {
            KnownItem::AgentMessage(i) => ThreadItem::AgentMessage(i),
            KnownItem::Reasoning(i) => ThreadItem::Reasoning(i),
            KnownItem::CommandExecution(i) => ThreadItem::CommandExecution(i),
            KnownItem::FileChange(i) => ThreadItem::FileChange(i),
            KnownItem::McpToolCall(i) => ThreadItem::McpToolCall(i),
            KnownItem::UserMessage(i) => ThreadItem::UserMessage(i),
            KnownItem::WebSearch(i) => ThreadItem::WebSearch(i),
            KnownItem::TodoList(i) => ThreadItem::TodoList(i),
            KnownItem::Error(i) => ThreadItem::Error(i),
        }
    }
}

impl ThreadItem {
    /// Decode an item from raw JSON, falling back to [`ThreadItem::Other`].
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<KnownItem>(value.clone()) {
            Ok(known) => known.into_item(),
            Err(_) => ThreadItem::Other(value),
        }
    }

    /// The wire `type` tag of this item.
    pub fn item_type(&self) -> Option<&str> {
        Some(match self {
            ThreadItem::AgentMessage(_) => "agentMessage",
            ThreadItem::Reasoning(_) => "reasoning",
            ThreadItem::CommandExecution(_) => "commandExecution",
            ThreadItem::FileChange(_) => "fileChange",
            ThreadItem::McpToolCall(_) => "mcpToolCall",
            ThreadItem::UserMessage(_) => "userMessage",
            ThreadItem::WebSearch(_) => "webSearch",
            ThreadItem::TodoList(_) => "todoList",
            ThreadItem::Error(_) => "error",
            ThreadItem::Other(raw) => return raw.get("type").and_then(Value::as_str),
        })
    }

    pub fn id(&self) -> Option<&str> {
        Some(match self {
            ThreadItem::AgentMessage(i) => i.id.as_str(),
            ThreadItem::Reasoning(i) => i.id.as_str(),
            ThreadItem::CommandExecution(i) => i.id.as_str(),
            ThreadItem::FileChange(i) => i.id.as_str(),
            ThreadItem::McpToolCall(i) => i.id.as_str(),
            ThreadItem::UserMessage(i) => i.id.as_str(),
            ThreadItem::WebSearch(i) => i.id.as_str(),
            ThreadItem::TodoList(i) => i.id.as_str(),
            ThreadItem::Error(i) => i.id.as_str(),
            ThreadItem::Other(raw) => return raw.get("id").and_then(Value::as_str),
        })
    }

    /// Human-readable text for the item, when it has any.
    pub fn text(&self) -> Option<String> {
        match self {
            ThreadItem::AgentMessage(m) => Some(m.text.clone()),
            ThreadItem::Reasoning(r) => {
                if !r.summary.is_empty() {
                    Some(r.summary.join("\n"))
                } else if !r.content.is_empty() {
                    Some(r.content.join("\n"))
                } else {
                    r.text.clone()
                }
            }
            ThreadItem::CommandExecution(c) => c.aggregated_output.clone(),
            ThreadItem::FileChange(f) => {
                let lines: Vec<String> = f
                    .changes
                    .iter()
                    .map(|c| match c.change_kind() {
                        Some(PatchChangeKind::Add) => format!("add {}", c.path),
                        Some(PatchChangeKind::Delete) => format!("delete {}", c.path),
                        Some(PatchChangeKind::Update) => format!("update {}", c.path),
                        None => c.path.clone(),
                    })
                    .collect();
                (!lines.is_empty()).then(|| lines.join("\n"))
            }
            ThreadItem::McpToolCall(m) => {
                if let Some(err) = &m.error {
                    return Some(err.message.clone());
                }
                let parts: Vec<&str> = m
                    .result
                    .iter()
                    .flat_map(|r| r.content.iter())
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n"))
            }
            ThreadItem::UserMessage(u) => {
                let parts: Vec<&str> = u
                    .content
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n"))
            }
            ThreadItem::WebSearch(w) => Some(w.query.clone()),
            ThreadItem::TodoList(t) => Some(
                t.items
                    .iter()
                    .map(|i| format!("[{}] {}", if i.completed { "x" } else { " " }, i.text))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            ThreadItem::Error(e) => Some(e.message.clone()),
            ThreadItem::Other(raw) => raw.get("text").and_then(Value::as_str).map(str::to_string),
        }
    }

    /// The text this item accumulates through delta notifications, if its
    /// kind streams one. Used to check deltas against the completed item.
    pub fn streamed_text(&self) -> Option<&str> {
        match self {
            ThreadItem::AgentMessage(m) => Some(&m.text),
            ThreadItem::CommandExecution(c) => c.aggregated_output.as_deref(),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ThreadItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ThreadItem::from_value(Value::deserialize(deserializer)?))
    }
}

impl Serialize for ThreadItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let known = match self.clone() {
            ThreadItem::AgentMessage(i) => KnownItem::AgentMessage(i),
            ThreadItem::Reasoning(i) => KnownItem::Reasoning(i),
            ThreadItem::CommandExecution(i) => KnownItem::CommandExecution(i),
            ThreadItem::FileChange(i) => KnownItem::FileChange(i),
            ThreadItem::McpToolCall(i) => KnownItem::McpToolCall(i),
            ThreadItem::UserMessage(i) => KnownItem::UserMessage(i),
            ThreadItem::WebSearch(i) => KnownItem::WebSearch(i),
            ThreadItem::TodoList(i) => KnownItem::TodoList(i),
            ThreadItem::Error(i) => KnownItem::Error(i),
            ThreadItem::Other(raw) => return raw.serialize(serializer),
        };
        known.serialize(serializer)
    }
}
