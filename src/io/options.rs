use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A configuration field that distinguishes "not mentioned" from "cleared".
///
/// - `Unset` inherits whatever the server or the previous layer has. It is
///   omitted from the wire entirely.
/// - `Clear` explicitly removes a value; it serializes as `null`.
/// - `Value(v)` sets the value.
///
/// Merging a `Setting` onto another keeps the left side only when the right
/// side is `Unset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    Unset,
    Clear,
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Setting::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: Setting<T>) {
        if !other.is_unset() {
            *self = other;
        }
    }
}

impl<T: Clone> Setting<T> {
    /// `self` overlaid with `other`, leaving both untouched.
    pub fn merged(&self, other: &Setting<T>) -> Setting<T> {
        match other {
            Setting::Unset => self.clone(),
            o => o.clone(),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Setting::Value(value)
    }
}

impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Setting::Value(v) => v.serialize(serializer),
            Setting::Unset | Setting::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    /// A present `null` is `Clear`; a missing field (with `#[serde(default)]`) is `Unset`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(v) => Setting::Value(v),
            None => Setting::Clear,
        })
    }
}

/// Approval mode for tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    Never,
    OnRequest,
    OnFailure,
    Untrusted,
}

/// Sandbox mode controlling file system access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

/// Model reasoning effort level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

/// How much of the model's reasoning is summarized back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
    None,
}

/// Defaults a thread handle applies to every turn it starts.
///
/// Sent with `thread/start`, `thread/resume` and `thread/fork`, and merged
/// into each `turn/start`. Every field is a [`Setting`], so a partial config
/// only touches the fields it mentions.
///
/// ```
/// use codex_app_server_client::{ReasoningEffort, Setting, ThreadConfig};
///
/// let mut defaults = ThreadConfig::new()
///     .model("gpt-5-codex")
///     .developer_instructions("Focus on tests.");
/// defaults.update(ThreadConfig::new().effort(ReasoningEffort::Low).clear_model());
///
/// assert_eq!(defaults.model, Setting::Clear);
/// assert_eq!(defaults.effort, Setting::Value(ReasoningEffort::Low));
/// assert_eq!(defaults.developer_instructions.as_value().map(String::as_str), Some("Focus on tests."));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadConfig {
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub cwd: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub base_instructions: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub developer_instructions: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub model: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub effort: Setting<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub summary: Setting<ReasoningSummary>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub approval_policy: Setting<ApprovalMode>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub sandbox: Setting<SandboxMode>,
}

impl ThreadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Setting::Value(cwd.into());
        self
    }

    pub fn base_instructions(mut self, text: impl Into<String>) -> Self {
        self.base_instructions = Setting::Value(text.into());
        self
    }

    pub fn developer_instructions(mut self, text: impl Into<String>) -> Self {
        self.developer_instructions = Setting::Value(text.into());
        self
    }

    pub fn clear_developer_instructions(mut self) -> Self {
        self.developer_instructions = Setting::Clear;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Setting::Value(model.into());
        self
    }

    pub fn clear_model(mut self) -> Self {
        self.model = Setting::Clear;
        self
    }

    pub fn effort(mut self, effort: ReasoningEffort) -> Self {
        self.effort = Setting::Value(effort);
        self
    }

    pub fn summary(mut self, summary: ReasoningSummary) -> Self {
        self.summary = Setting::Value(summary);
        self
    }

    pub fn approval_policy(mut self, policy: ApprovalMode) -> Self {
        self.approval_policy = Setting::Value(policy);
        self
    }

    pub fn sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = Setting::Value(sandbox);
        self
    }

    /// Overlay `partial` onto these defaults, field by field.
    pub fn update(&mut self, partial: ThreadConfig) {
        self.cwd.merge(partial.cwd);
        self.base_instructions.merge(partial.base_instructions);
        self.developer_instructions
            .merge(partial.developer_instructions);
        self.model.merge(partial.model);
        self.effort.merge(partial.effort);
        self.summary.merge(partial.summary);
        self.approval_policy.merge(partial.approval_policy);
        self.sandbox.merge(partial.sandbox);
    }

    /// A copy of these defaults with `partial` overlaid.
    pub fn merged(&self, partial: &ThreadConfig) -> ThreadConfig {
        let mut out = self.clone();
        out.update(partial.clone());
        out
    }

    /// The effective settings for one turn.
    pub fn with_turn_overrides(&self, overrides: &TurnOverrides) -> ThreadConfig {
        ThreadConfig {
            cwd: self.cwd.merged(&overrides.cwd),
            model: self.model.merged(&overrides.model),
            effort: self.effort.merged(&overrides.effort),
            summary: self.summary.merged(&overrides.summary),
            approval_policy: self.approval_policy.merged(&overrides.approval_policy),
            sandbox: self.sandbox.merged(&overrides.sandbox),
            ..self.clone()
        }
    }
}

/// Per-turn settings layered over a thread's defaults for a single turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOverrides {
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub cwd: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub model: Setting<String>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub effort: Setting<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub summary: Setting<ReasoningSummary>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub approval_policy: Setting<ApprovalMode>,
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub sandbox: Setting<SandboxMode>,
    /// JSON schema the final agent message must conform to.
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub output_schema: Setting<Value>,
}

impl TurnOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Setting::Value(cwd.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Setting::Value(model.into());
        self
    }

    pub fn effort(mut self, effort: ReasoningEffort) -> Self {
        self.effort = Setting::Value(effort);
        self
    }

    pub fn summary(mut self, summary: ReasoningSummary) -> Self {
        self.summary = Setting::Value(summary);
        self
    }

    pub fn approval_policy(mut self, policy: ApprovalMode) -> Self {
        self.approval_policy = Setting::Value(policy);
        self
    }

    pub fn sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = Setting::Value(sandbox);
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Setting::Value(schema);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_config_default_is_empty_object() {
        let json = serde_json::to_string(&ThreadConfig::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_setting_three_states_on_the_wire() {
        let config = ThreadConfig::new().model("o4-mini").clear_developer_instructions();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["model"], "o4-mini");
        assert!(json["developerInstructions"].is_null());
        assert!(json.as_object().unwrap().contains_key("developerInstructions"));
        assert!(!json.as_object().unwrap().contains_key("cwd"));
    }

    #[test]
    fn test_setting_deserialize_null_vs_missing() {
        let config: ThreadConfig =
            serde_json::from_str(r#"{"model":null,"cwd":"/work"}"#).unwrap();
        assert_eq!(config.model, Setting::Clear);
        assert_eq!(config.cwd, Setting::Value("/work".to_string()));
        assert_eq!(config.effort, Setting::Unset);
    }

    #[test]
    fn test_update_merges_field_by_field() {
        let mut defaults = ThreadConfig::new()
            .cwd("/repo")
            .model("gpt-5")
            .developer_instructions("Prefer actionable suggestions.");

        defaults.update(
            ThreadConfig::new()
                .developer_instructions("Prioritize safety and edge cases.")
                .clear_model(),
        );

        assert_eq!(defaults.cwd, Setting::Value("/repo".to_string()));
        assert_eq!(defaults.model, Setting::Clear);
        assert_eq!(
            defaults.developer_instructions,
            Setting::Value("Prioritize safety and edge cases.".to_string())
        );
    }

    #[test]
    fn test_turn_overrides_layer_over_defaults() {
        let defaults = ThreadConfig::new()
            .model("gpt-5")
            .effort(ReasoningEffort::High)
            .developer_instructions("Focus on tests.");
        let overrides = TurnOverrides::new().effort(ReasoningEffort::Low);

        let turn = defaults.with_turn_overrides(&overrides);
        assert_eq!(turn.effort, Setting::Value(ReasoningEffort::Low));
        assert_eq!(turn.model, Setting::Value("gpt-5".to_string()));
        assert_eq!(
            turn.developer_instructions,
            Setting::Value("Focus on tests.".to_string())
        );
        // Defaults are untouched.
        assert_eq!(defaults.effort, Setting::Value(ReasoningEffort::High));
    }

    #[test]
    fn test_approval_mode_serde() {
        let mode: ApprovalMode = serde_json::from_str(r#""on-request""#).unwrap();
        assert_eq!(mode, ApprovalMode::OnRequest);
    }

    #[test]
    fn test_sandbox_mode_serde() {
        let mode: SandboxMode = serde_json::from_str(r#""workspace-write""#).unwrap();
        assert_eq!(mode, SandboxMode::WorkspaceWrite);
    }

    #[test]
    fn test_reasoning_effort_serde() {
        let effort: ReasoningEffort = serde_json::from_str(r#""xhigh""#).unwrap();
        assert_eq!(effort, ReasoningEffort::Xhigh);
    }

    #[test]
    fn test_from_value() {
        let s: Setting<String> = "x".to_string().into();
        assert_eq!(s.as_value().map(String::as_str), Some("x"));
        assert!(Setting::<String>::default().is_unset());
    }
}
