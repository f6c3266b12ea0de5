use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::items::ThreadItem;

/// What kind of progress a [`ConversationStep`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Incremental content for an item still in progress.
    Delta,
    /// An item reached its final state.
    Completed,
    /// The turn finished successfully. Always the last step.
    TurnCompleted,
    /// The turn failed. Carried inside the error that ends the stream.
    TurnFailed,
}

/// Lifecycle of a turn as seen by its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// `turn/start` accepted, nothing received yet.
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Failed | TurnState::Cancelled
        )
    }
}

/// One observable unit of turn progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStep {
    pub thread_id: String,
    pub turn_id: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The decoded item for `Completed` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ThreadItem>,
    /// Set when the streamed deltas for this item disagree with its
    /// completed content. The completed content is what `text` holds.
    #[serde(default)]
    pub delta_mismatch: bool,
    /// Raw notification params the step was built from.
    pub data: Value,
}

impl ConversationStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self.step_type, StepType::TurnCompleted | StepType::TurnFailed)
    }

    /// Whether this step completes an agent message (the model's reply text).
    pub fn is_agent_message(&self) -> bool {
        self.step_type == StepType::Completed
            && matches!(self.item, Some(ThreadItem::AgentMessage(_)))
    }
}

/// Outcome of a turn drained to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub thread_id: String,
    pub turn_id: String,
    /// Text of the last agent message of the turn, or empty if there was none.
    pub final_text: String,
    /// Every step yielded for the turn, in order.
    pub steps: Vec<ConversationStep>,
    pub state: TurnState,
}

impl ChatResult {
    /// Build the aggregate from the steps of one turn.
    pub fn from_steps(
        thread_id: String,
        turn_id: String,
        steps: Vec<ConversationStep>,
        state: TurnState,
    ) -> Self {
        let final_text = steps
            .iter()
            .rev()
            .find(|s| s.is_agent_message())
            .and_then(|s| s.text.clone())
            .unwrap_or_default();
        Self {
            thread_id,
            turn_id,
            final_text,
            steps,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::items::AgentMessageItem;
    use serde_json::json;

    fn completed_message(id: &str, text: &str) -> ConversationStep {
        ConversationStep {
            thread_id: "th_1".to_string(),
            turn_id: "t_1".to_string(),
            step_type: StepType::Completed,
            item_type: Some("agentMessage".to_string()),
            item_id: Some(id.to_string()),
            text: Some(text.to_string()),
            item: Some(ThreadItem::AgentMessage(AgentMessageItem {
                id: id.to_string(),
                text: text.to_string(),
            })),
            delta_mismatch: false,
            data: json!({}),
        }
    }

    #[test]
    fn test_final_text_is_last_agent_message() {
        let steps = vec![
            completed_message("m1", "first"),
            completed_message("m2", "second"),
        ];
        let result =
            ChatResult::from_steps("th_1".into(), "t_1".into(), steps, TurnState::Completed);
        assert_eq!(result.final_text, "second");
        assert_eq!(result.steps.len(), 2);
    }

    #[test]
    fn test_final_text_empty_without_agent_message() {
        let result =
            ChatResult::from_steps("th_1".into(), "t_1".into(), vec![], TurnState::Completed);
        assert!(result.final_text.is_empty());
    }

    #[test]
    fn test_turn_state_terminal() {
        assert!(!TurnState::Pending.is_terminal());
        assert!(!TurnState::Active.is_terminal());
        assert!(TurnState::Cancelled.is_terminal());
    }

    #[test]
    fn test_step_type_serde() {
        let json = serde_json::to_string(&StepType::TurnCompleted).unwrap();
        assert_eq!(json, r#""turn_completed""#);
    }
}
