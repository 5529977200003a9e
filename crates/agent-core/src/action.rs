use std::fmt;
use std::time::Duration;

use ai_agent::{DangerCategory, ToolExecutionError, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::current_timestamp_ms;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A model-chosen tool call that passed validation. `danger` comes from the
/// tool registry and `requires_confirmation` from the gate's policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action_id: ActionId,
    pub step_index: usize,
    pub tool_name: String,
    pub arguments: Value,
    pub rationale: String,
    pub danger: DangerCategory,
    pub requires_confirmation: bool,
}

/// Immutable record of one tool attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action_id: ActionId,
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolExecutionError>,
    pub duration_ms: u64,
    pub attempt: u32,
}

impl ExecutionResult {
    pub fn from_attempt(
        proposal: &ActionProposal,
        attempt: u32,
        duration: Duration,
        result: Result<ToolOutput, ToolExecutionError>,
    ) -> Self {
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            action_id: proposal.action_id.clone(),
            tool_name: proposal.tool_name.clone(),
            arguments: proposal.arguments.clone(),
            output,
            error,
            duration_ms: duration.as_millis() as u64,
            attempt,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Human,
    /// No answer arrived before the confirmation timeout.
    Timeout,
    /// The approval channel itself failed.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub action_id: ActionId,
    pub approved: bool,
    pub source: DecisionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp_ms: u64,
}

impl ConfirmationDecision {
    pub fn human(action_id: ActionId, approved: bool, reason: Option<String>) -> Self {
        Self {
            action_id,
            approved,
            source: DecisionSource::Human,
            reason,
            timestamp_ms: current_timestamp_ms(),
        }
    }

    pub fn timed_out(action_id: ActionId, waited: Duration) -> Self {
        Self {
            action_id,
            approved: false,
            source: DecisionSource::Timeout,
            reason: Some(format!("no answer within {}s", waited.as_secs())),
            timestamp_ms: current_timestamp_ms(),
        }
    }

    pub fn unavailable(action_id: ActionId, reason: impl Into<String>) -> Self {
        Self {
            action_id,
            approved: false,
            source: DecisionSource::Unavailable,
            reason: Some(reason.into()),
            timestamp_ms: current_timestamp_ms(),
        }
    }
}
