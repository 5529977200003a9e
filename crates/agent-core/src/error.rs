use ai_agent::{ModelError, ToolCallError, ToolExecutionError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::machine::TransitionError;

/// Everything that can end a workflow run or reject one of its inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("tool error: {0}")]
    Tool(#[from] ToolExecutionError),
    #[error("invalid tool call: {0}")]
    ToolCall(#[from] ToolCallError),
    #[error("confirmation for action {action_id} timed out")]
    ConfirmationTimeout { action_id: String },
    #[error("action {action_id} was rejected: {reason}")]
    ConfirmationRejected { action_id: String, reason: String },
    #[error("planning failed: {0}")]
    PlanningFailure(String),
    #[error("task budget of {budget_secs}s exceeded")]
    BudgetExceeded { budget_secs: u64 },
    #[error("task cannot be completed: {0}")]
    Unrecoverable(String),
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl AgentError {
    /// Errors raised before a run starts, as opposed to a run ending in FAILED.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::InvalidTask(_) | Self::Config(_))
    }
}
