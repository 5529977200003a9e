use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::plan::Plan;
use crate::tool::ToolDescription;

/// One entry of the conversation replayed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum ContextTurn {
    User {
        text: String,
    },
    Agent {
        text: String,
    },
    ToolCall {
        name: String,
        args: Value,
        rationale: String,
    },
    Observation {
        name: String,
        attempt: u32,
        output: Value,
    },
    ToolFailure {
        name: String,
        attempt: u32,
        error: String,
    },
    Confirmation {
        name: String,
        approved: bool,
        reason: Option<String>,
    },
    Note {
        text: String,
    },
}

impl ContextTurn {
    pub fn render(&self) -> String {
        match self {
            Self::User { text } => format!("User: {text}"),
            Self::Agent { text } => format!("Agent: {text}"),
            Self::ToolCall {
                name,
                args,
                rationale,
            } => format!(
                "ToolCall[{}]: {} ({})",
                name,
                serde_json::to_string(args).unwrap_or_default(),
                rationale
            ),
            Self::Observation {
                name,
                attempt,
                output,
            } => format!(
                "Observation[{}#{}]: {}",
                name,
                attempt,
                serde_json::to_string(output).unwrap_or_default()
            ),
            Self::ToolFailure {
                name,
                attempt,
                error,
            } => format!("ToolError[{name}#{attempt}]: {error}"),
            Self::Confirmation {
                name,
                approved,
                reason,
            } => {
                let verdict = if *approved { "approved" } else { "rejected" };
                match reason {
                    Some(reason) => format!("Confirmation[{name}]: {verdict} ({reason})"),
                    None => format!("Confirmation[{name}]: {verdict}"),
                }
            }
            Self::Note { text } => format!("Note: {text}"),
        }
    }
}

/// Everything a model call may look at. History is already truncated by
/// the caller.
#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    pub task: String,
    pub plan: Plan,
    pub current_step: Option<usize>,
    pub history: Vec<ContextTurn>,
    pub tools: Vec<ToolDescription>,
    /// Set when the previous reply was rejected and is being re-requested.
    pub corrective_note: Option<String>,
}

/// Unvalidated action the model wants to take. It only becomes executable
/// after the tool registry accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDraft {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { output: Value },
    Failed { error: String, attempts: u32 },
    Rejected { reason: String },
}

/// The result the reflection phase judges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastResult {
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: StepOutcome,
}

impl LastResult {
    /// Failures and refusals always ask the model for a different approach.
    pub fn requires_replan(&self) -> bool {
        !matches!(self.outcome, StepOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub step_done: bool,
    #[serde(default)]
    pub should_replan: bool,
    /// Abandon the current step without completing it.
    #[serde(default)]
    pub skip_step: bool,
    #[serde(default)]
    pub updated_plan: Option<Plan>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Reasoning oracle driving the workflow. Outputs are untrusted: callers
/// validate them before acting.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn propose_plan(&self, context: &ModelContext) -> Result<Plan, ModelError>;

    async fn choose_action(&self, context: &ModelContext) -> Result<ActionDraft, ModelError>;

    async fn reflect(
        &self,
        context: &ModelContext,
        last_result: &LastResult,
    ) -> Result<ReflectionVerdict, ModelError>;

    async fn finalize(&self, context: &ModelContext) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_turns_for_prompts() {
        let call = ContextTurn::ToolCall {
            name: "navigate_to_url".into(),
            args: json!({ "url": "https://example.com" }),
            rationale: "open the site".into(),
        };
        assert_eq!(
            call.render(),
            r#"ToolCall[navigate_to_url]: {"url":"https://example.com"} (open the site)"#
        );

        let refusal = ContextTurn::Confirmation {
            name: "delete_account".into(),
            approved: false,
            reason: Some("timed out".into()),
        };
        assert_eq!(
            refusal.render(),
            "Confirmation[delete_account]: rejected (timed out)"
        );
    }

    #[test]
    fn only_success_skips_replanning() {
        let mut last = LastResult {
            tool_name: "navigate_to_url".into(),
            arguments: json!({}),
            outcome: StepOutcome::Succeeded { output: json!("ok") },
        };
        assert!(!last.requires_replan());
        last.outcome = StepOutcome::Rejected {
            reason: "denied".into(),
        };
        assert!(last.requires_replan());
    }
}
