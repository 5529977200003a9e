//! Model and tool contracts for the browser agent.
//!
//! The crate defines the tool interface (with its schema-validation
//! boundary and static danger categories), the plan data model, the
//! structured model-client contract, and a prompted implementation of that
//! contract over any text language model.

pub mod client;
pub mod error;
pub mod language_model;
pub mod plan;
pub mod prompted;
pub mod tool;

pub use client::{
    ActionDraft, ContextTurn, LastResult, ModelClient, ModelContext, ReflectionVerdict,
    StepOutcome,
};
pub use error::ModelError;
pub use language_model::{
    ChatMessage, ChatRole, LanguageModelClient, LanguageModelRequest, LanguageModelResponse,
    LanguageModelUsage, ModelOptions,
};
pub use plan::{Plan, PlanError, PlanStep, StepStatus};
pub use prompted::{parse_json_reply, PromptConfig, PromptedModelClient};
pub use tool::{
    BrowserTool, DangerCategory, FailureKind, ToolCallError, ToolDescription, ToolExecutionError,
    ToolOutput, ToolRegistry, ToolResult, ValidatedCall,
};
