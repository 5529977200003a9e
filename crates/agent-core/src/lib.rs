//! Workflow engine for the browser agent: task and agent state, the
//! append-only history, the confirmation gate in front of dangerous tools,
//! the retry policy, and the state machine that ties them together.

pub mod action;
pub mod approvals;
pub mod config;
pub mod confirmation;
pub mod engine;
pub mod error;
pub mod history;
pub mod machine;
pub mod report;
pub mod retry;
pub mod sink;
pub mod state;
pub mod task;

pub use action::{ActionId, ActionProposal, ConfirmationDecision, DecisionSource, ExecutionResult};
pub use approvals::{
    ApprovalBroker, ApprovalHandler, BrokeredApprovalHandler, ConfirmationReply,
    ConfirmationRequest, RejectAll,
};
pub use config::{
    BudgetConfig, ConfigError, ConfirmationConfig, ContextConfig, EngineConfig, ModelRetryConfig,
    ReplanConfig, RetryConfig,
};
pub use confirmation::{ConfirmationGate, GateOutcome};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder, WorkflowOutcome};
pub use error::AgentError;
pub use history::{History, HistoryEntry, HistoryRecord};
pub use machine::{transition, Effect, Transition, TransitionError, WorkflowEvent, WorkflowState};
pub use report::FailureReport;
pub use retry::{RetryDecision, RetryPolicy};
pub use sink::{HistorySink, MemorySink, NullSink};
pub use state::{AgentState, TerminalResult};
pub use task::{Task, TaskId};
