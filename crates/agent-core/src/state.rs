use ai_agent::{LastResult, Plan};

use crate::action::ActionProposal;
use crate::history::{History, HistoryEntry, HistoryRecord};
use crate::machine::WorkflowState;
use crate::report::FailureReport;
use crate::task::Task;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalResult {
    Done { summary: String },
    Failed(FailureReport),
}

/// Mutable record of one task run. Owned by a single engine run and
/// dropped once the run reaches a terminal state.
#[derive(Debug)]
pub struct AgentState {
    task: Task,
    workflow_state: WorkflowState,
    pub(crate) plan: Plan,
    history: History,
    pub(crate) current_step_index: Option<usize>,
    pub(crate) retry_count_for_current_step: u32,
    pub(crate) pending_confirmation: Option<ActionProposal>,
    pub(crate) current_action: Option<ActionProposal>,
    pub(crate) last_result: Option<LastResult>,
    pub(crate) terminal_result: Option<TerminalResult>,
    /// Failed cycles in a row without a success or a settled step.
    pub(crate) consecutive_unviable: u32,
    pub(crate) actions_for_step: u32,
    pub(crate) model_retries: u32,
    pub(crate) malformed_retries: u32,
    pub(crate) corrective_note: Option<String>,
}

impl AgentState {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            workflow_state: WorkflowState::Init,
            plan: Plan::new(),
            history: History::new(),
            current_step_index: None,
            retry_count_for_current_step: 0,
            pending_confirmation: None,
            current_action: None,
            last_result: None,
            terminal_result: None,
            consecutive_unviable: 0,
            actions_for_step: 0,
            model_retries: 0,
            malformed_retries: 0,
            corrective_note: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow_state
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.current_step_index
    }

    pub fn retry_count_for_current_step(&self) -> u32 {
        self.retry_count_for_current_step
    }

    pub fn pending_confirmation(&self) -> Option<&ActionProposal> {
        self.pending_confirmation.as_ref()
    }

    pub fn terminal_result(&self) -> Option<&TerminalResult> {
        self.terminal_result.as_ref()
    }

    /// Moves to `to` and appends the matching history entry.
    pub(crate) fn record(
        &mut self,
        from: WorkflowState,
        to: WorkflowState,
        record: HistoryRecord,
    ) -> &HistoryEntry {
        self.workflow_state = to;
        self.history.append(from, to, record)
    }

    /// A usable model reply clears every model retry counter.
    pub(crate) fn model_replied(&mut self) {
        self.model_retries = 0;
        self.malformed_retries = 0;
        self.corrective_note = None;
    }

    /// Called when the active step is done or skipped.
    pub(crate) fn step_settled(&mut self) {
        self.current_step_index = None;
        self.consecutive_unviable = 0;
        self.actions_for_step = 0;
    }

    pub(crate) fn focus_step(&mut self, index: usize) {
        if self.current_step_index != Some(index) {
            self.current_step_index = Some(index);
            self.actions_for_step = 0;
        }
    }

    pub(crate) fn clear_action(&mut self) {
        self.current_action = None;
        self.pending_confirmation = None;
        self.last_result = None;
        self.retry_count_for_current_step = 0;
    }

    pub(crate) fn into_parts(self) -> (Task, Plan, History, Option<TerminalResult>) {
        (self.task, self.plan, self.history, self.terminal_result)
    }
}
