use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ai_agent::{
    BrowserTool, LastResult, ModelClient, ModelContext, ModelError, Plan, StepOutcome,
    ToolRegistry,
};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::action::{ActionId, ActionProposal, ExecutionResult};
use crate::approvals::ApprovalHandler;
use crate::config::EngineConfig;
use crate::confirmation::ConfirmationGate;
use crate::error::AgentError;
use crate::history::{HistoryEntry, HistoryRecord};
use crate::machine::{transition, Effect, WorkflowEvent, WorkflowState};
use crate::report::FailureReport;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sink::{HistorySink, NullSink};
use crate::state::{AgentState, TerminalResult};
use crate::task::Task;

/// Event to feed into the state machine and the history record that
/// accompanies the resulting transition.
struct Next {
    event: WorkflowEvent,
    record: HistoryRecord,
}

impl Next {
    fn new(event: WorkflowEvent, record: HistoryRecord) -> Self {
        Self { event, record }
    }
}

/// Per-run scratch that does not belong in the audit record.
struct Run {
    state: AgentState,
    gate: ConfirmationGate,
    deadline: Instant,
    tool: Option<Arc<dyn BrowserTool>>,
    backoff: Option<Duration>,
    failure: Option<AgentError>,
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub task: Task,
    pub state: WorkflowState,
    pub summary: Option<String>,
    pub failure: Option<FailureReport>,
    pub plan: Plan,
    pub history: Vec<HistoryEntry>,
    pub root_hash: Option<String>,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == WorkflowState::Done
    }

    /// The summary on success, the failure explanation otherwise.
    pub fn message(&self) -> String {
        match (&self.summary, &self.failure) {
            (Some(summary), _) => summary.clone(),
            (None, Some(report)) => report.explanation(),
            (None, None) => format!("workflow ended in {}", self.state),
        }
    }
}

/// Drives one task at a time through the workflow state machine.
pub struct WorkflowEngine {
    model: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    config: EngineConfig,
    retry: RetryPolicy,
    approval: Option<Arc<dyn ApprovalHandler>>,
    sink: Arc<dyn HistorySink>,
}

impl WorkflowEngine {
    pub fn builder(model: Arc<dyn ModelClient>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new(model)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Runs `goal` to a terminal state. Agent-level failures come back as a
    /// FAILED outcome; `Err` is reserved for rejected input and broken
    /// state machine invariants.
    pub async fn run(&self, goal: &str) -> Result<WorkflowOutcome, AgentError> {
        let task = Task::new(goal);
        if task.goal().is_empty() {
            return Err(AgentError::InvalidTask("task description is empty".into()));
        }
        info!(task_id = %task.id(), goal = task.goal(), "starting task");

        let mut run = Run {
            state: AgentState::new(task.clone()),
            gate: ConfirmationGate::new(self.config.confirmation.clone(), self.approval.clone()),
            deadline: Instant::now() + self.config.task_budget(),
            tool: None,
            backoff: None,
            failure: None,
        };

        let task_id = task.id().clone();
        let mut next = Next::new(WorkflowEvent::Start, HistoryRecord::TaskStarted { task });
        loop {
            let step = transition(run.state.workflow_state(), &next.event)?;
            let entry = run.state.record(step.from, step.to, next.record);
            info!(
                task_id = %task_id,
                sequence = entry.sequence,
                from = %step.from,
                to = %step.to,
                "{}",
                entry.record.describe()
            );
            if let Err(err) = self.sink.append(&task_id, entry) {
                warn!(error = %err, "failed to persist history entry");
            }
            if step.to.is_terminal() {
                break;
            }
            next = self.perform(step.effect, &mut run).await;
        }

        Ok(self.conclude(run))
    }

    fn conclude(&self, mut run: Run) -> WorkflowOutcome {
        let final_state = run.state.workflow_state();
        if final_state == WorkflowState::Failed && run.state.terminal_result.is_none() {
            let error = run
                .failure
                .take()
                .unwrap_or_else(|| AgentError::Unrecoverable("workflow failed".into()));
            let report = FailureReport::from_history(error, run.state.history());
            run.state.terminal_result = Some(TerminalResult::Failed(report));
        }
        let root_hash = run.state.history().root_hash();
        let (task, plan, history, terminal) = run.state.into_parts();
        let (summary, failure) = match terminal {
            Some(TerminalResult::Done { summary }) => (Some(summary), None),
            Some(TerminalResult::Failed(report)) => (None, Some(report)),
            None => (None, None),
        };
        match &failure {
            Some(report) => warn!(task_id = %task.id(), error = %report.error, "task failed"),
            None => info!(task_id = %task.id(), "task completed"),
        }
        WorkflowOutcome {
            task,
            state: final_state,
            summary,
            failure,
            plan,
            history: history.entries().to_vec(),
            root_hash,
        }
    }

    async fn perform(&self, effect: Effect, run: &mut Run) -> Next {
        if let Some(delay) = run.backoff.take() {
            sleep_until((Instant::now() + delay).min(run.deadline)).await;
        }
        if Instant::now() >= run.deadline {
            return self.fail(
                run,
                AgentError::BudgetExceeded {
                    budget_secs: self.config.budget.task_secs,
                },
            );
        }

        match effect {
            Effect::RequestPlan => self.request_plan(run).await,
            Effect::ChooseAction => self.choose_action(run).await,
            Effect::RequestConfirmation => self.request_confirmation(run).await,
            Effect::InvokeTool => self.invoke_tool(run).await,
            Effect::Reflect => self.reflect(run).await,
            Effect::Finalize => self.finalize(run).await,
            Effect::Halt => self.fail(
                run,
                AgentError::Unrecoverable("halt requested from a live state".into()),
            ),
        }
    }

    fn fail(&self, run: &mut Run, error: AgentError) -> Next {
        let reason = error.to_string();
        run.failure = Some(error);
        Next::new(WorkflowEvent::Abort, HistoryRecord::Failed { reason })
    }

    fn context(&self, state: &AgentState) -> ModelContext {
        ModelContext {
            task: state.task().goal().to_string(),
            plan: state.plan().clone(),
            current_step: state.current_step_index(),
            history: state
                .history()
                .context_window(self.config.context.history_entries),
            tools: self.tools.descriptions(),
            corrective_note: state.corrective_note.clone(),
        }
    }

    /// Bounds a model call by the per-call timeout and the task deadline.
    async fn consult<T>(
        &self,
        deadline: Instant,
        call: impl Future<Output = Result<T, ModelError>>,
    ) -> Result<T, ModelError> {
        let limit = self
            .config
            .model_call_timeout()
            .min(deadline.saturating_duration_since(Instant::now()));
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(format!(
                "no reply within {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Malformed replies get a corrective re-request, rate limits and
    /// timeouts are retried with backoff, anything else fails the task.
    fn model_failed(&self, run: &mut Run, error: ModelError) -> Next {
        let state = &mut run.state;
        if error.is_malformed() {
            if state.malformed_retries < self.config.model.max_malformed_retries {
                state.malformed_retries += 1;
                let note = format!(
                    "{error}. Reply with a single JSON object that matches the requested \
                     schema and uses only the listed tools."
                );
                warn!(attempt = state.malformed_retries, %error, "re-requesting model reply");
                state.corrective_note = Some(note.clone());
                return Next::new(
                    WorkflowEvent::ModelRetry,
                    HistoryRecord::ModelRetry {
                        error,
                        attempt: state.malformed_retries,
                        corrective_note: Some(note),
                    },
                );
            }
            return self.fail(run, AgentError::Model(error));
        }

        match self.retry.decide_model(&error, state.model_retries) {
            RetryDecision::Retry { retry, delay } => {
                state.model_retries = retry;
                warn!(retry, delay_ms = delay.as_millis() as u64, %error, "model call will be retried");
                run.backoff = Some(delay);
                Next::new(
                    WorkflowEvent::ModelRetry,
                    HistoryRecord::ModelRetry {
                        error,
                        attempt: retry,
                        corrective_note: None,
                    },
                )
            }
            RetryDecision::GiveUp { .. } => self.fail(run, AgentError::Model(error)),
        }
    }

    async fn request_plan(&self, run: &mut Run) -> Next {
        let context = self.context(&run.state);
        let plan = match self
            .consult(run.deadline, self.model.propose_plan(&context))
            .await
        {
            Ok(plan) => plan,
            Err(error) => return self.model_failed(run, error),
        };
        run.state.model_replied();

        let pending_steps = plan.pending_count();
        if pending_steps == 0 {
            run.failure = Some(AgentError::PlanningFailure(
                "the model produced a plan without any steps".into(),
            ));
        }
        debug!(steps = plan.len(), "plan produced");
        run.state.plan = plan.clone();
        Next::new(
            WorkflowEvent::PlanProduced { pending_steps },
            HistoryRecord::PlanProduced { plan },
        )
    }

    async fn choose_action(&self, run: &mut Run) -> Next {
        let Some(step_index) = run.state.plan.current_index() else {
            return Next::new(WorkflowEvent::NoPendingSteps, HistoryRecord::PlanCompleted);
        };
        if run.state.plan.active_index().is_none() {
            if let Err(err) = run.state.plan.start(step_index) {
                return self.fail(run, AgentError::Unrecoverable(err.to_string()));
            }
        }
        run.state.focus_step(step_index);

        let max_actions = self.config.budget.max_actions_per_step;
        if run.state.actions_for_step >= max_actions {
            return self.fail(
                run,
                AgentError::Unrecoverable(format!(
                    "step {} did not finish within {} actions",
                    step_index + 1,
                    max_actions
                )),
            );
        }

        let context = self.context(&run.state);
        let draft = match self
            .consult(run.deadline, self.model.choose_action(&context))
            .await
        {
            Ok(draft) => draft,
            Err(error) => return self.model_failed(run, error),
        };
        let call = match self.tools.validate_call(&draft.tool_name, &draft.arguments) {
            Ok(call) => call,
            Err(err) => return self.model_failed(run, ModelError::malformed(err.to_string())),
        };
        run.state.model_replied();

        let danger = call.description.danger;
        let proposal = ActionProposal {
            action_id: ActionId::generate(),
            step_index,
            tool_name: call.description.name.clone(),
            arguments: call.arguments,
            rationale: draft.rationale,
            danger,
            requires_confirmation: run.gate.requires_confirmation(danger),
        };
        debug!(
            action_id = %proposal.action_id,
            tool = %proposal.tool_name,
            danger = %danger,
            "action proposed"
        );

        let requires_confirmation = proposal.requires_confirmation;
        run.state.actions_for_step += 1;
        run.state.retry_count_for_current_step = 0;
        run.state.last_result = None;
        run.state.current_action = Some(proposal.clone());
        run.state.pending_confirmation = requires_confirmation.then(|| proposal.clone());
        run.tool = Some(call.tool);

        Next::new(
            WorkflowEvent::ActionSelected {
                requires_confirmation,
            },
            HistoryRecord::ActionProposed { proposal },
        )
    }

    async fn request_confirmation(&self, run: &mut Run) -> Next {
        let Some(proposal) = run.state.pending_confirmation.take() else {
            return self.fail(
                run,
                AgentError::Unrecoverable("no action is awaiting confirmation".into()),
            );
        };
        info!(
            action_id = %proposal.action_id,
            tool = %proposal.tool_name,
            danger = %proposal.danger,
            "awaiting confirmation"
        );
        let outcome = run.gate.confirm(&proposal, run.deadline).await;
        let decision = outcome.decision;

        if decision.approved {
            return Next::new(
                WorkflowEvent::ConfirmationApproved,
                HistoryRecord::ConfirmationDecided {
                    tool_name: proposal.tool_name,
                    decision,
                },
            );
        }

        let reason = decision
            .reason
            .clone()
            .unwrap_or_else(|| "rejected by the user".to_string());
        run.state.last_result = Some(LastResult {
            tool_name: proposal.tool_name.clone(),
            arguments: proposal.arguments.clone(),
            outcome: StepOutcome::Rejected { reason },
        });
        run.tool = None;
        Next::new(
            WorkflowEvent::ConfirmationDenied,
            HistoryRecord::ConfirmationDecided {
                tool_name: proposal.tool_name,
                decision,
            },
        )
    }

    async fn invoke_tool(&self, run: &mut Run) -> Next {
        let (Some(proposal), Some(tool)) = (run.state.current_action.clone(), run.tool.clone())
        else {
            return self.fail(
                run,
                AgentError::Unrecoverable("no validated action to execute".into()),
            );
        };
        if proposal.requires_confirmation {
            let approved = run
                .gate
                .decision_for(&proposal.action_id)
                .map(|decision| decision.approved)
                .unwrap_or(false);
            if !approved {
                return self.fail(
                    run,
                    AgentError::Unrecoverable(format!(
                        "refusing to run {} without an approved confirmation",
                        proposal.tool_name
                    )),
                );
            }
        }

        let attempt = run.state.retry_count_for_current_step + 1;
        let started = Instant::now();
        let invocation = tool.invoke(proposal.arguments.clone());
        let result = if proposal.danger.is_dangerous() {
            // Approved dangerous calls run to completion.
            invocation.await
        } else {
            match timeout_at(run.deadline, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    return self.fail(
                        run,
                        AgentError::BudgetExceeded {
                            budget_secs: self.config.budget.task_secs,
                        },
                    )
                }
            }
        };
        let result = ExecutionResult::from_attempt(&proposal, attempt, started.elapsed(), result);

        let Some(error) = result.error.clone() else {
            debug!(tool = %proposal.tool_name, attempt, "tool call succeeded");
            run.state.consecutive_unviable = 0;
            run.state.last_result = Some(LastResult {
                tool_name: proposal.tool_name.clone(),
                arguments: proposal.arguments.clone(),
                outcome: StepOutcome::Succeeded {
                    output: result
                        .output
                        .as_ref()
                        .map(|output| output.content.clone())
                        .unwrap_or_default(),
                },
            });
            return Next::new(
                WorkflowEvent::ExecutionSettled,
                HistoryRecord::ActionExecuted {
                    result,
                    escalated: false,
                },
            );
        };

        match self
            .retry
            .decide(&error, run.state.retry_count_for_current_step)
        {
            RetryDecision::Retry { retry, delay } => {
                warn!(
                    tool = %proposal.tool_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient tool failure, retrying"
                );
                run.state.retry_count_for_current_step = retry;
                run.backoff = Some(delay);
                Next::new(
                    WorkflowEvent::ExecutionRetrying,
                    HistoryRecord::ActionExecuted {
                        result,
                        escalated: false,
                    },
                )
            }
            RetryDecision::GiveUp { escalated } => {
                warn!(tool = %proposal.tool_name, attempt, escalated, %error, "tool call failed");
                run.state.last_result = Some(LastResult {
                    tool_name: proposal.tool_name.clone(),
                    arguments: proposal.arguments.clone(),
                    outcome: StepOutcome::Failed {
                        error: error.message().to_string(),
                        attempts: attempt,
                    },
                });
                Next::new(
                    WorkflowEvent::ExecutionSettled,
                    HistoryRecord::ActionExecuted { result, escalated },
                )
            }
        }
    }

    async fn reflect(&self, run: &mut Run) -> Next {
        let Some(last) = run.state.last_result.clone() else {
            return self.fail(
                run,
                AgentError::Unrecoverable("nothing to reflect on".into()),
            );
        };
        let context = self.context(&run.state);
        let mut verdict = match self
            .consult(run.deadline, self.model.reflect(&context, &last))
            .await
        {
            Ok(verdict) => verdict,
            Err(error) => return self.model_failed(run, error),
        };
        run.state.model_replied();

        // A refused or failed action never completes its step; only a skip
        // or a replacement plan moves past it.
        if last.requires_replan() {
            if verdict.step_done {
                warn!(
                    step = ?run.state.current_step_index,
                    "ignoring step_done after {}",
                    describe_outcome(&last.outcome)
                );
            }
            verdict.step_done = false;
            verdict.should_replan = true;
        }

        let state = &mut run.state;
        let mut replanned = false;
        let mut unviable = false;
        let settled = match state.current_step_index {
            Some(index) if verdict.step_done => state.plan.mark_done(index).map(|_| true),
            Some(index) if verdict.skip_step => state.plan.mark_skipped(index).map(|_| true),
            _ => Ok(false),
        };
        match settled {
            Ok(true) => state.step_settled(),
            Ok(false) => {
                if let Some(updated) = &verdict.updated_plan {
                    if let Some(index) = state.plan.active_index() {
                        let _ = state.plan.release(index);
                    }
                    state.plan.replace_pending(updated.open_descriptions());
                    state.actions_for_step = 0;
                    replanned = true;
                }
                if last.requires_replan() {
                    state.consecutive_unviable += 1;
                    unviable = state.consecutive_unviable >= self.config.replan.max_unviable;
                }
            }
            Err(err) => {
                let error = AgentError::Unrecoverable(err.to_string());
                return self.fail(run, error);
            }
        }
        state.clear_action();
        run.tool = None;

        let record = HistoryRecord::Reflected {
            verdict,
            replanned,
            plan: run.state.plan.clone(),
        };
        if unviable {
            run.failure = Some(AgentError::Unrecoverable(format!(
                "no viable alternative after {} consecutive failed attempts ({})",
                run.state.consecutive_unviable,
                describe_outcome(&last.outcome)
            )));
            return Next::new(WorkflowEvent::Unrecoverable, record);
        }
        Next::new(
            WorkflowEvent::StepReviewed {
                pending_steps: run.state.plan.pending_count(),
            },
            record,
        )
    }

    async fn finalize(&self, run: &mut Run) -> Next {
        let context = self.context(&run.state);
        let summary = match self
            .consult(run.deadline, self.model.finalize(&context))
            .await
        {
            Ok(summary) => summary,
            Err(error) => return self.model_failed(run, error),
        };
        run.state.model_replied();
        run.state.terminal_result = Some(TerminalResult::Done {
            summary: summary.clone(),
        });
        Next::new(
            WorkflowEvent::SummaryProduced,
            HistoryRecord::Summarized { summary },
        )
    }
}

fn describe_outcome(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Succeeded { .. } => "last action succeeded".to_string(),
        StepOutcome::Failed { error, attempts } => {
            format!("last action failed after {attempts} attempt(s): {error}")
        }
        StepOutcome::Rejected { reason } => format!("last action was rejected: {reason}"),
    }
}

pub struct WorkflowEngineBuilder {
    model: Arc<dyn ModelClient>,
    config: EngineConfig,
    tools: Vec<Arc<dyn BrowserTool>>,
    approval_handler: Option<Arc<dyn ApprovalHandler>>,
    sink: Arc<dyn HistorySink>,
}

impl WorkflowEngineBuilder {
    fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            config: EngineConfig::default(),
            tools: Vec::new(),
            approval_handler: None,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn register_tool(mut self, tool: Arc<dyn BrowserTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, AgentError> {
        self.config.validate()?;
        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }
        Ok(WorkflowEngine {
            model: self.model,
            tools,
            retry: RetryPolicy::from(&self.config.retry),
            config: self.config,
            approval: self.approval_handler,
            sink: self.sink,
        })
    }
}
