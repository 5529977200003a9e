use ai_agent::{ContextTurn, ModelError, Plan, ReflectionVerdict};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::action::{ActionProposal, ConfirmationDecision, ExecutionResult};
use crate::machine::WorkflowState;
use crate::task::{current_timestamp_ms, Task};

/// Payload of one history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    TaskStarted {
        task: Task,
    },
    PlanProduced {
        plan: Plan,
    },
    ModelRetry {
        error: ModelError,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        corrective_note: Option<String>,
    },
    ActionProposed {
        proposal: ActionProposal,
    },
    PlanCompleted,
    ConfirmationDecided {
        tool_name: String,
        decision: ConfirmationDecision,
    },
    ActionExecuted {
        result: ExecutionResult,
        /// A transient failure that hit the retry ceiling.
        #[serde(default)]
        escalated: bool,
    },
    Reflected {
        verdict: ReflectionVerdict,
        replanned: bool,
        plan: Plan,
    },
    Summarized {
        summary: String,
    },
    Failed {
        reason: String,
    },
}

impl HistoryRecord {
    pub fn describe(&self) -> String {
        match self {
            Self::TaskStarted { task } => format!("task started: {}", task.goal()),
            Self::PlanProduced { plan } => format!("plan with {} step(s)", plan.len()),
            Self::ModelRetry { error, attempt, .. } => {
                format!("model reply rejected (attempt {attempt}): {error}")
            }
            Self::ActionProposed { proposal } => format!(
                "proposed {} [{}] for step {}: {}",
                proposal.tool_name,
                proposal.danger,
                proposal.step_index + 1,
                proposal.rationale
            ),
            Self::PlanCompleted => "no pending steps remain".to_string(),
            Self::ConfirmationDecided {
                tool_name,
                decision,
            } => {
                let verdict = if decision.approved {
                    "approved"
                } else {
                    "rejected"
                };
                match &decision.reason {
                    Some(reason) => format!("{tool_name} {verdict} ({reason})"),
                    None => format!("{tool_name} {verdict}"),
                }
            }
            Self::ActionExecuted { result, escalated } => match &result.error {
                None => format!("{} succeeded on attempt {}", result.tool_name, result.attempt),
                Some(error) if *escalated => format!(
                    "{} failed on attempt {} and retries are exhausted: {}",
                    result.tool_name, result.attempt, error
                ),
                Some(error) => format!(
                    "{} failed on attempt {}: {}",
                    result.tool_name, result.attempt, error
                ),
            },
            Self::Reflected {
                verdict, replanned, ..
            } => {
                let mut text = if verdict.step_done {
                    "step done".to_string()
                } else if verdict.skip_step {
                    "step skipped".to_string()
                } else {
                    "step not done".to_string()
                };
                if *replanned {
                    text.push_str(", plan revised");
                }
                if let Some(note) = &verdict.note {
                    text.push_str(": ");
                    text.push_str(note);
                }
                text
            }
            Self::Summarized { summary } => format!("summary: {summary}"),
            Self::Failed { reason } => format!("failed: {reason}"),
        }
    }

    fn to_turn(&self) -> ContextTurn {
        match self {
            Self::TaskStarted { task } => ContextTurn::User {
                text: task.goal().to_string(),
            },
            Self::PlanProduced { plan } => ContextTurn::Agent {
                text: format!("Plan:\n{}", plan.render()),
            },
            Self::ActionProposed { proposal } => ContextTurn::ToolCall {
                name: proposal.tool_name.clone(),
                args: proposal.arguments.clone(),
                rationale: proposal.rationale.clone(),
            },
            Self::ConfirmationDecided {
                tool_name,
                decision,
            } => ContextTurn::Confirmation {
                name: tool_name.clone(),
                approved: decision.approved,
                reason: decision.reason.clone(),
            },
            Self::ActionExecuted { result, .. } => match (&result.output, &result.error) {
                (_, Some(error)) => ContextTurn::ToolFailure {
                    name: result.tool_name.clone(),
                    attempt: result.attempt,
                    error: error.to_string(),
                },
                (Some(output), None) => ContextTurn::Observation {
                    name: result.tool_name.clone(),
                    attempt: result.attempt,
                    output: output.content.clone(),
                },
                (None, None) => ContextTurn::Observation {
                    name: result.tool_name.clone(),
                    attempt: result.attempt,
                    output: serde_json::Value::Null,
                },
            },
            Self::Summarized { summary } => ContextTurn::Agent {
                text: summary.clone(),
            },
            other => ContextTurn::Note {
                text: other.describe(),
            },
        }
    }
}

/// Entry in the workflow history. Each entry is one state transition, is
/// hashed on its own, and contributes to the running root hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub record: HistoryRecord,
    pub hash: String,
}

impl HistoryEntry {
    pub fn describe(&self) -> String {
        format!(
            "#{} {} -> {}: {}",
            self.sequence,
            self.from,
            self.to,
            self.record.describe()
        )
    }

    fn digest(&self) -> String {
        hash_json(&json!({
            "sequence": self.sequence,
            "timestamp_ms": self.timestamp_ms,
            "from": self.from,
            "to": self.to,
            "record": self.record,
        }))
    }
}

/// Append-only, content-addressed log of every transition of one task.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        from: WorkflowState,
        to: WorkflowState,
        record: HistoryRecord,
    ) -> &HistoryEntry {
        let mut entry = HistoryEntry {
            sequence: self.entries.len() as u64,
            timestamp_ms: current_timestamp_ms(),
            from,
            to,
            record,
            hash: String::new(),
        };
        entry.hash = entry.digest();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn root_hash(&self) -> Option<String> {
        compute_root_hash(&self.entries)
    }

    pub fn compute_root_snapshot(entries: &[HistoryEntry]) -> Option<String> {
        compute_root_hash(entries)
    }

    /// Checks that every entry still matches its own hash and that the
    /// sequence numbers are contiguous.
    pub fn verify(entries: &[HistoryEntry]) -> bool {
        entries
            .iter()
            .enumerate()
            .all(|(idx, entry)| entry.sequence == idx as u64 && entry.hash == entry.digest())
    }

    /// The most recent `max_entries` entries rendered as model context.
    pub fn context_window(&self, max_entries: usize) -> Vec<ContextTurn> {
        let start = self.entries.len().saturating_sub(max_entries);
        self.entries[start..]
            .iter()
            .map(|entry| entry.record.to_turn())
            .collect()
    }

    pub fn tail(&self, count: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    pub fn execution_results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.entries.iter().filter_map(|entry| match &entry.record {
            HistoryRecord::ActionExecuted { result, .. } => Some(result),
            _ => None,
        })
    }
}

fn compute_root_hash(entries: &[HistoryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut digest = Sha256::new();
    digest.update(b"agent-history-v1");
    for entry in entries {
        digest.update(entry.hash.as_bytes());
    }
    Some(hex::encode(digest.finalize()))
}

fn hash_json(value: &serde_json::Value) -> String {
    let mut sha = Sha256::new();
    let serialized =
        serde_json::to_vec(value).expect("history entry serialization should never fail");
    sha.update(serialized);
    hex::encode(sha.finalize())
}
