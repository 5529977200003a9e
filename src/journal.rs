use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use agent_core::{HistoryEntry, HistorySink, TaskId};
use anyhow::{anyhow, Context, Result};

/// Appends each task's history to `<dir>/<task id>.jsonl`, one entry per line.
pub struct JsonlHistorySink {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{task_id}.jsonl"))
    }
}

impl HistorySink for JsonlHistorySink {
    fn append(&self, task_id: &TaskId, entry: &HistoryEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("failed to encode history entry")?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("history journal lock poisoned"))?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create history directory {}", self.dir.display()))?;
        let path = self.path_for(task_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open history file {}", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{History, HistoryRecord, Task, WorkflowState};
    use ai_agent::Plan;

    #[test]
    fn replayed_journal_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlHistorySink::new(dir.path().join("history"));
        let task_id = TaskId::generate();

        let mut history = History::new();
        history.append(
            WorkflowState::Init,
            WorkflowState::Planning,
            HistoryRecord::TaskStarted {
                task: Task::new("open example.com"),
            },
        );
        history.append(
            WorkflowState::Planning,
            WorkflowState::ChoosingAction,
            HistoryRecord::PlanProduced {
                plan: Plan::from_descriptions(["Open example.com"]),
            },
        );
        for entry in history.entries() {
            sink.append(&task_id, entry).unwrap();
        }

        let contents = fs::read_to_string(sink.path_for(&task_id)).unwrap();
        let replayed: Vec<HistoryEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replayed, history.entries());
        assert!(History::verify(&replayed));
        assert_eq!(History::compute_root_snapshot(&replayed), history.root_hash());
    }
}
