use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::history::HistoryEntry;
use crate::task::TaskId;

/// Receives every history entry as it is appended. Implementations persist
/// the audit trail; a failing sink is logged and never stops the run.
pub trait HistorySink: Send + Sync {
    fn append(&self, task_id: &TaskId, entry: &HistoryEntry) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl HistorySink for NullSink {
    fn append(&self, _task_id: &TaskId, _entry: &HistoryEntry) -> Result<()> {
        Ok(())
    }
}

/// Keeps entries in memory, mostly useful for front ends and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(TaskId, HistoryEntry)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(TaskId, HistoryEntry)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl HistorySink for MemorySink {
    fn append(&self, task_id: &TaskId, entry: &HistoryEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory sink poisoned"))?
            .push((task_id.clone(), entry.clone()));
        Ok(())
    }
}
