use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user's goal for one workflow run. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    goal: String,
    started_at_ms: u64,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            goal: goal.into().trim().to_string(),
            started_at_ms: current_timestamp_ms(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }
}

pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
