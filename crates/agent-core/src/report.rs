use std::fmt;

use crate::error::AgentError;
use crate::history::History;

/// Entries quoted in a failure explanation.
pub const REPORT_TAIL: usize = 5;

/// Human-readable account of why a run ended in FAILED.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub error: AgentError,
    pub recent: Vec<String>,
}

impl FailureReport {
    pub fn from_history(error: AgentError, history: &History) -> Self {
        let recent = history
            .tail(REPORT_TAIL)
            .iter()
            .map(|entry| entry.describe())
            .collect();
        Self { error, recent }
    }

    pub fn explanation(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The task could not be completed: {}.", self.error)?;
        if !self.recent.is_empty() {
            f.write_str("\nLast steps:")?;
            for line in &self.recent {
                write!(f, "\n  {line}")?;
            }
        }
        Ok(())
    }
}
