use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Skipped => "skipped",
        }
    }

    /// Done and skipped steps are settled history and never change again.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }

    fn marker(&self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[>]",
            Self::Done => "[x]",
            Self::Skipped => "[-]",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub status: StepStatus,
}

impl PlanStep {
    pub fn pending(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan step {index} does not exist")]
    UnknownStep { index: usize },
    #[error("plan step {index} is already {status}")]
    AlreadySettled { index: usize, status: StepStatus },
    #[error("plan step {active} is already in progress")]
    StepActive { active: usize },
}

/// Ordered list of sub-goals for a task.
///
/// Settled steps always form a prefix of the list: steps are worked in
/// order, and re-planning only touches the open tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = descriptions
            .into_iter()
            .map(Into::into)
            .filter(|description: &String| !description.trim().is_empty())
            .map(PlanStep::pending)
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&PlanStep> {
        self.steps.get(index)
    }

    /// Index of the step currently being worked, or the next pending one.
    pub fn current_index(&self) -> Option<usize> {
        self.active_index().or_else(|| {
            self.steps
                .iter()
                .position(|step| step.status == StepStatus::Pending)
        })
    }

    pub fn active_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.status == StepStatus::InProgress)
    }

    /// Number of steps that still need work, including the active one.
    pub fn pending_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| !step.status.is_settled())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn start(&mut self, index: usize) -> Result<(), PlanError> {
        if let Some(active) = self.active_index() {
            if active == index {
                return Ok(());
            }
            return Err(PlanError::StepActive { active });
        }
        self.open_step_mut(index)?.status = StepStatus::InProgress;
        Ok(())
    }

    pub fn mark_done(&mut self, index: usize) -> Result<(), PlanError> {
        self.open_step_mut(index)?.status = StepStatus::Done;
        Ok(())
    }

    pub fn mark_skipped(&mut self, index: usize) -> Result<(), PlanError> {
        self.open_step_mut(index)?.status = StepStatus::Skipped;
        Ok(())
    }

    /// Puts an in-progress step back to pending so it can be re-planned.
    pub fn release(&mut self, index: usize) -> Result<(), PlanError> {
        self.open_step_mut(index)?.status = StepStatus::Pending;
        Ok(())
    }

    /// Replaces every pending step with `descriptions`, keeping done and
    /// skipped steps (and an in-progress one, if any) exactly where they are.
    pub fn replace_pending<I, S>(&mut self, descriptions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.retain(|step| step.status != StepStatus::Pending);
        self.steps
            .extend(Plan::from_descriptions(descriptions).steps);
    }

    /// Descriptions of the steps that still need work.
    pub fn open_descriptions(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| !step.status.is_settled())
            .map(|step| step.description.clone())
            .collect()
    }

    /// Numbered checklist used in prompts and terminal output.
    pub fn render(&self) -> String {
        if self.steps.is_empty() {
            return "(no steps)".to_string();
        }
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                format!("{} {}. {}", step.status.marker(), idx + 1, step.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn open_step_mut(&mut self, index: usize) -> Result<&mut PlanStep, PlanError> {
        let step = self
            .steps
            .get_mut(index)
            .ok_or(PlanError::UnknownStep { index })?;
        if step.status.is_settled() {
            return Err(PlanError::AlreadySettled {
                index,
                status: step.status,
            });
        }
        Ok(step)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(plan: &Plan) -> Vec<StepStatus> {
        plan.steps().iter().map(|step| step.status).collect()
    }

    #[test]
    fn drops_blank_descriptions() {
        let plan = Plan::from_descriptions(["open site", "  ", "read title"]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.current_index(), Some(0));
    }

    #[test]
    fn only_one_step_in_progress() {
        let mut plan = Plan::from_descriptions(["a", "b"]);
        plan.start(0).unwrap();
        assert_eq!(plan.start(1), Err(PlanError::StepActive { active: 0 }));
        assert!(plan.start(0).is_ok());
        plan.mark_done(0).unwrap();
        plan.start(1).unwrap();
        assert_eq!(
            statuses(&plan),
            vec![StepStatus::Done, StepStatus::InProgress]
        );
    }

    #[test]
    fn settled_steps_cannot_change() {
        let mut plan = Plan::from_descriptions(["a"]);
        plan.mark_skipped(0).unwrap();
        assert!(matches!(
            plan.mark_done(0),
            Err(PlanError::AlreadySettled { index: 0, .. })
        ));
        assert!(plan.is_complete());
    }

    #[test]
    fn replanning_keeps_settled_prefix() {
        let mut plan = Plan::from_descriptions(["search", "open result", "fill form", "submit"]);
        plan.mark_done(0).unwrap();
        plan.mark_skipped(1).unwrap();
        plan.start(2).unwrap();
        plan.release(2).unwrap();

        plan.replace_pending(["open contact page", "send message"]);

        let descriptions: Vec<_> = plan
            .steps()
            .iter()
            .map(|step| step.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec!["search", "open result", "open contact page", "send message"]
        );
        assert_eq!(
            statuses(&plan),
            vec![
                StepStatus::Done,
                StepStatus::Skipped,
                StepStatus::Pending,
                StepStatus::Pending
            ]
        );
        assert_eq!(plan.current_index(), Some(2));
        assert_eq!(plan.pending_count(), 2);
    }

    #[test]
    fn renders_checklist() {
        let mut plan = Plan::from_descriptions(["open example.com", "read the title"]);
        plan.mark_done(0).unwrap();
        assert_eq!(
            plan.render(),
            "[x] 1. open example.com\n[ ] 2. read the title"
        );
    }
}
