//! Tagged workflow states and the pure transition function that drives them.
//!
//! The engine never changes state on its own: it feeds a [`WorkflowEvent`]
//! into [`transition`] and performs the returned [`Effect`]. Keeping the
//! graph here means it can be checked without a model or a browser.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Init,
    Planning,
    ChoosingAction,
    AwaitingConfirmation,
    Executing,
    Reflecting,
    Finalizing,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Planning => "PLANNING",
            Self::ChoosingAction => "CHOOSING_ACTION",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Executing => "EXECUTING",
            Self::Reflecting => "REFLECTING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Phases that wait on the model and may re-request after a bad reply.
    fn consults_model(&self) -> bool {
        matches!(
            self,
            Self::Planning | Self::ChoosingAction | Self::Reflecting | Self::Finalizing
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Start,
    PlanProduced { pending_steps: usize },
    /// The model reply was unusable but may be requested again.
    ModelRetry,
    ActionSelected { requires_confirmation: bool },
    NoPendingSteps,
    ConfirmationApproved,
    /// Rejected by the human, or no answer before the timeout.
    ConfirmationDenied,
    ExecutionRetrying,
    /// Success, permanent failure, or retries exhausted.
    ExecutionSettled,
    StepReviewed { pending_steps: usize },
    Unrecoverable,
    SummaryProduced,
    /// Unhandled model error or exhausted wall-clock budget.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    RequestPlan,
    ChooseAction,
    RequestConfirmation,
    InvokeTool,
    Reflect,
    Finalize,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no transition from {state} on {event:?}")]
pub struct TransitionError {
    pub state: WorkflowState,
    pub event: WorkflowEvent,
}

pub fn transition(
    state: WorkflowState,
    event: &WorkflowEvent,
) -> Result<Transition, TransitionError> {
    use WorkflowEvent as E;
    use WorkflowState as S;

    let (to, effect) = match (state, event) {
        (S::Init, E::Start) => (S::Planning, Effect::RequestPlan),

        (S::Planning, E::PlanProduced { pending_steps }) if *pending_steps > 0 => {
            (S::ChoosingAction, Effect::ChooseAction)
        }
        (S::Planning, E::PlanProduced { .. }) => (S::Failed, Effect::Halt),

        (phase, E::ModelRetry) if phase.consults_model() => (phase, effect_for(phase)),

        (S::ChoosingAction, E::ActionSelected {
            requires_confirmation: true,
        }) => (S::AwaitingConfirmation, Effect::RequestConfirmation),
        (S::ChoosingAction, E::ActionSelected {
            requires_confirmation: false,
        }) => (S::Executing, Effect::InvokeTool),
        (S::ChoosingAction, E::NoPendingSteps) => (S::Finalizing, Effect::Finalize),

        (S::AwaitingConfirmation, E::ConfirmationApproved) => (S::Executing, Effect::InvokeTool),
        (S::AwaitingConfirmation, E::ConfirmationDenied) => (S::Reflecting, Effect::Reflect),

        (S::Executing, E::ExecutionRetrying) => (S::Executing, Effect::InvokeTool),
        (S::Executing, E::ExecutionSettled) => (S::Reflecting, Effect::Reflect),

        (S::Reflecting, E::StepReviewed { pending_steps }) if *pending_steps > 0 => {
            (S::ChoosingAction, Effect::ChooseAction)
        }
        (S::Reflecting, E::StepReviewed { .. }) => (S::Finalizing, Effect::Finalize),
        (S::Reflecting, E::Unrecoverable) => (S::Failed, Effect::Halt),

        (S::Finalizing, E::SummaryProduced) => (S::Done, Effect::Halt),

        (phase, E::Abort) if !phase.is_terminal() => (S::Failed, Effect::Halt),

        _ => {
            return Err(TransitionError {
                state,
                event: event.clone(),
            })
        }
    };

    Ok(Transition {
        from: state,
        to,
        effect,
    })
}

fn effect_for(state: WorkflowState) -> Effect {
    match state {
        WorkflowState::Planning => Effect::RequestPlan,
        WorkflowState::ChoosingAction => Effect::ChooseAction,
        WorkflowState::AwaitingConfirmation => Effect::RequestConfirmation,
        WorkflowState::Executing => Effect::InvokeTool,
        WorkflowState::Reflecting => Effect::Reflect,
        WorkflowState::Finalizing => Effect::Finalize,
        WorkflowState::Init | WorkflowState::Done | WorkflowState::Failed => Effect::Halt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowEvent as E;
    use WorkflowState as S;

    fn step(state: S, event: E) -> (S, Effect) {
        let t = transition(state, &event).unwrap();
        (t.to, t.effect)
    }

    #[test]
    fn happy_path_reaches_done() {
        let mut state = S::Init;
        let events = [
            E::Start,
            E::PlanProduced { pending_steps: 1 },
            E::ActionSelected {
                requires_confirmation: false,
            },
            E::ExecutionSettled,
            E::StepReviewed { pending_steps: 0 },
            E::SummaryProduced,
        ];
        let mut visited = vec![state];
        for event in events {
            state = step(state, event).0;
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                S::Init,
                S::Planning,
                S::ChoosingAction,
                S::Executing,
                S::Reflecting,
                S::Finalizing,
                S::Done
            ]
        );
    }

    #[test]
    fn dangerous_actions_wait_for_confirmation() {
        assert_eq!(
            step(
                S::ChoosingAction,
                E::ActionSelected {
                    requires_confirmation: true
                }
            ),
            (S::AwaitingConfirmation, Effect::RequestConfirmation)
        );
        assert_eq!(
            step(S::AwaitingConfirmation, E::ConfirmationApproved),
            (S::Executing, Effect::InvokeTool)
        );
        assert_eq!(
            step(S::AwaitingConfirmation, E::ConfirmationDenied),
            (S::Reflecting, Effect::Reflect)
        );
    }

    #[test]
    fn confirmation_cannot_be_skipped() {
        assert!(transition(S::AwaitingConfirmation, &E::ExecutionSettled).is_err());
        assert!(transition(S::AwaitingConfirmation, &E::ExecutionRetrying).is_err());
        assert!(transition(S::AwaitingConfirmation, &E::ModelRetry).is_err());
    }

    #[test]
    fn empty_plan_fails() {
        assert_eq!(
            step(S::Planning, E::PlanProduced { pending_steps: 0 }),
            (S::Failed, Effect::Halt)
        );
    }

    #[test]
    fn retries_stay_in_phase() {
        assert_eq!(
            step(S::Executing, E::ExecutionRetrying),
            (S::Executing, Effect::InvokeTool)
        );
        for phase in [S::Planning, S::ChoosingAction, S::Reflecting, S::Finalizing] {
            assert_eq!(step(phase, E::ModelRetry).0, phase);
        }
        assert!(transition(S::Executing, &E::ModelRetry).is_err());
    }

    #[test]
    fn reflection_routes_by_remaining_steps() {
        assert_eq!(
            step(S::Reflecting, E::StepReviewed { pending_steps: 2 }),
            (S::ChoosingAction, Effect::ChooseAction)
        );
        assert_eq!(
            step(S::Reflecting, E::StepReviewed { pending_steps: 0 }),
            (S::Finalizing, Effect::Finalize)
        );
        assert_eq!(
            step(S::Reflecting, E::Unrecoverable),
            (S::Failed, Effect::Halt)
        );
    }

    #[test]
    fn abort_is_allowed_from_every_live_state() {
        for state in [
            S::Init,
            S::Planning,
            S::ChoosingAction,
            S::AwaitingConfirmation,
            S::Executing,
            S::Reflecting,
            S::Finalizing,
        ] {
            assert_eq!(step(state, E::Abort), (S::Failed, Effect::Halt));
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [S::Done, S::Failed] {
            for event in [E::Start, E::Abort, E::ModelRetry, E::SummaryProduced] {
                assert!(transition(state, &event).is_err());
            }
        }
    }
}
