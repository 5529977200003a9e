use std::collections::HashMap;
use std::sync::Arc;

use ai_agent::DangerCategory;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::action::{ActionId, ActionProposal, ConfirmationDecision};
use crate::approvals::{ApprovalHandler, ConfirmationRequest};
use crate::config::ConfirmationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub decision: ConfirmationDecision,
    /// The decision was already on record for this action id and the human
    /// was not asked again.
    pub cached: bool,
}

/// Human-in-the-loop checkpoint in front of dangerous tools. Fails closed:
/// a timeout, a broken channel, or a missing handler all count as a
/// rejection.
pub struct ConfirmationGate {
    config: ConfirmationConfig,
    handler: Option<Arc<dyn ApprovalHandler>>,
    decisions: HashMap<ActionId, ConfirmationDecision>,
}

impl ConfirmationGate {
    pub fn new(config: ConfirmationConfig, handler: Option<Arc<dyn ApprovalHandler>>) -> Self {
        Self {
            config,
            handler,
            decisions: HashMap::new(),
        }
    }

    pub fn requires_confirmation(&self, danger: DangerCategory) -> bool {
        self.config.requires_confirmation(danger)
    }

    pub fn decision_for(&self, action_id: &ActionId) -> Option<&ConfirmationDecision> {
        self.decisions.get(action_id)
    }

    /// Asks for a decision on `proposal`, waiting at most the configured
    /// timeout and never past `deadline`.
    pub async fn confirm(&mut self, proposal: &ActionProposal, deadline: Instant) -> GateOutcome {
        if let Some(decision) = self.decisions.get(&proposal.action_id) {
            debug!(action_id = %proposal.action_id, "reusing recorded confirmation decision");
            return GateOutcome {
                decision: decision.clone(),
                cached: true,
            };
        }

        let decision = self.ask(proposal, deadline).await;
        info!(
            action_id = %proposal.action_id,
            tool = %proposal.tool_name,
            approved = decision.approved,
            source = ?decision.source,
            "confirmation decided"
        );
        self.decisions
            .insert(proposal.action_id.clone(), decision.clone());
        GateOutcome {
            decision,
            cached: false,
        }
    }

    async fn ask(&self, proposal: &ActionProposal, deadline: Instant) -> ConfirmationDecision {
        let action_id = proposal.action_id.clone();
        let Some(handler) = &self.handler else {
            warn!(%action_id, "no approval handler configured; rejecting");
            return ConfirmationDecision::unavailable(action_id, "no approval handler configured");
        };

        let wait = self
            .config
            .timeout()
            .min(deadline.saturating_duration_since(Instant::now()));
        let request = ConfirmationRequest::from(proposal);
        match timeout(wait, handler.request_confirmation(&request)).await {
            Ok(Ok(reply)) => ConfirmationDecision::human(action_id, reply.approved, reply.reason),
            Ok(Err(err)) => {
                warn!(%action_id, error = %err, "approval channel failed; rejecting");
                ConfirmationDecision::unavailable(action_id, format!("approval failed: {err}"))
            }
            Err(_) => {
                warn!(%action_id, waited_secs = wait.as_secs(), "confirmation timed out; rejecting");
                ConfirmationDecision::timed_out(action_id, wait)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DecisionSource;
    use crate::approvals::ConfirmationReply;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        calls: AtomicUsize,
        reply: Option<ConfirmationReply>,
    }

    #[async_trait]
    impl ApprovalHandler for CountingHandler {
        async fn request_confirmation(
            &self,
            _request: &ConfirmationRequest,
        ) -> Result<ConfirmationReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => std::future::pending().await,
            }
        }
    }

    fn proposal(id: &str) -> ActionProposal {
        ActionProposal {
            action_id: ActionId::from(id),
            step_index: 0,
            tool_name: "delete_account".into(),
            arguments: json!({}),
            rationale: "the user asked".into(),
            danger: DangerCategory::Destructive,
            requires_confirmation: true,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3_600)
    }

    #[tokio::test]
    async fn same_action_is_only_asked_once() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            reply: Some(ConfirmationReply::approve()),
        });
        let mut gate = ConfirmationGate::new(ConfirmationConfig::default(), Some(handler.clone()));

        let first = gate.confirm(&proposal("a-1"), far_deadline()).await;
        let second = gate.confirm(&proposal("a-1"), far_deadline()).await;
        assert!(first.decision.approved && !first.cached);
        assert!(second.cached);
        assert_eq!(first.decision, second.decision);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        gate.confirm(&proposal("a-2"), far_deadline()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_a_rejection() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            reply: None,
        });
        let mut gate = ConfirmationGate::new(ConfirmationConfig::default(), Some(handler));
        let started = Instant::now();

        let outcome = gate.confirm(&proposal("a-1"), far_deadline()).await;
        assert!(!outcome.decision.approved);
        assert_eq!(outcome.decision.source, DecisionSource::Timeout);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shortens_the_wait() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            reply: None,
        });
        let mut gate = ConfirmationGate::new(ConfirmationConfig::default(), Some(handler));
        let started = Instant::now();

        let outcome = gate
            .confirm(&proposal("a-1"), started + Duration::from_secs(5))
            .await;
        assert!(!outcome.decision.approved);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_handler_fails_closed() {
        let mut gate = ConfirmationGate::new(ConfirmationConfig::default(), None);
        let outcome = gate.confirm(&proposal("a-1"), far_deadline()).await;
        assert!(!outcome.decision.approved);
        assert_eq!(outcome.decision.source, DecisionSource::Unavailable);
    }
}
