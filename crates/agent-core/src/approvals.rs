use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ai_agent::DangerCategory;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::action::{ActionId, ActionProposal};

/// What the human is shown before a gated action runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub action_id: ActionId,
    pub tool_name: String,
    pub arguments: Value,
    pub danger: DangerCategory,
    pub rationale: String,
}

impl From<&ActionProposal> for ConfirmationRequest {
    fn from(proposal: &ActionProposal) -> Self {
        Self {
            action_id: proposal.action_id.clone(),
            tool_name: proposal.tool_name.clone(),
            arguments: proposal.arguments.clone(),
            danger: proposal.danger,
            rationale: proposal.rationale.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationReply {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ConfirmationReply {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Trait implemented by host applications to ask a human before a gated
/// action executes. Timeouts are applied by the caller.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_confirmation(
        &self,
        request: &ConfirmationRequest,
    ) -> Result<ConfirmationReply>;
}

/// Handler that rejects everything. Used when no human is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

#[async_trait]
impl ApprovalHandler for RejectAll {
    async fn request_confirmation(
        &self,
        _request: &ConfirmationRequest,
    ) -> Result<ConfirmationReply> {
        Ok(ConfirmationReply::reject("no confirmation channel available"))
    }
}

/// Routes confirmation requests to a front end over a channel and waits for
/// the front end to resolve them by action id.
#[derive(Debug)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<ActionId, oneshot::Sender<ConfirmationReply>>>,
    requests: mpsc::UnboundedSender<ConfirmationRequest>,
}

impl ApprovalBroker {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConfirmationRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            requests,
        });
        (broker, receiver)
    }

    fn register(&self, request: &ConfirmationRequest) -> Result<oneshot::Receiver<ConfirmationReply>> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending()?.insert(request.action_id.clone(), tx);
        if self.requests.send(request.clone()).is_err() {
            self.forget(&request.action_id);
            return Err(anyhow!("confirmation front end is gone"));
        }
        Ok(rx)
    }

    pub fn resolve(&self, action_id: &ActionId, reply: ConfirmationReply) -> Result<()> {
        let sender = self
            .lock_pending()?
            .remove(action_id)
            .ok_or_else(|| anyhow!("unknown confirmation request: {}", action_id))?;
        let _ = sender.send(reply);
        Ok(())
    }

    pub fn pending_ids(&self) -> Vec<ActionId> {
        match self.pending.lock() {
            Ok(pending) => pending.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn forget(&self, action_id: &ActionId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(action_id);
        }
    }

    fn lock_pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ActionId, oneshot::Sender<ConfirmationReply>>>>
    {
        self.pending
            .lock()
            .map_err(|_| anyhow!("confirmation registry poisoned"))
    }
}

/// Drops the pending entry if the waiting future is cancelled, e.g. by the
/// gate's timeout.
struct PendingGuard<'a> {
    broker: &'a ApprovalBroker,
    action_id: &'a ActionId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.forget(self.action_id);
    }
}

pub struct BrokeredApprovalHandler {
    broker: Arc<ApprovalBroker>,
}

impl BrokeredApprovalHandler {
    pub fn new(broker: Arc<ApprovalBroker>) -> Arc<Self> {
        Arc::new(Self { broker })
    }
}

#[async_trait]
impl ApprovalHandler for BrokeredApprovalHandler {
    async fn request_confirmation(
        &self,
        request: &ConfirmationRequest,
    ) -> Result<ConfirmationReply> {
        let receiver = self.broker.register(request)?;
        let _guard = PendingGuard {
            broker: &self.broker,
            action_id: &request.action_id,
        };
        receiver
            .await
            .map_err(|_| anyhow!("confirmation request {} was dropped", request.action_id))
    }
}
