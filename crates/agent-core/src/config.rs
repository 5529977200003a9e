use std::collections::BTreeMap;
use std::time::Duration;

use ai_agent::DangerCategory;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("backoff cap ({cap_ms}ms) is below the backoff base ({base_ms}ms)")]
    BackoffCap { base_ms: u64, cap_ms: u64 },
    #[error("confirmation cannot be waived for {0} tools")]
    WaivedConfirmation(DangerCategory),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt of one action.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub timeout_secs: u64,
    /// Overrides per danger category. Missing categories fall back to
    /// "confirm anything dangerous".
    pub require: BTreeMap<DangerCategory, bool>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            require: BTreeMap::new(),
        }
    }
}

impl ConfirmationConfig {
    pub fn requires_confirmation(&self, danger: DangerCategory) -> bool {
        danger.is_dangerous() || self.require.get(&danger).copied().unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Wall-clock budget for a whole task.
    pub task_secs: u64,
    /// Upper bound on a single model call.
    pub model_call_secs: u64,
    pub max_actions_per_step: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            task_secs: 600,
            model_call_secs: 60,
            max_actions_per_step: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplanConfig {
    /// Consecutive failed cycles (permanent failure or refusal followed by
    /// reflection) tolerated before the task fails.
    pub max_unviable: u32,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self { max_unviable: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRetryConfig {
    /// Re-requests with a corrective note after a malformed reply.
    pub max_malformed_retries: u32,
}

impl Default for ModelRetryConfig {
    fn default() -> Self {
        Self {
            max_malformed_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// History entries replayed to the model on every call.
    pub history_entries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_entries: 40,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub confirmation: ConfirmationConfig,
    pub budget: BudgetConfig,
    pub replan: ReplanConfig,
    pub model: ModelRetryConfig,
    pub context: ContextConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.backoff_cap_ms < self.retry.backoff_base_ms {
            return Err(ConfigError::BackoffCap {
                base_ms: self.retry.backoff_base_ms,
                cap_ms: self.retry.backoff_cap_ms,
            });
        }
        let positive = [
            ("confirmation.timeout_secs", self.confirmation.timeout_secs),
            ("budget.task_secs", self.budget.task_secs),
            ("budget.model_call_secs", self.budget.model_call_secs),
            (
                "budget.max_actions_per_step",
                u64::from(self.budget.max_actions_per_step),
            ),
            ("replan.max_unviable", u64::from(self.replan.max_unviable)),
            ("context.history_entries", self.context.history_entries as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        for (danger, required) in &self.confirmation.require {
            if danger.is_dangerous() && !required {
                return Err(ConfigError::WaivedConfirmation(*danger));
            }
        }
        Ok(())
    }

    pub fn task_budget(&self) -> Duration {
        Duration::from_secs(self.budget.task_secs)
    }

    pub fn model_call_timeout(&self) -> Duration {
        Duration::from_secs(self.budget.model_call_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.replan.max_unviable, 2);
        assert!(!config.confirmation.requires_confirmation(DangerCategory::None));
        assert!(config
            .confirmation
            .requires_confirmation(DangerCategory::Destructive));
    }

    #[test]
    fn mapping_may_extend_but_not_waive() {
        let mut config = EngineConfig::default();
        config
            .confirmation
            .require
            .insert(DangerCategory::None, true);
        assert!(config.validate().is_ok());
        assert!(config.confirmation.requires_confirmation(DangerCategory::None));

        config
            .confirmation
            .require
            .insert(DangerCategory::Financial, false);
        assert_eq!(
            config.validate(),
            Err(ConfigError::WaivedConfirmation(DangerCategory::Financial))
        );
    }

    #[test]
    fn rejects_zero_budget_and_inverted_backoff() {
        let mut config = EngineConfig::default();
        config.budget.task_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "budget.task_secs"
            })
        );

        let mut config = EngineConfig::default();
        config.retry.backoff_cap_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackoffCap { .. })
        ));
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "retry": { "max_retries": 5 },
            "confirmation": { "require": { "none": true } }
        }))
        .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base_ms, 500);
        assert_eq!(config.confirmation.timeout_secs, 30);
        assert!(config.confirmation.requires_confirmation(DangerCategory::None));
    }
}
