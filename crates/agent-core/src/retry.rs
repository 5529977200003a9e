use std::time::Duration;

use ai_agent::{FailureKind, ModelError, ToolExecutionError};

use crate::config::RetryConfig;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`. `retry` is 1 for the first retry.
    Retry { retry: u32, delay: Duration },
    /// Stop retrying. `escalated` is set when a transient failure hit the
    /// ceiling and is now treated as permanent.
    GiveUp { escalated: bool },
}

/// Bounded exponential backoff shared by tool invocations and transient
/// model errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap: cap.max(base),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let multiplier = 2u64
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let total_ms = base_ms.saturating_mul(multiplier);
        Duration::from_millis(total_ms).min(self.cap)
    }

    fn decide_kind(&self, kind: FailureKind, retries_so_far: u32) -> RetryDecision {
        match kind {
            FailureKind::Permanent => RetryDecision::GiveUp { escalated: false },
            FailureKind::Transient if retries_so_far < self.max_retries => {
                let retry = retries_so_far + 1;
                RetryDecision::Retry {
                    retry,
                    delay: self.delay(retry),
                }
            }
            FailureKind::Transient => RetryDecision::GiveUp { escalated: true },
        }
    }

    pub fn decide(&self, error: &ToolExecutionError, retries_so_far: u32) -> RetryDecision {
        self.decide_kind(error.kind(), retries_so_far)
    }

    /// Rate limits and timeouts retry like transient tool failures. Other
    /// model errors are handled by the caller.
    pub fn decide_model(&self, error: &ModelError, retries_so_far: u32) -> RetryDecision {
        let kind = if error.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        self.decide_kind(kind, retries_so_far)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }
}
