//! Retry policy with exponential backoff and jitter.
//!
//! Transient provider failures (rate limits, network resets, timeouts) are
//! retried per node policy. Backoff doubles each attempt, is capped at
//! `max_delay`, and is jittered to avoid thundering-herd retries across
//! parallel branches.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, RetrySpec};

/// Default number of retries when a node carries no policy.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default cap on backoff growth.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// A resolved retry policy for one node execution.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// When set, only these codes are retried.
    pub retry_on: Option<Vec<ErrorCode>>,
    /// Codes that are never retried even if otherwise eligible.
    pub skip_on: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_on: None,
            skip_on: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Merge a wire-level [`RetrySpec`] over engine defaults.
    #[must_use]
    pub fn from_spec(spec: &RetrySpec, default_retries: u32, default_base: Duration) -> Self {
        Self {
            max_retries: spec.max_retries.unwrap_or(default_retries),
            base_delay: spec
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default_base),
            max_delay: spec
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_DELAY),
            retry_on: spec.retry_on.clone(),
            skip_on: spec.skip_on.clone().unwrap_or_default(),
        }
    }

    /// Whether a failure with `code` on zero-based `attempt` should be retried.
    ///
    /// `AUTH` and `VALIDATION` failures are never retried regardless of the
    /// configured filters.
    #[must_use]
    pub fn should_retry(&self, code: ErrorCode, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        if !code.is_retryable() {
            return false;
        }
        if self.skip_on.contains(&code) {
            return false;
        }
        match &self.retry_on {
            Some(allowed) => allowed.contains(&code),
            None => true,
        }
    }

    /// Backoff for the given zero-based attempt: `base * 2^attempt`, jittered
    /// by a 0.5–1.5 factor and capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter: f64 = rand::rng().random_range(0.5..1.5);
        let jittered = exp.mul_f64(jitter);
        jittered.min(self.max_delay)
    }
}

/// One recorded failure inside a retry loop, attached to the final error
/// when all retries are exhausted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    pub attempt: u32,
    pub code: ErrorCode,
    pub message: String,
    pub delay_ms: u64,
}
