//! Retry policy — exponential backoff with a hard cap, no jitter.
//!
//! The engine's retry policy intentionally omits jitter: node retries are
//! driven by an explicit caller-supplied retry action (re-running one
//! element), not a fleet of independent clients hammering a shared service,
//! so the thundering-herd concern that jitter addresses doesn't apply here.
//!
//! # Delay law
//!
//! For attempt number `k >= 1`:
//!
//! ```text
//! delay(k) = min(initial_delay_ms * multiplier^(k - 1), max_delay_ms)
//! delay(0) = 0
//! ```
//!
//! # Presets
//!
//! - [`RetryPolicy::default_action`] — 3 retries, 1s initial, 30s cap, 2x backoff.
//! - [`RetryPolicy::strict`] — more retries, network-only errors.
//! - [`RetryPolicy::no_retry`] — zero retries.

use crate::error::ErrorCategory;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_on_any: bool,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_action()
    }
}

impl RetryPolicy {
    pub fn default_action() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_on_any: true,
            retryable_categories: Vec::new(),
        }
    }

    /// More retries, restricted to network-classified errors.
    pub fn strict() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            retry_on_any: false,
            retryable_categories: vec!["Network".to_string()],
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            retry_on_any: false,
            retryable_categories: Vec::new(),
        }
    }

    /// `min(initial * multiplier^(attempt - 1), max)` for `attempt >= 1`, else 0.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        scaled.min(self.max_delay_ms as f64).round() as u64
    }

    pub fn is_retryable(&self, category: &str) -> bool {
        if self.retry_on_any {
            return true;
        }
        self.retryable_categories.iter().any(|c| c == category)
    }
}
