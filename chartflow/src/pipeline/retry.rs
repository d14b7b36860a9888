//! Retry delays with configurable backoff and jitter.
//!
//! The same policy type drives two loops: scheduler-level retries of failed
//! stages (constant spacing) and upload retries (doubling delay).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new().with_max_attempts(1).with_base_delay_ms(0)
    }

    /// Scheduler policy: `retries` re-runs spaced `delay` apart.
    #[must_use]
    pub fn scheduler(retries: usize, delay: Duration) -> Self {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_strategy: BackoffStrategy::Constant,
            jitter_strategy: JitterStrategy::None,
        }
    }

    /// Doubling policy starting at `initial_delay`, uncapped.
    #[must_use]
    pub fn doubling(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: u64::try_from(initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::MAX,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Number of re-attempts after the first one.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1)
    }
}

/// Per-operation retry bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    /// Retries already scheduled.
    pub retries: usize,
    /// Delays handed out so far.
    pub delays: Vec<Duration>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the delay before the next retry.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = u32::try_from(self.retries).unwrap_or(u32::MAX);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Total attempts made so far, assuming the current one has failed.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.retries + 1
    }

    /// Returns true if another attempt would exceed the budget.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts() >= config.max_attempts
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No attempts left.
    GiveUp,
}

/// Decides what to do after a failed attempt and records the decision.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig) -> RetryDecision {
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }

    let delay = state.calculate_delay(config);
    state.retries += 1;
    state.delays.push(delay);
    RetryDecision::Retry(delay)
}
