//! Consolidated retry policy plus the logging context the executor uses to keep
//! retry instrumentation consistent across single and batched calls.

use anyhow::{bail, Result};
use rand::Rng;
use std::fmt;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: usize = 6;
const DEFAULT_EXPONENTIAL_BASE_MS: u64 = 500;
const DEFAULT_EXPONENTIAL_CAP_SECS: u64 = 30;
const DEFAULT_LINEAR_STEP_MS: u64 = 400;
const DEFAULT_LINEAR_CAP_SECS: u64 = 8;
const DEFAULT_JITTER_MS: u64 = 1_000;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(batch_len) = $ctx.batch_len {
            tracing::$level!(
                method = $ctx.method,
                batch_len,
                $($rest)*
            );
        } else {
            tracing::$level!(method = $ctx.method, $($rest)*);
        }
    }};
}

/// How the delay before the next attempt grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Rate limits and server failures: `base * 2^attempt`, capped, full jitter.
    Exponential,
    /// Unexpected statuses and transport failures: `step * attempt`, capped, half jitter.
    Linear,
    /// RPC error objects: linear growth without jitter.
    LinearFlat,
}

/// Single retry policy applied uniformly by the executor and reused by the
/// harvester for its outer re-issue loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub exponential_base: Duration,
    pub exponential_cap: Duration,
    pub linear_step: Duration,
    pub linear_cap: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            exponential_base: Duration::from_millis(DEFAULT_EXPONENTIAL_BASE_MS),
            exponential_cap: Duration::from_secs(DEFAULT_EXPONENTIAL_CAP_SECS),
            linear_step: Duration::from_millis(DEFAULT_LINEAR_STEP_MS),
            linear_cap: Duration::from_secs(DEFAULT_LINEAR_CAP_SECS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy with linear growth only and no jitter.
    pub fn linear(max_attempts: usize, step: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            exponential_base: step,
            exponential_cap: cap,
            linear_step: step,
            linear_cap: cap,
            jitter: Duration::ZERO,
        }
    }

    /// Policy that never sleeps between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::linear(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.exponential_cap < self.exponential_base {
            bail!("exponential_cap must not be smaller than exponential_base");
        }
        if self.linear_cap < self.linear_step {
            bail!("linear_cap must not be smaller than linear_step");
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Deterministic part of the delay after the given 1-based attempt.
    pub fn base_delay(&self, kind: BackoffKind, attempt: usize) -> Duration {
        match kind {
            BackoffKind::Exponential => {
                let exponent = attempt.min(31) as u32;
                let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                self.exponential_base
                    .saturating_mul(multiplier)
                    .min(self.exponential_cap)
            }
            BackoffKind::Linear | BackoffKind::LinearFlat => {
                let multiplier = u32::try_from(attempt).unwrap_or(u32::MAX);
                self.linear_step
                    .saturating_mul(multiplier)
                    .min(self.linear_cap)
            }
        }
    }

    /// Full delay including random jitter.
    pub fn delay(&self, kind: BackoffKind, attempt: usize) -> Duration {
        let base = self.base_delay(kind, attempt);
        let spread = match kind {
            BackoffKind::Exponential => self.jitter,
            BackoffKind::Linear => self.jitter / 2,
            BackoffKind::LinearFlat => Duration::ZERO,
        };
        base.saturating_add(random_jitter(spread))
    }
}

fn random_jitter(spread: Duration) -> Duration {
    let nanos = spread.as_nanos().min(u128::from(u64::MAX)) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
}

/// Context passed through the executor's retry loop so every log line carries
/// the method label and, for batches, the batch length.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    method: &'a str,
    batch_len: Option<usize>,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(method: &'a str, batch_len: Option<usize>) -> Self {
        Self { method, batch_len }
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, failure: &dyn fmt::Display) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %failure,
            "rpc request failed; retrying"
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, failure: &dyn fmt::Display) {
        log_with_retry_ctx!(error, self, attempt, error = %failure, "rpc request exhausted retries");
    }

    pub(crate) fn log_terminal(&self, attempt: usize, failure: &dyn fmt::Display) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            error = %failure,
            "rpc request failed with a non-retryable response"
        );
    }

    pub(crate) fn log_success(&self, attempt: usize, endpoint: &str) {
        log_with_retry_ctx!(debug, self, attempt, endpoint, "rpc request completed");
    }
}

pub(crate) fn duration_to_millis(value: Duration) -> u64 {
    value.as_millis().min(u128::from(u64::MAX)) as u64
}
