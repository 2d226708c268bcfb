//! Lightweight counters tracking executor attempts, outcome classes, and
//! latency so callers can read aggregated snapshots.

use crate::rpc::response::RpcFailure;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    total_attempts: AtomicU64,
    total_successes: AtomicU64,
    total_latency_ns: AtomicU64,
    rate_limited: AtomicU64,
    server_errors: AtomicU64,
    http_errors: AtomicU64,
    rpc_errors: AtomicU64,
    transport_errors: AtomicU64,
    timeouts: AtomicU64,
    malformed: AtomicU64,
    exhausted: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.record_attempt(latency);
        self.total_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, latency: Duration, failure: &RpcFailure) {
        self.record_attempt(latency);
        let counter = match failure {
            RpcFailure::RateLimited { .. } => &self.rate_limited,
            RpcFailure::Server { .. } => &self.server_errors,
            RpcFailure::Http { .. } => &self.http_errors,
            RpcFailure::Rpc { .. } => &self.rpc_errors,
            RpcFailure::Transport { .. } => &self.transport_errors,
            RpcFailure::Timeout { .. } => &self.timeouts,
            RpcFailure::Malformed { .. } | RpcFailure::ShapeMismatch { .. } => &self.malformed,
            RpcFailure::InvalidRequest { .. } | RpcFailure::Closed => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempt(&self, latency: Duration) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RpcMetricsSnapshot {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let total_successes = self.total_successes.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let average_latency_ms = if total_attempts == 0 {
            0.0
        } else {
            (total_latency_ns as f64 / total_attempts as f64) / 1_000_000.0
        };

        let total_failures = total_attempts.saturating_sub(total_successes);
        let error_rate = if total_attempts == 0 {
            0.0
        } else {
            total_failures as f64 / total_attempts as f64
        };

        RpcMetricsSnapshot {
            total_attempts,
            total_successes,
            total_failures,
            average_latency_ms,
            error_rate,
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct RpcMetricsSnapshot {
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub rate_limited: u64,
    pub server_errors: u64,
    pub http_errors: u64,
    pub rpc_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    pub malformed: u64,
    /// Logical requests that ran out of attempts.
    pub exhausted: u64,
}
