use crate::rpc::client::RpcExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling harvest counters.
#[derive(Default, Debug)]
pub struct Telemetry {
    chunks_processed: AtomicU64,
    items_requested: AtomicU64,
    items_missing: AtomicU64,
    batch_failures: AtomicU64,
    fallback_requests: AtomicU64,
    cooldowns: AtomicU64,
}

impl Telemetry {
    pub fn record_chunk(&self, requested: u64, missing: u64) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.items_requested.fetch_add(requested, Ordering::Relaxed);
        self.items_missing.fetch_add(missing, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_requests(&self, count: u64) {
        self.fallback_requests.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cooldown(&self) {
        self.cooldowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            items_requested: self.items_requested.load(Ordering::Relaxed),
            items_missing: self.items_missing.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            fallback_requests: self.fallback_requests.load(Ordering::Relaxed),
            cooldowns: self.cooldowns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub chunks_processed: u64,
    pub items_requested: u64,
    pub items_missing: u64,
    pub batch_failures: u64,
    pub fallback_requests: u64,
    pub cooldowns: u64,
}

/// Spawns a background task that periodically logs harvest throughput and
/// executor outcome counters until `shutdown` fires.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    executor: RpcExecutor,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "harvestproof::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let rpc = executor.metrics();
                    let delta = current
                        .items_requested
                        .saturating_sub(last_snapshot.items_requested);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "harvestproof::metrics",
                        throughput = format!("{throughput:.2}"),
                        chunks = current.chunks_processed,
                        missing = current.items_missing,
                        batch_failures = current.batch_failures,
                        fallback_requests = current.fallback_requests,
                        cooldowns = current.cooldowns,
                        rpc_attempts = rpc.total_attempts,
                        rpc_error_rate = format!("{:.3}", rpc.error_rate),
                        rate_limited = rpc.rate_limited,
                        timeouts = rpc.timeouts,
                        "harvest metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{EndpointPool, HttpTransport, RpcClientOptions};
    use tokio::time::timeout;

    #[test]
    fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_chunk(10, 2);
        telemetry.record_chunk(5, 0);
        telemetry.record_batch_failure();
        telemetry.record_fallback_requests(10);
        telemetry.record_cooldown();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.chunks_processed, 2);
        assert_eq!(snapshot.items_requested, 15);
        assert_eq!(snapshot.items_missing, 2);
        assert_eq!(snapshot.batch_failures, 1);
        assert_eq!(snapshot.fallback_requests, 10);
        assert_eq!(snapshot.cooldowns, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let pool = EndpointPool::new(vec!["http://127.0.0.1:9".into()], 1).unwrap();
        let executor = RpcExecutor::with_transport(
            pool,
            Arc::new(HttpTransport::new().unwrap()),
            RpcClientOptions::default(),
        )
        .unwrap();
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_chunk(4, 1);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(
            telemetry,
            executor,
            shutdown.clone(),
            Duration::from_millis(10),
        );

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
