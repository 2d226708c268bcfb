//! Chunked fetching with per-member fallback. A chunk is first sent as one
//! batched request; when that fails outright the members are requested one by
//! one, and members that still fail are reported missing instead of aborting
//! the chunk.

use crate::harvest::cooldown::BatchCooldown;
use crate::harvest::progress::{ChunkProgress, HarvestObserver, LogObserver};
use crate::rpc::client::RpcExecutor;
use crate::rpc::payload::RpcCall;
use crate::rpc::response::RpcFailure;
use crate::rpc::retry::{BackoffKind, RetryPolicy};
use crate::runtime::config::HarvestConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    pub chunk_size: usize,
    pub batch_timeout: Duration,
    pub single_timeout: Duration,
    pub tip_timeout: Duration,
    pub batch_retry: RetryPolicy,
    pub member_retry: RetryPolicy,
    pub tip_retry: RetryPolicy,
    pub failure_threshold: usize,
    pub cooldown: Duration,
    pub chunk_pause: Duration,
}

impl From<&HarvestConfig> for HarvestOptions {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size(),
            batch_timeout: config.batch_timeout(),
            single_timeout: config.single_timeout(),
            tip_timeout: config.tip_timeout(),
            batch_retry: config.batch_retry().clone(),
            member_retry: config.member_retry().clone(),
            tip_retry: config.tip_retry().clone(),
            failure_threshold: config.failure_threshold(),
            cooldown: config.cooldown(),
            chunk_pause: config.chunk_pause(),
        }
    }
}

impl HarvestOptions {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }
        self.batch_retry.validate()?;
        self.member_retry.validate()?;
        self.tip_retry.validate()
    }
}

/// Results of one chunk, one slot per requested member in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFetch {
    pub results: Vec<Option<Value>>,
    pub fell_back: bool,
}

impl ChunkFetch {
    pub fn missing(&self) -> usize {
        self.results.iter().filter(|slot| slot.is_none()).count()
    }
}

pub struct BatchHarvester {
    pub(crate) executor: RpcExecutor,
    pub(crate) options: HarvestOptions,
    cooldown: BatchCooldown,
    telemetry: Arc<Telemetry>,
    observer: Arc<dyn HarvestObserver>,
    shutdown: CancellationToken,
}

impl BatchHarvester {
    pub fn new(executor: RpcExecutor, options: HarvestOptions) -> Result<Self> {
        options.validate()?;
        let cooldown = BatchCooldown::new(options.failure_threshold, options.cooldown);
        Ok(Self {
            executor,
            options,
            cooldown,
            telemetry: Arc::new(Telemetry::default()),
            observer: Arc::new(LogObserver),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_config(executor: RpcExecutor, config: &HarvestConfig) -> Result<Self> {
        Self::new(executor, HarvestOptions::from(config))
    }

    pub fn with_observer(mut self, observer: Arc<dyn HarvestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Token checked between chunks; cancelling it stops new chunks from
    /// being issued while the current one completes.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn executor(&self) -> &RpcExecutor {
        &self.executor
    }

    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    pub fn cooldown(&self) -> &BatchCooldown {
        &self.cooldown
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Fetches one chunk: the whole batch first (re-issued per `batch_retry`),
    /// then each member on its own if the batch never succeeded.
    pub async fn fetch_chunk(&self, calls: Vec<RpcCall>) -> ChunkFetch {
        if calls.is_empty() {
            return ChunkFetch {
                results: Vec::new(),
                fell_back: false,
            };
        }

        match self.fetch_whole_batch(&calls).await {
            Ok(results) => {
                self.cooldown.record_success();
                ChunkFetch {
                    results,
                    fell_back: false,
                }
            }
            Err(failure) => {
                self.cooldown.record_failure();
                self.telemetry.record_batch_failure();
                self.telemetry.record_fallback_requests(calls.len() as u64);
                tracing::warn!(
                    members = calls.len(),
                    error = %failure,
                    "batch request failed; falling back to per-member requests"
                );

                let results = join_all(calls.into_iter().map(|call| self.fetch_member(call))).await;
                ChunkFetch {
                    results,
                    fell_back: true,
                }
            }
        }
    }

    async fn fetch_whole_batch(&self, calls: &[RpcCall]) -> Result<Vec<Option<Value>>, RpcFailure> {
        let policy = &self.options.batch_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .executor
                .call_batch(calls.to_vec(), Some(self.options.batch_timeout))
                .await
            {
                Ok(results) => return Ok(results),
                Err(failure) => {
                    if matches!(failure, RpcFailure::Closed) || !policy.should_retry(attempt) {
                        return Err(failure);
                    }
                    let pause = policy.delay(BackoffKind::LinearFlat, attempt);
                    tracing::debug!(
                        attempt,
                        pause_ms = pause.as_millis() as u64,
                        error = %failure,
                        "re-issuing failed batch"
                    );
                    sleep(pause).await;
                }
            }
        }
    }

    /// A member whose result stays null or whose requests keep failing comes
    /// back as `None`.
    async fn fetch_member(&self, call: RpcCall) -> Option<Value> {
        let policy = &self.options.member_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self
                .executor
                .call(call.clone(), Some(self.options.single_timeout))
                .await;

            let failure = match outcome {
                Ok(Some(value)) => return Some(value),
                Ok(None) => None,
                Err(failure) => Some(failure),
            };

            if matches!(failure, Some(RpcFailure::Closed)) || !policy.should_retry(attempt) {
                let reason = failure.map_or_else(|| "null result".to_string(), |f| f.to_string());
                tracing::debug!(
                    method = %call.method,
                    params = %call.params,
                    attempt,
                    error = %reason,
                    "member still missing after retries"
                );
                return None;
            }
            sleep(policy.delay(BackoffKind::LinearFlat, attempt)).await;
        }
    }

    /// Bookkeeping after every chunk: counters, the observer hook, the
    /// sustained-failure cooldown, and the pause between chunks.
    pub(crate) async fn finish_chunk(&self, chunk_len: usize, progress: ChunkProgress) {
        self.telemetry
            .record_chunk(chunk_len as u64, progress.missing as u64);
        self.observer.on_chunk(&progress);

        if let Some(pause) = self.cooldown.take_pause() {
            self.telemetry.record_cooldown();
            sleep(pause).await;
        }
        if !self.options.chunk_pause.is_zero() {
            sleep(self.options.chunk_pause).await;
        }
    }
}
