//! Resilient request executor: issues single or batched JSON-RPC calls through
//! the rotating endpoint pool, classifies every reply, and retries with
//! backoff until the policy runs out. Network conditions never escape as
//! `Err` of a fallible function; they come back as an [`RpcFailure`].

use crate::rpc::endpoints::EndpointPool;
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::payload::{associate_by_id, RpcCall, RpcPayload};
use crate::rpc::response::{
    snippet, RpcFailure, RpcOutcome, RpcResponse, ERROR_SNIPPET_CHARS, MALFORMED_SNIPPET_CHARS,
};
use crate::rpc::retry::{BackoffKind, RetryContext};
use crate::rpc::transport::{HttpTransport, RpcTransport, TransportReply};
use crate::runtime::config::HarvestConfig;
use anyhow::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const HTTP_OK: u16 = 200;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;
const HTTP_SERVER_ERROR: u16 = 500;

#[derive(Clone)]
pub struct RpcExecutor {
    pool: Arc<EndpointPool>,
    transport: Arc<dyn RpcTransport>,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RpcExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcExecutor")
            .field("endpoints", &self.pool.endpoints())
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcExecutor {
    /// Builds an HTTP executor. `endpoints` of `None` (or an empty list) uses
    /// the built-in public endpoints.
    pub fn new(endpoints: Option<Vec<String>>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;
        let pool = EndpointPool::from_optional(endpoints, options.max_concurrent_requests)?;
        Self::with_transport(pool, Arc::new(HttpTransport::new()?), options)
    }

    pub fn with_transport(
        pool: EndpointPool,
        transport: Arc<dyn RpcTransport>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            pool: Arc::new(pool),
            transport,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            request_timeout: config.request_timeout(),
            max_concurrent_requests: config.max_concurrent_requests(),
            retry: config.retry_policy().clone(),
        };
        Self::new(Some(config.endpoints().to_vec()), options)
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn options(&self) -> &RpcClientOptions {
        &self.options
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends `payload`, retrying per the configured policy. One concurrency
    /// permit is held for the whole attempt sequence.
    pub async fn execute(&self, payload: &RpcPayload, timeout_override: Option<Duration>) -> RpcOutcome {
        if self.is_closed() {
            return Err(RpcFailure::Closed);
        }

        let body = serde_json::to_value(payload).map_err(|err| RpcFailure::InvalidRequest {
            message: err.to_string(),
        })?;
        let request_timeout = timeout_override.unwrap_or(self.options.request_timeout);
        let context = RetryContext::new(payload.method(), payload.batch_len());
        let policy = &self.options.retry;

        let _permit = self.pool.acquire().await.map_err(|_| RpcFailure::Closed)?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let endpoint = self.pool.select_next();
            let start = Instant::now();

            match self.attempt(endpoint, &body, request_timeout).await {
                Ok(response) => {
                    self.metrics.record_success(start.elapsed());
                    context.log_success(attempt, endpoint);
                    return Ok(response);
                }
                Err(failure) => {
                    self.metrics.record_failure(start.elapsed(), &failure);

                    if !failure.is_retryable() {
                        context.log_terminal(attempt, &failure);
                        return Err(failure);
                    }
                    if !policy.should_retry(attempt) {
                        self.metrics.record_exhausted();
                        context.log_exhausted(attempt, &failure);
                        return Err(failure);
                    }

                    let backoff = policy.delay(backoff_kind(&failure), attempt);
                    context.log_retry(attempt, backoff, &failure);
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Single call; yields the `result` member (`None` when null or absent).
    pub async fn call(
        &self,
        call: RpcCall,
        timeout_override: Option<Duration>,
    ) -> Result<Option<Value>, RpcFailure> {
        match self.execute(&RpcPayload::Single(call), timeout_override).await? {
            response @ RpcResponse::Single(_) => Ok(response.result().cloned()),
            RpcResponse::Batch(_) => Err(RpcFailure::ShapeMismatch { expected: "object" }),
        }
    }

    /// Batched call; results are re-associated with their inputs by id, one
    /// slot per call in input order.
    pub async fn call_batch(
        &self,
        calls: Vec<RpcCall>,
        timeout_override: Option<Duration>,
    ) -> Result<Vec<Option<Value>>, RpcFailure> {
        let expected = calls.len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .execute(&RpcPayload::batch(calls), timeout_override)
            .await?;
        let items = response
            .into_batch()
            .ok_or(RpcFailure::ShapeMismatch { expected: "array" })?;
        Ok(associate_by_id(items, expected))
    }

    /// Releases transport resources and rejects further requests. Repeated
    /// calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close();
        self.transport.close();
        tracing::debug!(endpoints = self.pool.len(), "rpc executor closed");
    }

    async fn attempt(
        &self,
        endpoint: &str,
        body: &Value,
        request_timeout: Duration,
    ) -> Result<RpcResponse, RpcFailure> {
        let reply = match timeout(
            request_timeout,
            self.transport.post(endpoint, body, request_timeout),
        )
        .await
        {
            Err(_) => {
                return Err(RpcFailure::Timeout {
                    endpoint: endpoint.to_owned(),
                })
            }
            Ok(Err(err)) if err.timed_out => {
                return Err(RpcFailure::Timeout {
                    endpoint: endpoint.to_owned(),
                })
            }
            Ok(Err(err)) => {
                return Err(RpcFailure::Transport {
                    endpoint: endpoint.to_owned(),
                    message: err.message,
                })
            }
            Ok(Ok(reply)) => reply,
        };

        classify_reply(endpoint, reply)
    }
}

fn classify_reply(endpoint: &str, reply: TransportReply) -> Result<RpcResponse, RpcFailure> {
    let TransportReply { status, body } = reply;
    let endpoint = endpoint.to_owned();

    if status == HTTP_TOO_MANY_REQUESTS {
        return Err(RpcFailure::RateLimited {
            endpoint,
            body: snippet(&body, ERROR_SNIPPET_CHARS),
        });
    }
    if status >= HTTP_SERVER_ERROR {
        return Err(RpcFailure::Server {
            endpoint,
            status,
            body: snippet(&body, ERROR_SNIPPET_CHARS),
        });
    }
    if status != HTTP_OK {
        return Err(RpcFailure::Http {
            endpoint,
            status,
            body: snippet(&body, ERROR_SNIPPET_CHARS),
        });
    }

    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => {
            return Err(RpcFailure::Malformed {
                endpoint,
                body: snippet(&body, MALFORMED_SNIPPET_CHARS),
            })
        }
    };

    if let Some(error) = value.get("error").filter(|err| !err.is_null()) {
        if value.is_object() {
            return Err(RpcFailure::Rpc {
                endpoint,
                error: error.clone(),
            });
        }
    }

    Ok(RpcResponse::from_value(value))
}

fn backoff_kind(failure: &RpcFailure) -> BackoffKind {
    match failure {
        RpcFailure::RateLimited { .. } | RpcFailure::Server { .. } => BackoffKind::Exponential,
        RpcFailure::Rpc { .. } => BackoffKind::LinearFlat,
        _ => BackoffKind::Linear,
    }
}
