//! Configurable knobs for the request executor along with validation helpers
//! so callers can reason about timeouts, concurrency, and retry/backoff limits.

use crate::rpc::retry::RetryPolicy;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 12;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// Pool-level default applied when a call does not carry its own timeout.
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry: RetryPolicy::default(),
        }
    }
}

impl RpcClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }
        self.retry.validate()
    }
}
