use std::time::Duration;

use anyhow::Result;
use harvestproof::{HarvestConfig, RetryPolicy};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Configuration pointed at the given endpoints with every sleep removed so
/// retry paths run instantly.
pub fn fast_config(endpoints: &[&str], chunk_size: usize, lookback: u64) -> Result<HarvestConfig> {
    HarvestConfig::builder()
        .endpoints(endpoints.iter().copied())
        .max_concurrent_requests(4)
        .chunk_size(chunk_size)
        .lookback_blocks(lookback)
        .request_timeout(Duration::from_secs(2))
        .batch_timeout(Duration::from_secs(2))
        .single_timeout(Duration::from_secs(2))
        .tip_timeout(Duration::from_secs(2))
        .retry_policy(RetryPolicy::immediate(2))
        .batch_retry(RetryPolicy::immediate(2))
        .member_retry(RetryPolicy::immediate(3))
        .tip_retry(RetryPolicy::immediate(2))
        .failure_threshold(3)
        .cooldown(Duration::from_millis(1))
        .chunk_pause(Duration::ZERO)
        .build()
}
