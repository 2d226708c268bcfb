//! Rotating endpoint pool: strict round-robin selection over a fixed list of
//! JSON-RPC URLs plus the semaphore that bounds in-flight logical requests.

use anyhow::{bail, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};

/// Free public mainnet endpoints used when nothing else is configured.
pub const FALLBACK_ENDPOINTS: &[&str] = &[
    "https://cloudflare-eth.com",
    "https://ethereum-rpc.publicnode.com",
    "https://rpc.ankr.com/eth",
    "https://eth.public-rpc.com",
    "https://1rpc.io/eth",
];

#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<String>,
    initial_position: usize,
    cursor: AtomicUsize,
    permits: Semaphore,
    max_concurrent: usize,
}

impl EndpointPool {
    /// Builds a pool from an explicit list. Blank entries are discarded and an
    /// empty remainder is rejected. The rotation starts at a random position.
    pub fn new(endpoints: Vec<String>, max_concurrent: usize) -> Result<Self> {
        let endpoints = sanitize(endpoints);
        if endpoints.is_empty() {
            bail!("endpoint pool requires at least one endpoint");
        }
        let start = rand::thread_rng().gen_range(0..endpoints.len());
        Self::with_start(endpoints, max_concurrent, start)
    }

    /// Builds a pool from the built-in public endpoints.
    pub fn with_fallback(max_concurrent: usize) -> Result<Self> {
        Self::new(
            FALLBACK_ENDPOINTS.iter().map(|url| url.to_string()).collect(),
            max_concurrent,
        )
    }

    /// Uses `endpoints` when present and non-empty, otherwise the built-in list.
    pub fn from_optional(endpoints: Option<Vec<String>>, max_concurrent: usize) -> Result<Self> {
        match endpoints.map(sanitize) {
            Some(list) if !list.is_empty() => Self::new(list, max_concurrent),
            _ => Self::with_fallback(max_concurrent),
        }
    }

    /// Builds a pool whose first selection is `endpoints[start % len]`.
    pub fn with_start(endpoints: Vec<String>, max_concurrent: usize, start: usize) -> Result<Self> {
        let endpoints = sanitize(endpoints);
        if endpoints.is_empty() {
            bail!("endpoint pool requires at least one endpoint");
        }
        if max_concurrent == 0 {
            bail!("max_concurrent must be greater than 0");
        }
        let initial_position = start % endpoints.len();

        Ok(Self {
            endpoints,
            initial_position,
            cursor: AtomicUsize::new(initial_position),
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn initial_position(&self) -> usize {
        self.initial_position
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns the next endpoint in rotation. Safe under concurrent callers;
    /// each call advances the shared cursor by exactly one.
    pub fn select_next(&self) -> &str {
        let position = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.endpoints[position % self.endpoints.len()]
    }

    /// Waits for a concurrency permit. Fails only once the pool is closed.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.permits.acquire().await
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops handing out permits. Waiters are released with an error.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

fn sanitize(endpoints: Vec<String>) -> Vec<String> {
    endpoints
        .into_iter()
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn urls(count: usize) -> Vec<String> {
        (0..count).map(|idx| format!("http://node-{idx}")).collect()
    }

    #[test]
    fn rejects_empty_list() {
        assert!(EndpointPool::new(Vec::new(), 4).is_err());
        assert!(EndpointPool::new(vec!["  ".into()], 4).is_err());
    }

    #[test]
    fn falls_back_to_builtin_list() {
        let pool = EndpointPool::from_optional(None, 2).unwrap();
        assert_eq!(pool.len(), FALLBACK_ENDPOINTS.len());

        let pool = EndpointPool::from_optional(Some(vec![String::new()]), 2).unwrap();
        assert_eq!(pool.len(), FALLBACK_ENDPOINTS.len());

        let pool = EndpointPool::from_optional(Some(urls(2)), 2).unwrap();
        assert_eq!(pool.endpoints(), urls(2).as_slice());
    }

    #[test]
    fn rotates_in_strict_order_from_initial_position() {
        let pool = EndpointPool::with_start(urls(3), 1, 2).unwrap();
        let picked: Vec<&str> = (0..6).map(|_| pool.select_next()).collect();
        assert_eq!(
            picked,
            vec![
                "http://node-2",
                "http://node-0",
                "http://node-1",
                "http://node-2",
                "http://node-0",
                "http://node-1",
            ]
        );
    }

    #[test]
    fn spreads_selections_evenly() {
        let pool = EndpointPool::new(urls(4), 1).unwrap();
        let calls = 103;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..calls {
            *counts.entry(pool.select_next().to_owned()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for count in counts.values() {
            assert!(*count == calls / 4 || *count == calls / 4 + 1);
        }
        let first = &pool.endpoints()[pool.initial_position()];
        assert_eq!(counts[first], calls / 4 + 1);
    }

    #[tokio::test]
    async fn permits_are_bounded_and_closable() {
        let pool = EndpointPool::new(urls(1), 2).unwrap();
        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.available_permits(), 0);
        drop(first);
        assert_eq!(pool.available_permits(), 1);

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(pool.acquire().await.is_err());
    }
}
