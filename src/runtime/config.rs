use crate::harvest::balances::TokenSpec;
use crate::harvest::decode::to_checksum_address;
use crate::rpc::endpoints::FALLBACK_ENDPOINTS;
use crate::rpc::retry::RetryPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::env;
use std::time::Duration;

pub const ENV_RPC_URL: &str = "ETH_RPC_URL";
pub const ENV_LOOKBACK: &str = "HARVEST_LOOKBACK";
pub const ENV_CONCURRENCY: &str = "HARVEST_CONCURRENCY";
pub const ENV_BATCH: &str = "HARVEST_BATCH";
pub const ENV_TOKENS_JSON: &str = "TOKENS_JSON";

/// Mainnet tokens priced by default, as `(symbol, contract)`.
pub const DEFAULT_TOKENS: &[(&str, &str)] = &[
    ("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    ("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7"),
    ("WETH", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
    ("WBTC", "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"),
];

const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;
const DEFAULT_CHUNK_SIZE: usize = 120;
const DEFAULT_LOOKBACK_BLOCKS: u64 = 18_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SINGLE_TIMEOUT_SECS: u64 = 20;
const DEFAULT_TIP_TIMEOUT_SECS: u64 = 12;
const DEFAULT_FAILURE_THRESHOLD: usize = 3;
const DEFAULT_COOLDOWN_SECS: u64 = 5;
const DEFAULT_CHUNK_PAUSE_MS: u64 = 50;

/// Runtime configuration for the executor and the harvester.
///
/// All instances must be constructed via [`HarvestConfig::builder`],
/// [`HarvestConfig::new`], or [`HarvestConfig::from_env`] so invariants are
/// validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    endpoints: Vec<String>,
    max_concurrent_requests: usize,
    chunk_size: usize,
    lookback_blocks: u64,
    request_timeout: Duration,
    batch_timeout: Duration,
    single_timeout: Duration,
    tip_timeout: Duration,
    retry_policy: RetryPolicy,
    batch_retry: RetryPolicy,
    member_retry: RetryPolicy,
    tip_retry: RetryPolicy,
    failure_threshold: usize,
    cooldown: Duration,
    chunk_pause: Duration,
    metrics_interval: Duration,
    tokens: Vec<TokenSpec>,
}

pub struct HarvestConfigParams {
    pub endpoints: Vec<String>,
    pub max_concurrent_requests: usize,
    pub chunk_size: usize,
    pub lookback_blocks: u64,
    pub request_timeout: Duration,
    pub batch_timeout: Duration,
    pub single_timeout: Duration,
    pub tip_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub batch_retry: RetryPolicy,
    pub member_retry: RetryPolicy,
    pub tip_retry: RetryPolicy,
    pub failure_threshold: usize,
    pub cooldown: Duration,
    pub chunk_pause: Duration,
    pub metrics_interval: Duration,
    pub tokens: Vec<TokenSpec>,
}

impl HarvestConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: HarvestConfigParams) -> Result<Self> {
        let HarvestConfigParams {
            endpoints,
            max_concurrent_requests,
            chunk_size,
            lookback_blocks,
            request_timeout,
            batch_timeout,
            single_timeout,
            tip_timeout,
            retry_policy,
            batch_retry,
            member_retry,
            tip_retry,
            failure_threshold,
            cooldown,
            chunk_pause,
            metrics_interval,
            tokens,
        } = params;

        let config = Self {
            endpoints: parse_endpoints(endpoints),
            max_concurrent_requests,
            chunk_size,
            lookback_blocks,
            request_timeout,
            batch_timeout,
            single_timeout,
            tip_timeout,
            retry_policy,
            batch_retry,
            member_retry,
            tip_retry,
            failure_threshold,
            cooldown,
            chunk_pause,
            metrics_interval,
            tokens,
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `ETH_RPC_URL`, `HARVEST_LOOKBACK`,
    /// `HARVEST_CONCURRENCY`, `HARVEST_BATCH`, and `TOKENS_JSON`, applying
    /// defaults for the rest. Explicit endpoints win over the environment.
    pub fn from_env(explicit_endpoints: Option<Vec<String>>) -> Result<Self> {
        Self::builder_from_env(explicit_endpoints)?.build()
    }

    /// Builder pre-filled from the environment, for callers that layer their
    /// own overrides (command-line flags) on top.
    pub fn builder_from_env(explicit_endpoints: Option<Vec<String>>) -> Result<HarvestConfigBuilder> {
        let endpoints = resolve_endpoints(explicit_endpoints, env::var(ENV_RPC_URL).ok());
        let mut builder = Self::builder().endpoints(endpoints);

        if let Some(lookback) = read_env_parsed::<u64>(ENV_LOOKBACK)? {
            builder = builder.lookback_blocks(lookback);
        }
        if let Some(concurrency) = read_env_parsed::<usize>(ENV_CONCURRENCY)? {
            builder = builder.max_concurrent_requests(concurrency);
        }
        if let Some(chunk) = read_env_parsed::<usize>(ENV_BATCH)? {
            builder = builder.chunk_size(chunk);
        }
        builder = builder.tokens(resolve_tokens(env::var(ENV_TOKENS_JSON).ok())?);

        Ok(builder)
    }

    /// Endpoints in rotation order.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Maximum logical requests in flight at once.
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    /// Members per batched request.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Blocks below the tip covered by a recent-range sweep.
    pub fn lookback_blocks(&self) -> u64 {
        self.lookback_blocks
    }

    /// Pool-level default timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn single_timeout(&self) -> Duration {
        self.single_timeout
    }

    pub fn tip_timeout(&self) -> Duration {
        self.tip_timeout
    }

    /// Policy the executor applies to every logical request.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Re-issue policy for a whole batch before falling back to members.
    pub fn batch_retry(&self) -> &RetryPolicy {
        &self.batch_retry
    }

    /// Re-issue policy for a single member in fallback mode.
    pub fn member_retry(&self) -> &RetryPolicy {
        &self.member_retry
    }

    /// Policy for resolving the latest block number.
    pub fn tip_retry(&self) -> &RetryPolicy {
        &self.tip_retry
    }

    /// Consecutive whole-batch failures that trigger a cooldown.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Pause inserted between chunks.
    pub fn chunk_pause(&self) -> Duration {
        self.chunk_pause
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Tokens whose balances are fetched when the caller names none.
    pub fn tokens(&self) -> &[TokenSpec] {
        &self.tokens
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            bail!("at least one RPC endpoint is required");
        }
        for endpoint in &self.endpoints {
            validate_url(endpoint)?;
        }

        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }

        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        for (name, timeout) in [
            ("request_timeout", self.request_timeout),
            ("batch_timeout", self.batch_timeout),
            ("single_timeout", self.single_timeout),
            ("tip_timeout", self.tip_timeout),
            ("metrics_interval", self.metrics_interval),
        ] {
            if timeout.is_zero() {
                bail!("{name} must be greater than 0");
            }
        }

        if self.failure_threshold == 0 {
            bail!("failure_threshold must be greater than 0");
        }

        self.retry_policy.validate().context("invalid retry_policy")?;
        self.batch_retry.validate().context("invalid batch_retry")?;
        self.member_retry.validate().context("invalid member_retry")?;
        self.tip_retry.validate().context("invalid tip_retry")?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct HarvestConfigBuilder {
    endpoints: Option<Vec<String>>,
    max_concurrent_requests: Option<usize>,
    chunk_size: Option<usize>,
    lookback_blocks: Option<u64>,
    request_timeout: Option<Duration>,
    batch_timeout: Option<Duration>,
    single_timeout: Option<Duration>,
    tip_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    batch_retry: Option<RetryPolicy>,
    member_retry: Option<RetryPolicy>,
    tip_retry: Option<RetryPolicy>,
    failure_threshold: Option<usize>,
    cooldown: Option<Duration>,
    chunk_pause: Option<Duration>,
    metrics_interval: Option<Duration>,
    tokens: Option<Vec<TokenSpec>>,
}

impl HarvestConfigBuilder {
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_concurrent_requests(mut self, count: usize) -> Self {
        self.max_concurrent_requests = Some(count);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn lookback_blocks(mut self, blocks: u64) -> Self {
        self.lookback_blocks = Some(blocks);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn single_timeout(mut self, timeout: Duration) -> Self {
        self.single_timeout = Some(timeout);
        self
    }

    pub fn tip_timeout(mut self, timeout: Duration) -> Self {
        self.tip_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn batch_retry(mut self, policy: RetryPolicy) -> Self {
        self.batch_retry = Some(policy);
        self
    }

    pub fn member_retry(mut self, policy: RetryPolicy) -> Self {
        self.member_retry = Some(policy);
        self
    }

    pub fn tip_retry(mut self, policy: RetryPolicy) -> Self {
        self.tip_retry = Some(policy);
        self
    }

    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = Some(pause);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn tokens(mut self, tokens: Vec<TokenSpec>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<HarvestConfig> {
        let endpoints = match self.endpoints.map(parse_endpoints) {
            Some(list) if !list.is_empty() => list,
            _ => fallback_endpoints(),
        };

        let params = HarvestConfigParams {
            endpoints,
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            lookback_blocks: self.lookback_blocks.unwrap_or(DEFAULT_LOOKBACK_BLOCKS),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            batch_timeout: self
                .batch_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS)),
            single_timeout: self
                .single_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SINGLE_TIMEOUT_SECS)),
            tip_timeout: self
                .tip_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIP_TIMEOUT_SECS)),
            retry_policy: self.retry_policy.unwrap_or_default(),
            batch_retry: self.batch_retry.unwrap_or_else(default_batch_retry),
            member_retry: self.member_retry.unwrap_or_else(default_member_retry),
            tip_retry: self.tip_retry.unwrap_or_else(default_tip_retry),
            failure_threshold: self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            cooldown: self
                .cooldown
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_COOLDOWN_SECS)),
            chunk_pause: self
                .chunk_pause
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            tokens: self.tokens.unwrap_or_else(default_tokens),
        };

        HarvestConfig::new(params)
    }
}

fn default_batch_retry() -> RetryPolicy {
    RetryPolicy::linear(3, Duration::from_millis(800), Duration::from_millis(800))
}

fn default_member_retry() -> RetryPolicy {
    RetryPolicy::linear(3, Duration::from_millis(400), Duration::from_secs(8))
}

fn default_tip_retry() -> RetryPolicy {
    RetryPolicy::linear(5, Duration::from_millis(500), Duration::from_secs(10))
}

fn fallback_endpoints() -> Vec<String> {
    FALLBACK_ENDPOINTS.iter().map(|url| url.to_string()).collect()
}

/// Explicit list, else the comma-separated environment value, else the
/// built-in public endpoints.
pub fn resolve_endpoints(explicit: Option<Vec<String>>, env_value: Option<String>) -> Vec<String> {
    if let Some(list) = explicit.map(parse_endpoints).filter(|list| !list.is_empty()) {
        return list;
    }
    if let Some(list) = env_value
        .map(|raw| parse_endpoints(raw.split(',').map(str::to_owned).collect()))
        .filter(|list| !list.is_empty())
    {
        return list;
    }
    fallback_endpoints()
}

fn default_tokens() -> Vec<TokenSpec> {
    DEFAULT_TOKENS
        .iter()
        .map(|(symbol, contract)| TokenSpec::new(*symbol, Some(contract.to_string())))
        .collect()
}

/// The default token table with `TOKENS_JSON` merged over it.
///
/// The override is a JSON object keyed by symbol. Each value is a contract
/// address, an object with an `address` field, or `null`. A symbol already in
/// the table is replaced in place and new symbols are appended. A missing or
/// unusable address leaves the token without a contract, so every holder
/// reports zero.
pub fn resolve_tokens(env_value: Option<String>) -> Result<Vec<TokenSpec>> {
    let mut tokens = default_tokens();
    let Some(raw) = env_value.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(tokens);
    };
    let overrides: serde_json::Map<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{ENV_TOKENS_JSON} must be a JSON object keyed by symbol"))?;

    for (symbol, entry) in overrides {
        let contract = token_contract(&symbol, &entry);
        let spec = TokenSpec::new(symbol, contract);
        match tokens.iter_mut().find(|token| token.symbol == spec.symbol) {
            Some(existing) => *existing = spec,
            None => tokens.push(spec),
        }
    }
    Ok(tokens)
}

fn token_contract(symbol: &str, entry: &Value) -> Option<String> {
    let raw = match entry {
        Value::String(address) => address.as_str(),
        Value::Object(fields) => fields.get("address").and_then(Value::as_str)?,
        _ => return None,
    };
    if raw.trim().is_empty() {
        return None;
    }
    let contract = to_checksum_address(raw.trim());
    if contract.is_none() {
        tracing::warn!(symbol, address = raw, "token contract is not a valid address; reporting zeros");
    }
    contract
}

fn parse_endpoints(endpoints: Vec<String>) -> Vec<String> {
    endpoints
        .into_iter()
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
        .collect()
}

fn read_env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{name} is not valid: {err}")),
        _ => Ok(None),
    }
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc endpoint {url} must start with http:// or https://");
    }
    Ok(())
}
