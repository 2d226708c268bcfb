//! HTTP seam beneath the executor. The production transport wraps a single
//! long-lived `reqwest` client; tests substitute scripted transports.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;

/// Raw reply before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

/// Connection-level failure (refused, reset, TLS, DNS, per-request timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

pub trait RpcTransport: Send + Sync {
    fn post<'a>(
        &'a self,
        endpoint: &'a str,
        body: &'a Value,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<TransportReply, TransportError>>;

    /// Releases held connections. Must tolerate repeated calls.
    fn close(&self) {}
}

#[derive(Debug)]
pub struct HttpTransport {
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build HTTP client: {err}"))?;
        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .expect("http transport lock poisoned")
            .clone()
    }

    async fn send(
        &self,
        endpoint: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        let client = self.client().ok_or_else(|| TransportError {
            message: "http transport is closed".to_owned(),
            timed_out: false,
        })?;

        let response = client
            .post(endpoint)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(TransportReply { status, body })
    }
}

impl RpcTransport for HttpTransport {
    fn post<'a>(
        &'a self,
        endpoint: &'a str,
        body: &'a Value,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<TransportReply, TransportError>> {
        Box::pin(self.send(endpoint, body, timeout))
    }

    fn close(&self) {
        let previous = self
            .client
            .write()
            .expect("http transport lock poisoned")
            .take();
        if previous.is_some() {
            tracing::debug!("http transport closed");
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    TransportError {
        timed_out: err.is_timeout(),
        message: err.to_string(),
    }
}
