use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Lowercase address derived from an index; index 0 is never used so the
/// zero address does not appear.
pub fn address(index: u64) -> String {
    format!("0x{:040x}", index + 1)
}

/// In-memory Ethereum node. Block `n` carries a transfer
/// `address(n) -> address(n + 1)` and a contract creation from `address(n)`.
#[derive(Clone, Default)]
pub struct MockEthChain {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    tip: RwLock<Option<u64>>,
    missing_blocks: RwLock<HashSet<u64>>,
    balances: RwLock<HashMap<String, String>>,
    token_balances: RwLock<HashMap<(String, String), String>>,
    failing_addresses: RwLock<HashSet<String>>,
    fail_batches: AtomicBool,
    rate_limit_remaining: AtomicU64,
    malformed_remaining: AtomicU64,
    http_requests: AtomicU64,
    batch_requests: AtomicU64,
    single_requests: AtomicU64,
}

impl MockEthChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        chain.set_tip(Some(tip));
        chain
    }

    /// A node that never reports its latest block.
    pub fn without_tip() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, tip: Option<u64>) {
        *self.inner.tip.write().expect("mock chain poisoned") = tip;
    }

    pub fn drop_block(&self, number: u64) {
        self.inner
            .missing_blocks
            .write()
            .expect("mock chain poisoned")
            .insert(number);
    }

    pub fn set_balance(&self, holder: &str, wei_hex: &str) {
        self.inner
            .balances
            .write()
            .expect("mock chain poisoned")
            .insert(holder.to_ascii_lowercase(), wei_hex.to_string());
    }

    pub fn set_token_balance(&self, token: &str, holder: &str, raw: u128) {
        self.inner
            .token_balances
            .write()
            .expect("mock chain poisoned")
            .insert(
                (token.to_ascii_lowercase(), holder.to_ascii_lowercase()),
                format!("0x{raw:064x}"),
            );
    }

    /// Balance lookups for `holder` answer with an RPC error.
    pub fn fail_address(&self, holder: &str) {
        self.inner
            .failing_addresses
            .write()
            .expect("mock chain poisoned")
            .insert(holder.to_ascii_lowercase());
    }

    /// Every batched request is answered with HTTP 500.
    pub fn fail_batches(&self, enabled: bool) {
        self.inner.fail_batches.store(enabled, Ordering::SeqCst);
    }

    /// The next `count` HTTP requests are answered with 429.
    pub fn rate_limit_next(&self, count: u64) {
        self.inner.rate_limit_remaining.store(count, Ordering::SeqCst);
    }

    /// The next `count` HTTP requests get a body that is not JSON.
    pub fn malformed_next(&self, count: u64) {
        self.inner.malformed_remaining.store(count, Ordering::SeqCst);
    }

    pub fn http_requests(&self) -> u64 {
        self.inner.http_requests.load(Ordering::SeqCst)
    }

    pub fn batch_requests(&self) -> u64 {
        self.inner.batch_requests.load(Ordering::SeqCst)
    }

    pub fn single_requests(&self) -> u64 {
        self.inner.single_requests.load(Ordering::SeqCst)
    }

    fn tip(&self) -> Option<u64> {
        *self.inner.tip.read().expect("mock chain poisoned")
    }

    fn block(&self, number: u64) -> Option<Value> {
        if self.tip().map_or(true, |tip| number > tip) {
            return None;
        }
        if self
            .inner
            .missing_blocks
            .read()
            .expect("mock chain poisoned")
            .contains(&number)
        {
            return None;
        }
        Some(json!({
            "number": format!("{number:#x}"),
            "transactions": [
                {"from": address(number), "to": address(number + 1), "value": "0x1"},
                {"from": address(number), "to": null, "value": "0x0"},
            ],
        }))
    }

    fn take_one(counter: &AtomicU64) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockEthChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn serve_request(chain: MockEthChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"));
    }
    chain.inner.http_requests.fetch_add(1, Ordering::SeqCst);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(plain(StatusCode::BAD_REQUEST, format!("failed to read body: {err}")));
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return Ok(plain(StatusCode::BAD_REQUEST, format!("invalid JSON payload: {err}")));
        }
    };

    if payload.is_array() {
        chain.inner.batch_requests.fetch_add(1, Ordering::SeqCst);
    } else {
        chain.inner.single_requests.fetch_add(1, Ordering::SeqCst);
    }

    if MockEthChain::take_one(&chain.inner.rate_limit_remaining) {
        return Ok(plain(StatusCode::TOO_MANY_REQUESTS, "slow down"));
    }
    if MockEthChain::take_one(&chain.inner.malformed_remaining) {
        return Ok(plain(StatusCode::OK, "<html>gateway hiccup"));
    }

    let response_value = match payload {
        Value::Array(calls) => {
            if chain.inner.fail_batches.load(Ordering::SeqCst) {
                return Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "batch backend unavailable"));
            }
            // Reverse the order to exercise id-based re-association.
            Value::Array(calls.into_iter().rev().map(|call| handle_call(&chain, call)).collect())
        }
        call => handle_call(&chain, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockEthChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let first = params.get(0).cloned().unwrap_or(Value::Null);

    match method.as_str() {
        "eth_blockNumber" => match chain.tip() {
            Some(tip) => success(id, json!(format!("{tip:#x}"))),
            None => error(id, -32000, "header not found"),
        },
        "eth_getBlockByNumber" => {
            let number = first
                .as_str()
                .and_then(|raw| u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok());
            match number.and_then(|n| chain.block(n)) {
                Some(block) => success(id, block),
                None => success(id, Value::Null),
            }
        }
        "eth_getBalance" => {
            let holder = first.as_str().unwrap_or_default().to_ascii_lowercase();
            if chain
                .inner
                .failing_addresses
                .read()
                .expect("mock chain poisoned")
                .contains(&holder)
            {
                return error(id, -32603, "internal error");
            }
            let balance = chain
                .inner
                .balances
                .read()
                .expect("mock chain poisoned")
                .get(&holder)
                .cloned()
                .unwrap_or_else(|| "0x0".to_string());
            success(id, json!(balance))
        }
        "eth_call" => {
            let token = first
                .get("to")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_lowercase();
            let data = first.get("data").and_then(Value::as_str).unwrap_or_default();
            let holder = format!("0x{}", &data[data.len().saturating_sub(40)..]).to_ascii_lowercase();
            let word = chain
                .inner
                .token_balances
                .read()
                .expect("mock chain poisoned")
                .get(&(token, holder))
                .cloned()
                .unwrap_or_else(|| format!("0x{}", "0".repeat(64)));
            success(id, json!(word))
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
