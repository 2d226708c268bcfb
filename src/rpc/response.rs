//! Tagged view of what came back from an endpoint. The executor classifies the
//! raw HTTP reply exactly once; downstream code only matches on these variants.

use serde_json::Value;
use std::fmt;

pub(crate) const ERROR_SNIPPET_CHARS: usize = 160;
pub(crate) const MALFORMED_SNIPPET_CHARS: usize = 400;

/// Successful JSON-RPC reply, split by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    /// A single JSON-RPC object, or a bare value some endpoints return.
    Single(Value),
    /// The array answering a batch request.
    Batch(Vec<Value>),
}

impl RpcResponse {
    pub(crate) fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => RpcResponse::Batch(items),
            other => RpcResponse::Single(other),
        }
    }

    /// The `result` member of a single reply. A bare non-object reply is
    /// treated as the result itself; `null` counts as absent.
    pub fn result(&self) -> Option<&Value> {
        match self {
            RpcResponse::Single(Value::Object(map)) => map.get("result").filter(|v| !v.is_null()),
            RpcResponse::Single(Value::Null) => None,
            RpcResponse::Single(bare) => Some(bare),
            RpcResponse::Batch(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<Vec<Value>> {
        match self {
            RpcResponse::Batch(items) => Some(items),
            RpcResponse::Single(_) => None,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, RpcResponse::Batch(_))
    }
}

/// Why an execution sequence ended without a usable reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcFailure {
    RateLimited { endpoint: String, body: String },
    Server { endpoint: String, status: u16, body: String },
    Http { endpoint: String, status: u16, body: String },
    Rpc { endpoint: String, error: Value },
    Transport { endpoint: String, message: String },
    Timeout { endpoint: String },
    Malformed { endpoint: String, body: String },
    /// A well-formed reply whose shape does not answer the request (an object
    /// for a batch, an array for a single call).
    ShapeMismatch { expected: &'static str },
    InvalidRequest { message: String },
    Closed,
}

impl RpcFailure {
    /// Malformed bodies, unusable requests, and a closed pool end the attempt
    /// sequence at once.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RpcFailure::Malformed { .. }
                | RpcFailure::ShapeMismatch { .. }
                | RpcFailure::InvalidRequest { .. }
                | RpcFailure::Closed
        )
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcFailure::RateLimited { endpoint, .. }
            | RpcFailure::Server { endpoint, .. }
            | RpcFailure::Http { endpoint, .. }
            | RpcFailure::Rpc { endpoint, .. }
            | RpcFailure::Transport { endpoint, .. }
            | RpcFailure::Timeout { endpoint }
            | RpcFailure::Malformed { endpoint, .. } => Some(endpoint),
            RpcFailure::ShapeMismatch { .. }
            | RpcFailure::InvalidRequest { .. }
            | RpcFailure::Closed => None,
        }
    }
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcFailure::RateLimited { endpoint, body } => {
                write!(f, "rate limited (429) by {endpoint}: {body}")
            }
            RpcFailure::Server {
                endpoint,
                status,
                body,
            } => write!(f, "server error {status} from {endpoint}: {body}"),
            RpcFailure::Http {
                endpoint,
                status,
                body,
            } => write!(f, "unexpected HTTP status {status} from {endpoint}: {body}"),
            RpcFailure::Rpc { endpoint, error } => write!(f, "rpc error from {endpoint}: {error}"),
            RpcFailure::Transport { endpoint, message } => {
                write!(f, "transport error talking to {endpoint}: {message}")
            }
            RpcFailure::Timeout { endpoint } => write!(f, "request to {endpoint} timed out"),
            RpcFailure::Malformed { endpoint, body } => {
                write!(f, "invalid JSON from {endpoint}: {body}")
            }
            RpcFailure::ShapeMismatch { expected } => {
                write!(f, "rpc reply did not match the request shape (expected {expected})")
            }
            RpcFailure::InvalidRequest { message } => write!(f, "invalid rpc request: {message}"),
            RpcFailure::Closed => write!(f, "rpc executor is closed"),
        }
    }
}

impl std::error::Error for RpcFailure {}

pub type RpcOutcome = Result<RpcResponse, RpcFailure>;

pub(crate) fn snippet(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}
