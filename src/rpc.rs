//! JSON-RPC plumbing: endpoint rotation, transport, retry policy, reply
//! classification, request builders, and metrics.

pub mod client;
pub mod endpoints;
pub mod metrics;
pub mod options;
pub mod payload;
pub mod response;
pub mod retry;
pub mod transport;

pub use client::RpcExecutor;
pub use endpoints::{EndpointPool, FALLBACK_ENDPOINTS};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use payload::{RpcCall, RpcPayload};
pub use response::{RpcFailure, RpcOutcome, RpcResponse};
pub use retry::{BackoffKind, RetryPolicy};
pub use transport::{HttpTransport, RpcTransport, TransportError, TransportReply};
