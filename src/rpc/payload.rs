//! JSON-RPC request builders and the id-based re-association of batch replies.

use serde::Serialize;
use serde_json::{json, Value};

const JSONRPC_VERSION: &str = "2.0";
const ERC20_BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcCall {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: 1,
            method: method.into(),
            params,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }
}

/// Body of one HTTP POST: a single call or a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcPayload {
    Single(RpcCall),
    Batch(Vec<RpcCall>),
}

impl RpcPayload {
    /// Builds a batch, overwriting ids with each call's position.
    pub fn batch(calls: Vec<RpcCall>) -> Self {
        RpcPayload::Batch(
            calls
                .into_iter()
                .enumerate()
                .map(|(idx, call)| call.with_id(idx as u64))
                .collect(),
        )
    }

    pub fn method(&self) -> &str {
        match self {
            RpcPayload::Single(call) => &call.method,
            RpcPayload::Batch(calls) => calls.first().map(|c| c.method.as_str()).unwrap_or("batch"),
        }
    }

    pub fn batch_len(&self) -> Option<usize> {
        match self {
            RpcPayload::Single(_) => None,
            RpcPayload::Batch(calls) => Some(calls.len()),
        }
    }
}

impl From<RpcCall> for RpcPayload {
    fn from(call: RpcCall) -> Self {
        RpcPayload::Single(call)
    }
}

/// Places each batch item's `result` at the slot named by its id. Items with
/// missing, non-integer, or out-of-range ids are ignored; `null` results and
/// error items leave their slot empty.
pub fn associate_by_id(items: Vec<Value>, expected: usize) -> Vec<Option<Value>> {
    let mut slots = vec![None; expected];
    for item in items {
        let Some(idx) = item.get("id").and_then(parse_id) else {
            continue;
        };
        let Some(slot) = slots.get_mut(idx) else {
            continue;
        };
        if let Value::Object(mut map) = item {
            if let Some(result) = map.remove("result").filter(|v| !v.is_null()) {
                *slot = Some(result);
            }
        }
    }
    slots
}

fn parse_id(id: &Value) -> Option<usize> {
    match id {
        Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn eth_block_number() -> RpcCall {
    RpcCall::new("eth_blockNumber", json!([]))
}

pub fn eth_get_block_by_number(number: u64, full_transactions: bool) -> RpcCall {
    RpcCall::new(
        "eth_getBlockByNumber",
        json!([format!("{number:#x}"), full_transactions]),
    )
}

pub fn eth_get_balance(address: &str) -> RpcCall {
    RpcCall::new("eth_getBalance", json!([address, "latest"]))
}

/// `eth_call` of ERC-20 `balanceOf(holder)` against the latest block.
pub fn erc20_balance_of(token: &str, holder: &str) -> RpcCall {
    let holder_hex = strip_hex_prefix(holder).to_ascii_lowercase();
    let data = format!("0x{ERC20_BALANCE_OF_SELECTOR}{holder_hex:0>64}");
    let to = format!("0x{}", strip_hex_prefix(token).to_ascii_lowercase());
    RpcCall::new("eth_call", json!([{ "to": to, "data": data }, "latest"]))
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
