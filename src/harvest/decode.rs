//! Decoding of RPC quantities and checksum normalization of addresses.

use primitive_types::U256;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::fmt;

const ADDRESS_HEX_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    NotAQuantity(String),
    Overflow(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotAQuantity(raw) => write!(f, "not a hex quantity: {raw}"),
            DecodeError::Overflow(raw) => write!(f, "quantity does not fit 256 bits: {raw}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a big-endian hex quantity. Absent, `null`, `"0x"` and empty
/// strings decode to zero.
pub fn decode_quantity(value: Option<&Value>) -> Result<U256, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(U256::zero()),
        Some(Value::String(raw)) => decode_hex_quantity(raw),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| DecodeError::NotAQuantity(n.to_string())),
        Some(other) => Err(DecodeError::NotAQuantity(other.to_string())),
    }
}

pub fn decode_hex_quantity(raw: &str) -> Result<U256, DecodeError> {
    let digits = strip_hex_prefix(raw.trim());
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::NotAQuantity(raw.to_owned()));
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 64 {
        return Err(DecodeError::Overflow(raw.to_owned()));
    }
    if significant.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(significant, 16).map_err(|_| DecodeError::NotAQuantity(raw.to_owned()))
}

/// Decodes a quantity that must fit in a `u64` (block numbers).
pub fn decode_u64(value: Option<&Value>) -> Option<u64> {
    let quantity = decode_quantity(value).ok()?;
    if quantity > U256::from(u64::MAX) {
        return None;
    }
    Some(quantity.low_u64())
}

/// EIP-55 mixed-case checksum form of a 20-byte hex address. Input casing is
/// ignored; anything that is not 40 hex digits yields `None`.
pub fn to_checksum_address(address: &str) -> Option<String> {
    let digits = strip_hex_prefix(address.trim());
    if digits.len() != ADDRESS_HEX_LEN || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let lower = digits.to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(ADDRESS_HEX_LEN + 2);
    out.push_str("0x");
    for (idx, ch) in lower.chars().enumerate() {
        let byte = hash[idx / 2];
        let nibble = if idx % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
