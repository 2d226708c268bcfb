//! Block range sweep: resolve the chain tip, walk the range chunk by chunk and
//! collect every transaction sender and receiver.

use crate::harvest::batch::BatchHarvester;
use crate::harvest::decode::{decode_u64, to_checksum_address};
use crate::harvest::progress::ChunkProgress;
use crate::rpc::payload::{eth_block_number, eth_get_block_by_number};
use crate::rpc::retry::BackoffKind;
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepStatus {
    Completed,
    /// Stopped between chunks by the shutdown token.
    Cancelled,
    /// The latest block number could not be obtained; nothing was swept.
    TipUnresolved { last_error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub status: SweepStatus,
    pub tip: Option<u64>,
    pub start: u64,
    pub end: u64,
    pub addresses: BTreeSet<String>,
    pub blocks_scanned: u64,
    pub missing_blocks: Vec<u64>,
    /// Addresses seen in transactions that failed checksum normalization.
    pub dropped_addresses: usize,
}

impl SweepReport {
    fn unresolved(last_error: String) -> Self {
        Self {
            status: SweepStatus::TipUnresolved { last_error },
            tip: None,
            start: 0,
            end: 0,
            addresses: BTreeSet::new(),
            blocks_scanned: 0,
            missing_blocks: Vec::new(),
            dropped_addresses: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SweepStatus::Completed
    }
}

/// First block of a lookback window ending at `tip`. Block 0 is never swept.
pub fn lookback_start(tip: u64, lookback: u64) -> u64 {
    tip.saturating_sub(lookback).max(1)
}

impl BatchHarvester {
    /// Latest block number, retried per the tip policy. Accepts both the
    /// `{"result": "0x.."}` envelope and a bare hex string.
    pub async fn resolve_tip(&self) -> Result<u64, String> {
        let policy = &self.options.tip_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last_error = match self
                .executor
                .call(eth_block_number(), Some(self.options.tip_timeout))
                .await
            {
                Ok(Some(value)) => match decode_u64(Some(&value)) {
                    Some(tip) => {
                        tracing::info!(tip, attempt, "resolved latest block");
                        return Ok(tip);
                    }
                    None => format!("undecodable block number: {value}"),
                },
                Ok(None) => "empty block number result".to_string(),
                Err(failure) => failure.to_string(),
            };

            if !policy.should_retry(attempt) || self.executor.is_closed() {
                tracing::error!(attempt, error = %last_error, "could not resolve latest block");
                return Err(last_error);
            }
            tracing::warn!(attempt, error = %last_error, "latest block lookup failed; retrying");
            sleep(policy.delay(BackoffKind::LinearFlat, attempt)).await;
        }
    }

    /// Sweeps the `lookback` blocks ending at the current tip.
    pub async fn sweep_recent(&self, lookback: u64) -> SweepReport {
        let tip = match self.resolve_tip().await {
            Ok(tip) => tip,
            Err(last_error) => return SweepReport::unresolved(last_error),
        };
        let mut report = self.sweep_range(lookback_start(tip, lookback), tip).await;
        report.tip = Some(tip);
        report
    }

    /// Sweeps `start..=end`. An inverted range yields an empty, complete report.
    pub async fn sweep_range(&self, start: u64, end: u64) -> SweepReport {
        let mut report = SweepReport {
            status: SweepStatus::Completed,
            tip: None,
            start,
            end,
            addresses: BTreeSet::new(),
            blocks_scanned: 0,
            missing_blocks: Vec::new(),
            dropped_addresses: 0,
        };
        if start > end {
            return report;
        }

        let total = end - start + 1;
        let chunk_size = self.options.chunk_size as u64;
        tracing::info!(start, end, total, chunk_size, "starting block sweep");

        let mut first = start;
        while first <= end {
            if self.is_cancelled() {
                tracing::info!(next_block = first, "sweep cancelled between chunks");
                report.status = SweepStatus::Cancelled;
                break;
            }

            let last = first.saturating_add(chunk_size - 1).min(end);
            let calls = (first..=last)
                .map(|number| eth_get_block_by_number(number, true))
                .collect();
            let fetch = self.fetch_chunk(calls).await;
            let fell_back = fetch.fell_back;

            let mut missing = 0;
            for (number, block) in (first..=last).zip(fetch.results) {
                match block {
                    Some(block) => {
                        report.dropped_addresses += collect_participants(&block, &mut report.addresses);
                    }
                    None => {
                        missing += 1;
                        report.missing_blocks.push(number);
                    }
                }
            }
            report.blocks_scanned += last - first + 1;

            let progress = ChunkProgress {
                processed: report.blocks_scanned,
                total,
                unique_results: report.addresses.len(),
                missing,
                fell_back,
                first,
                last,
            };
            self.finish_chunk((last - first + 1) as usize, progress).await;

            if last == u64::MAX {
                break;
            }
            first = last + 1;
        }

        tracing::info!(
            scanned = report.blocks_scanned,
            unique = report.addresses.len(),
            missing = report.missing_blocks.len(),
            dropped = report.dropped_addresses,
            "block sweep finished"
        );
        report
    }
}

/// Adds the checksummed `from`/`to` of every transaction in `block`. Returns
/// how many addresses were dropped because they failed normalization.
pub fn collect_participants(block: &Value, into: &mut BTreeSet<String>) -> usize {
    let Some(transactions) = block.get("transactions").and_then(Value::as_array) else {
        return 0;
    };

    let mut dropped = 0;
    for tx in transactions {
        // Hash-only transaction lists carry no participants.
        if !tx.is_object() {
            continue;
        }
        for field in ["from", "to"] {
            let Some(raw) = tx.get(field).and_then(Value::as_str) else {
                continue;
            };
            match to_checksum_address(raw) {
                Some(address) => {
                    into.insert(address);
                }
                None => {
                    tracing::debug!(field, raw, "dropping address that failed normalization");
                    dropped += 1;
                }
            }
        }
    }
    dropped
}
