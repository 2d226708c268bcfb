use crate::harvest::batch::BatchHarvester;
use crate::harvest::decode::{decode_quantity, to_checksum_address};
use crate::harvest::progress::ChunkProgress;
use crate::rpc::payload::{erc20_balance_of, eth_get_balance, RpcCall};
use primitive_types::U256;
use std::collections::{BTreeMap, BTreeSet};

/// A token to price holders in. `contract: None` stands for a token that has
/// no deployment on this chain; every holder then reports zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub symbol: String,
    pub contract: Option<String>,
}

impl TokenSpec {
    pub fn new(symbol: impl Into<String>, contract: Option<String>) -> Self {
        Self {
            symbol: symbol.into(),
            contract,
        }
    }
}

/// Balances keyed by checksummed address. Every requested address that
/// survived normalization has an entry; entries that could not be fetched
/// are zero and listed in `missing`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    pub balances: BTreeMap<String, U256>,
    pub missing: Vec<String>,
    /// Inputs that failed checksum normalization.
    pub dropped: usize,
}

impl BalanceSheet {
    pub fn get(&self, address: &str) -> U256 {
        to_checksum_address(address)
            .and_then(|key| self.balances.get(&key).copied())
            .unwrap_or_default()
    }

    pub fn total(&self) -> U256 {
        self.balances
            .values()
            .fold(U256::zero(), |acc, value| acc.saturating_add(*value))
    }
}

/// Checksums and de-duplicates `addresses`, keeping first-seen order.
/// Returns the survivors and how many inputs were dropped.
pub fn normalize_addresses<S: AsRef<str>>(addresses: &[S]) -> (Vec<String>, usize) {
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(addresses.len());
    let mut dropped = 0;

    for raw in addresses {
        match to_checksum_address(raw.as_ref()) {
            Some(address) => {
                if seen.insert(address.clone()) {
                    kept.push(address);
                }
            }
            None => {
                tracing::debug!(raw = raw.as_ref(), "dropping address that failed normalization");
                dropped += 1;
            }
        }
    }
    (kept, dropped)
}

impl BatchHarvester {
    /// Native balances (`eth_getBalance` at `latest`).
    pub async fn native_balances<S: AsRef<str>>(&self, addresses: &[S]) -> BalanceSheet {
        self.balances_with(addresses, "native", eth_get_balance).await
    }

    /// ERC-20 `balanceOf` for every holder, in raw token units.
    pub async fn token_balances<S: AsRef<str>>(
        &self,
        addresses: &[S],
        token: &TokenSpec,
    ) -> BalanceSheet {
        match token.contract.as_deref() {
            Some(contract) => {
                self.balances_with(addresses, &token.symbol, |holder| {
                    erc20_balance_of(contract, holder)
                })
                .await
            }
            None => {
                let (holders, dropped) = normalize_addresses(addresses);
                tracing::info!(
                    token = %token.symbol,
                    holders = holders.len(),
                    "token has no contract on this chain; reporting zero balances"
                );
                BalanceSheet {
                    balances: holders.into_iter().map(|h| (h, U256::zero())).collect(),
                    missing: Vec::new(),
                    dropped,
                }
            }
        }
    }

    async fn balances_with<S, F>(&self, addresses: &[S], label: &str, build: F) -> BalanceSheet
    where
        S: AsRef<str>,
        F: Fn(&str) -> RpcCall,
    {
        let (holders, dropped) = normalize_addresses(addresses);
        let mut sheet = BalanceSheet {
            balances: BTreeMap::new(),
            missing: Vec::new(),
            dropped,
        };
        let total = holders.len() as u64;
        tracing::info!(asset = label, holders = total, dropped, "fetching balances");

        for (chunk_index, chunk) in holders.chunks(self.options.chunk_size).enumerate() {
            if self.is_cancelled() {
                tracing::info!(asset = label, "balance fetch cancelled between chunks");
                break;
            }

            let first = (chunk_index * self.options.chunk_size) as u64;
            let calls = chunk.iter().map(|holder| build(holder.as_str())).collect();
            let fetch = self.fetch_chunk(calls).await;
            let fell_back = fetch.fell_back;

            let mut missing = 0;
            for (holder, result) in chunk.iter().zip(fetch.results) {
                let value = match result {
                    Some(raw) => decode_quantity(Some(&raw)).unwrap_or_else(|err| {
                        tracing::warn!(asset = label, holder = %holder, error = %err, "undecodable balance; using zero");
                        U256::zero()
                    }),
                    None => {
                        missing += 1;
                        sheet.missing.push(holder.clone());
                        U256::zero()
                    }
                };
                sheet.balances.insert(holder.clone(), value);
            }

            let progress = ChunkProgress {
                processed: first + chunk.len() as u64,
                total,
                unique_results: sheet.balances.len(),
                missing,
                fell_back,
                first,
                last: first + chunk.len() as u64 - 1,
            };
            self.finish_chunk(chunk.len(), progress).await;
        }

        // Holders never reached (cancellation) still read as zero.
        for holder in holders {
            sheet.balances.entry(holder).or_insert_with(U256::zero);
        }
        sheet
    }
}
