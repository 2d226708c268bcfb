pub mod balances;
pub mod batch;
pub mod cooldown;
pub mod decode;
pub mod progress;
pub mod range;

pub use balances::{normalize_addresses, BalanceSheet, TokenSpec};
pub use batch::{BatchHarvester, ChunkFetch, HarvestOptions};
pub use cooldown::{BatchCooldown, CooldownSnapshot};
pub use decode::{decode_quantity, to_checksum_address, DecodeError};
pub use progress::{ChunkProgress, HarvestObserver, LogObserver};
pub use range::{collect_participants, lookback_start, SweepReport, SweepStatus};
