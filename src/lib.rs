pub mod commit;
pub mod delivery;
pub mod harvest;
pub mod rpc;
pub mod runtime;

pub use commit::{
    verify_proof, write_commitment, CommitError, InclusionProof, MerkleTree, Record, Verification,
};
pub use delivery::{verify_signature, DeliveryArtifacts, DeliveryError, DeliverySigner, KeySource};
pub use harvest::{
    BalanceSheet, BatchHarvester, HarvestObserver, HarvestOptions, SweepReport, SweepStatus,
    TokenSpec,
};
pub use rpc::{EndpointPool, RpcClientOptions, RpcExecutor, RpcFailure, RpcResponse, RetryPolicy};
pub use runtime::config::{HarvestConfig, HarvestConfigBuilder, HarvestConfigParams};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
