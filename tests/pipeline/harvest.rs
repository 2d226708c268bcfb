use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::support::{
    helpers::{fast_config, init_tracing},
    mock_rpc::{address, MockEthChain, MockRpcServer},
};
use anyhow::Result;
use harvestproof::harvest::{to_checksum_address, ChunkProgress};
use harvestproof::{BatchHarvester, RpcExecutor, SweepStatus, TokenSpec};
use primitive_types::U256;

fn checksummed(index: u64) -> String {
    to_checksum_address(&address(index)).expect("mock addresses are valid")
}

async fn harvester_for(server: &MockRpcServer, chunk: usize, lookback: u64) -> Result<(BatchHarvester, RpcExecutor)> {
    let config = fast_config(&[server.url()], chunk, lookback)?;
    let executor = RpcExecutor::from_config(&config)?;
    let harvester = BatchHarvester::from_config(executor.clone(), &config)?;
    Ok((harvester, executor))
}

#[tokio::test]
async fn sweep_collects_participants_from_recent_blocks() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(20);
    let server = MockRpcServer::start(chain.clone()).await?;
    let (harvester, executor) = harvester_for(&server, 4, 10).await?;

    let seen = Arc::new(Mutex::new(Vec::<ChunkProgress>::new()));
    let recorder = seen.clone();
    let harvester = harvester.with_observer(Arc::new(move |progress: &ChunkProgress| {
        recorder.lock().unwrap().push(*progress);
    }));

    let report = harvester.sweep_recent(10).await;

    assert_eq!(report.status, SweepStatus::Completed);
    assert_eq!(report.tip, Some(20));
    assert_eq!((report.start, report.end), (10, 20));
    assert_eq!(report.blocks_scanned, 11);
    assert!(report.missing_blocks.is_empty());
    let expected: BTreeSet<String> = (10..=21).map(checksummed).collect();
    assert_eq!(report.addresses, expected);

    assert_eq!(chain.batch_requests(), 3);
    assert_eq!(chain.single_requests(), 1);

    let progress = seen.lock().unwrap().clone();
    assert_eq!(progress.len(), 3);
    assert_eq!(progress.last().map(|p| (p.processed, p.total)), Some((11, 11)));
    assert!(progress.iter().all(|p| !p.fell_back));

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_batches_fall_back_to_one_request_per_block() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(20);
    chain.fail_batches(true);
    chain.drop_block(12);
    let server = MockRpcServer::start(chain.clone()).await?;
    let (harvester, executor) = harvester_for(&server, 4, 10).await?;

    let report = harvester.sweep_recent(10).await;

    // The dropped block is reported missing; the sweep still completes.
    assert_eq!(report.status, SweepStatus::Completed);
    assert_eq!(report.missing_blocks, vec![12]);
    assert_eq!(report.addresses.len(), 12);

    // 3 chunks x 2 batch re-issues x 2 executor attempts.
    assert_eq!(chain.batch_requests(), 12);
    // Tip lookup, one request per present block, three for the missing one.
    assert_eq!(chain.single_requests(), 1 + 10 + 3);

    let telemetry = harvester.telemetry().snapshot();
    assert_eq!(telemetry.batch_failures, 3);
    assert_eq!(telemetry.fallback_requests, 11);
    assert_eq!(telemetry.items_missing, 1);
    assert_eq!(telemetry.cooldowns, 1);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unresolved_tip_ends_the_run_with_an_empty_report() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::without_tip();
    let server = MockRpcServer::start(chain.clone()).await?;
    let (harvester, executor) = harvester_for(&server, 4, 10).await?;

    let report = harvester.sweep_recent(10).await;

    match &report.status {
        SweepStatus::TipUnresolved { last_error } => assert!(last_error.contains("header not found")),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(report.addresses.is_empty());
    assert_eq!(chain.batch_requests(), 0);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn native_balances_default_missing_entries_to_zero() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(1);
    chain.set_balance(&address(1), "0xde0b6b3a7640000");
    chain.set_balance(&address(2), "0x1");
    chain.fail_address(&address(3));
    let server = MockRpcServer::start(chain.clone()).await?;
    let (harvester, executor) = harvester_for(&server, 10, 10).await?;

    let inputs = vec![
        address(1),
        address(2),
        address(3),
        "bogus".to_string(),
        address(1).to_ascii_uppercase(),
    ];
    let sheet = harvester.native_balances(&inputs).await;

    assert_eq!(sheet.balances.len(), 3);
    assert_eq!(sheet.dropped, 1);
    assert_eq!(sheet.get(&address(1)), U256::from(1_000_000_000_000_000_000u64));
    assert_eq!(sheet.get(&address(2)), U256::one());
    assert_eq!(sheet.get(&address(3)), U256::zero());
    assert_eq!(sheet.missing, vec![checksummed(3)]);
    assert_eq!(chain.batch_requests(), 1);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn token_balances_survive_batch_outage() -> Result<()> {
    init_tracing();
    let token = "0x00000000000000000000000000000000000000aa";
    let chain = MockEthChain::new(1);
    chain.set_token_balance(token, &address(1), 5_000_000);
    chain.fail_batches(true);
    let server = MockRpcServer::start(chain.clone()).await?;
    let (harvester, executor) = harvester_for(&server, 10, 10).await?;

    let sheet = harvester
        .token_balances(
            &[address(1), address(2)],
            &TokenSpec::new("USDC", Some(token.to_string())),
        )
        .await;

    assert_eq!(sheet.get(&address(1)), U256::from(5_000_000u64));
    assert_eq!(sheet.get(&address(2)), U256::zero());
    assert!(sheet.missing.is_empty());
    assert_eq!(chain.single_requests(), 2);

    executor.close();
    server.shutdown().await;
    Ok(())
}
