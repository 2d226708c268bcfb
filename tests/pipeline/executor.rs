use crate::support::{
    helpers::{fast_config, init_tracing},
    mock_rpc::{MockEthChain, MockRpcServer},
};
use anyhow::Result;
use harvestproof::rpc::payload::eth_block_number;
use harvestproof::rpc::RpcPayload;
use harvestproof::{RpcExecutor, RpcFailure};
use serde_json::json;

#[tokio::test]
async fn rate_limited_request_is_retried_to_success() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(42);
    chain.rate_limit_next(1);
    let server = MockRpcServer::start(chain.clone()).await?;
    let executor = RpcExecutor::from_config(&fast_config(&[server.url()], 4, 10)?)?;

    let tip = executor.call(eth_block_number(), None).await?;

    assert_eq!(tip, Some(json!("0x2a")));
    assert_eq!(chain.http_requests(), 2);
    let metrics = executor.metrics();
    assert_eq!(metrics.rate_limited, 1);
    assert_eq!(metrics.total_successes, 1);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_body_fails_without_retry() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(42);
    chain.malformed_next(1);
    let server = MockRpcServer::start(chain.clone()).await?;
    let executor = RpcExecutor::from_config(&fast_config(&[server.url()], 4, 10)?)?;

    let outcome = executor
        .execute(&RpcPayload::Single(eth_block_number()), None)
        .await;

    assert!(matches!(outcome, Err(RpcFailure::Malformed { .. })));
    assert_eq!(chain.http_requests(), 1);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn attempts_exhaust_against_a_persistent_outage() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(42);
    chain.rate_limit_next(10);
    let server = MockRpcServer::start(chain.clone()).await?;
    let executor = RpcExecutor::from_config(&fast_config(&[server.url()], 4, 10)?)?;

    let outcome = executor.call(eth_block_number(), None).await;

    assert!(matches!(outcome, Err(RpcFailure::RateLimited { .. })));
    assert_eq!(chain.http_requests(), 2);
    assert_eq!(executor.metrics().exhausted, 1);

    executor.close();
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn requests_are_spread_evenly_over_endpoints() -> Result<()> {
    init_tracing();
    let first_chain = MockEthChain::new(1);
    let second_chain = MockEthChain::new(1);
    let first = MockRpcServer::start(first_chain.clone()).await?;
    let second = MockRpcServer::start(second_chain.clone()).await?;
    let executor = RpcExecutor::from_config(&fast_config(&[first.url(), second.url()], 4, 10)?)?;

    for _ in 0..10 {
        executor.call(eth_block_number(), None).await?;
    }

    assert_eq!(first_chain.http_requests(), 5);
    assert_eq!(second_chain.http_requests(), 5);

    executor.close();
    first.shutdown().await;
    second.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn closed_executor_sends_nothing() -> Result<()> {
    init_tracing();
    let chain = MockEthChain::new(1);
    let server = MockRpcServer::start(chain.clone()).await?;
    let executor = RpcExecutor::from_config(&fast_config(&[server.url()], 4, 10)?)?;

    executor.close();
    executor.close();

    let outcome = executor.call(eth_block_number(), None).await;
    assert!(matches!(outcome, Err(RpcFailure::Closed)));
    assert_eq!(chain.http_requests(), 0);

    server.shutdown().await;
    Ok(())
}
