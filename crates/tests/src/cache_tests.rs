//! Integration tests for result memoization.

use crate::mock_infrastructure::{descriptor, provider_with, MockBackend};
use fallback_core::{BackendError, FallbackError, QueryOptions};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::{advance, sleep};

#[tokio::test(start_paused = true)]
async fn test_result_served_from_cache_until_expiry() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!("0x100"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    // Default TTL is 250ms
    let first = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    let second = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(mock.total_calls(), 1);
    assert_eq!(provider.cache_stats().hits, 1);

    advance(Duration::from_millis(200)).await;
    provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();
    assert_eq!(mock.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_bypasses_cache() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x100"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);
    let opts = QueryOptions::default().with_cache_ttl(Duration::ZERO);

    for _ in 0..3 {
        provider.query("eth_blockNumber", json!([]), opts).await.unwrap();
    }

    assert_eq!(mock.total_calls(), 3);
    assert_eq!(provider.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_per_query_ttl_override() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x100"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);
    let opts = QueryOptions::default().with_cache_ttl(Duration::from_secs(5));

    provider.query("eth_chainId", json!([]), opts).await.unwrap();
    advance(Duration::from_secs(4)).await;
    provider.query("eth_chainId", json!([]), opts).await.unwrap();
    assert_eq!(mock.total_calls(), 1);

    advance(Duration::from_secs(2)).await;
    provider.query("eth_chainId", json!([]), opts).await.unwrap();
    assert_eq!(mock.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    let mock = Arc::new(MockBackend::new());
    mock.always_fail("a", BackendError::TransportConnReset("connection refused".into()));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    assert!(provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.is_err());
    assert!(provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.is_err());

    assert_eq!(mock.total_calls(), 2);
    assert_eq!(provider.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stronger_cached_result_serves_weaker_quorum() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1")).answer("b", json!("0x1"));
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)], |b| b);

    provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(2)).await.unwrap();
    let calls = mock.total_calls();
    provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(1)).await.unwrap();

    assert_eq!(mock.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_weaker_cached_result_not_served_to_stronger_quorum() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 5, json!("0xA")).answer_after("b", 10, json!("0xB"));
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)], |b| b);

    let weak = provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(1)).await;
    assert_eq!(weak.unwrap(), json!("0xA"));
    assert_eq!(provider.cache_stats().entries, 1);

    // The backends disagree, so two matching answers are impossible
    let strong = provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(2)).await;
    assert!(matches!(strong, Err(FallbackError::QuorumUnreachable { quorum: 2, .. })));
    assert_eq!(mock.calls("a"), 2);

    // The weaker entry is still served at its own quorum
    let calls = mock.total_calls();
    let weak = provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(1)).await;
    assert_eq!(weak.unwrap(), json!("0xA"));
    assert_eq!(mock.total_calls(), calls);
}
