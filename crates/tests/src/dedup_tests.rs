//! Integration tests for request deduplication.
//!
//! Concurrent identical requests must share one dispatch and observe the same
//! outcome, including failures. A caller giving up must not cancel the shared work.

use crate::mock_infrastructure::{descriptor, provider_with, MockBackend};
use fallback_core::{BackendError, FallbackError, QueryOptions};
use futures::future::join_all;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_identical_concurrent_queries_share_one_dispatch() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!({"number": "0x10"}));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let results = join_all((0..20).map(|_| {
        provider.query("eth_getBlockByNumber", json!(["0x10", false]), QueryOptions::default())
    }))
    .await;

    assert_eq!(mock.total_calls(), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!({"number": "0x10"}));
    }
    assert!(provider.inflight_snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_key_order_in_params_shares_dispatch() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!("0x0"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let first: serde_json::Value = serde_json::from_str(r#"[{"to":"0x2","data":"0x"},"latest"]"#).unwrap();
    let second: serde_json::Value = serde_json::from_str(r#"[{"data":"0x","to":"0x2"},"latest"]"#).unwrap();

    let (a, b) = tokio::join!(
        provider.query("eth_call", first, QueryOptions::default()),
        provider.query("eth_call", second, QueryOptions::default()),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(mock.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_shared_by_every_waiter() {
    let mock = Arc::new(MockBackend::new());
    mock.always_fail("a", BackendError::Rpc { code: -32000, message: "execution reverted".into() });
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let results =
        join_all((0..5).map(|_| provider.query("eth_call", json!([]), QueryOptions::default()))).await;

    assert_eq!(mock.total_calls(), 1);
    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, FallbackError::QuorumUnreachable { .. }));
        assert_eq!(err.records().map(<[_]>::len), Some(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_different_params_are_dispatched_separately() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!("0x1"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let (a, b) = tokio::join!(
        provider.query("eth_getBalance", json!(["0xaaa", "latest"]), QueryOptions::default()),
        provider.query("eth_getBalance", json!(["0xbbb", "latest"]), QueryOptions::default()),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(mock.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_caller_does_not_cancel_shared_dispatch() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!("0x5"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let leader = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_cache_ttl(Duration::ZERO)).await
        })
    };
    sleep(Duration::from_millis(5)).await;
    leader.abort();

    let snapshot = provider.inflight_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].fingerprint.method(), "eth_blockNumber");

    let value = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_cache_ttl(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(value, json!("0x5"));
    assert_eq!(mock.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_queries_without_cache_dispatch_again() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!("0x5"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);
    let opts = QueryOptions::default().with_cache_ttl(Duration::ZERO);

    provider.query("eth_blockNumber", json!([]), opts).await.unwrap();
    provider.query("eth_blockNumber", json!([]), opts).await.unwrap();

    assert_eq!(mock.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_with_different_quorums_dispatch_separately() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 5, json!("0xA")).answer_after("b", 10, json!("0xB"));
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)], |b| b);
    let opts = QueryOptions::default().with_cache_ttl(Duration::ZERO);

    let (weak, strong) = tokio::join!(
        provider.query("eth_blockNumber", json!([]), opts.with_quorum(1)),
        provider.query("eth_blockNumber", json!([]), opts.with_quorum(2)),
    );

    assert_eq!(weak.unwrap(), json!("0xA"));
    assert!(matches!(strong, Err(FallbackError::QuorumUnreachable { quorum: 2, .. })));
    assert_eq!(mock.calls("a"), 2);
    assert!(provider.inflight_snapshot().is_empty());
}
