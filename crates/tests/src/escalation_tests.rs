//! Integration tests for tier escalation.
//!
//! These tests verify that:
//! - A silent tier is abandoned after its stall budget and the next tier takes over
//! - Tiers that cannot hold the quorum are skipped without calling any backend
//! - Fan-out inside a tier never exceeds the configured width
//! - Heavier backends are launched first

use crate::mock_infrastructure::{descriptor, provider_with, MockBackend};
use fallback_core::{BackendError, FallbackError, QueryOptions};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_silent_tier_escalates_after_stall_timeout() {
    let mock = Arc::new(MockBackend::new());
    mock.hang("primary").answer_after("fallback", 10, json!("0x10"));
    let provider = provider_with(
        &mock,
        vec![descriptor("primary", 0, 1, 200), descriptor("fallback", 1, 1, 200)],
        |b| b,
    );

    let started = Instant::now();
    let value = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(value, json!("0x10"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(210) && elapsed < Duration::from_millis(215), "{elapsed:?}");
    assert_eq!(mock.calls("primary"), 1);
    assert_eq!(mock.calls("fallback"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lower_tier_not_called_when_first_tier_resolves() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("primary", json!("0x1")).answer("fallback", json!("0x2"));
    let provider = provider_with(
        &mock,
        vec![descriptor("primary", 0, 1, 200), descriptor("fallback", 1, 1, 200)],
        |b| b,
    );

    let value = provider.query("eth_chainId", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(value, json!("0x1"));
    assert_eq!(mock.calls("fallback"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tier_smaller_than_quorum_is_skipped() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("solo", json!("0x1")).answer("pair-a", json!("0x1")).answer("pair-b", json!("0x1"));
    let provider = provider_with(
        &mock,
        vec![
            descriptor("solo", 0, 1, 200),
            descriptor("pair-a", 1, 1, 200),
            descriptor("pair-b", 1, 1, 200),
        ],
        |b| b.quorum(2),
    );

    let value = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(value, json!("0x1"));
    assert_eq!(mock.calls("solo"), 0);
    assert_eq!(mock.calls("pair-a"), 1);
    assert_eq!(mock.calls("pair-b"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_tier_too_small_fails_without_calls() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1")).answer("b", json!("0x1"));
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 200), descriptor("b", 1, 1, 200)], |b| b);

    let err = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(2))
        .await
        .unwrap_err();

    assert!(matches!(err, FallbackError::QuorumUnreachable { quorum: 2, tiers_tried: 2, .. }));
    assert_eq!(err.records().map(<[_]>::len), Some(0));
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fanout_limits_concurrent_calls() {
    let mock = Arc::new(MockBackend::new());
    for id in ["a", "b", "c", "d"] {
        mock.answer_after(id, 10, json!("0xff"));
    }
    let provider = provider_with(
        &mock,
        ["a", "b", "c", "d"].iter().map(|id| descriptor(id, 0, 1, 1000)).collect(),
        |b| b,
    );

    let started = Instant::now();
    let value = provider
        .query(
            "eth_getBalance",
            json!(["0x1", "latest"]),
            QueryOptions::default().with_quorum(4).with_max_fanout_per_tier(2),
        )
        .await
        .unwrap();

    assert_eq!(value, json!("0xff"));
    assert_eq!(mock.total_calls(), 4);
    assert_eq!(mock.max_concurrent_calls(), 2);
    // Two waves of 10ms each
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(20) && elapsed < Duration::from_millis(25), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_heaviest_backend_launched_first() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("light", json!("light")).answer("heavy", json!("heavy"));
    let provider = provider_with(
        &mock,
        vec![descriptor("light", 0, 1, 200), descriptor("heavy", 0, 5, 200)],
        |b| b,
    );

    let value = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_max_fanout_per_tier(1))
        .await
        .unwrap();

    assert_eq!(value, json!("heavy"));
    assert_eq!(mock.calls("light"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_backend_launched_when_earlier_call_fails() {
    let mock = Arc::new(MockBackend::new());
    mock.always_fail("heavy", BackendError::MethodNotSupported("eth_foo".into()))
        .answer("light", json!("0x1"));
    let provider = provider_with(
        &mock,
        vec![descriptor("heavy", 0, 5, 200), descriptor("light", 0, 1, 200)],
        |b| b,
    );

    let value = provider
        .query("eth_foo", json!([]), QueryOptions::default().with_max_fanout_per_tier(1))
        .await
        .unwrap();

    assert_eq!(value, json!("0x1"));
    assert_eq!(mock.calls("heavy"), 1);
    assert_eq!(mock.calls("light"), 1);
    assert_eq!(mock.max_concurrent_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_tier_costs_one_stall_timeout() {
    let mock = Arc::new(MockBackend::new());
    mock.hang("down-1").hang("down-2");
    for id in ["up-1", "up-2", "up-3"] {
        mock.answer_after(id, 10, json!("0xabc"));
    }
    let provider = provider_with(
        &mock,
        vec![
            descriptor("down-1", 0, 1, 300),
            descriptor("down-2", 0, 1, 300),
            descriptor("up-1", 1, 1, 300),
            descriptor("up-2", 1, 1, 300),
            descriptor("up-3", 1, 1, 300),
        ],
        |b| b.quorum(2),
    );

    let started = Instant::now();
    let value = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(value, json!("0xabc"));
    // Both silent backends run concurrently, so tier 0 costs a single stall timeout
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(310) && elapsed < Duration::from_millis(315), "{elapsed:?}");
}
