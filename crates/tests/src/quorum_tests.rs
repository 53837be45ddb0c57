//! Integration tests for quorum resolution.
//!
//! These tests verify that:
//! - The majority value wins once it reaches the quorum
//! - A tier is abandoned as soon as the quorum becomes arithmetically impossible
//! - Field masks let responses that differ only in ignored fields agree
//! - Quorum failures carry every received response

use crate::mock_infrastructure::{create_test_block, descriptor, provider_with, MockBackend};
use fallback_core::{quorum::FieldMaskComparator, FallbackError, QueryOptions};
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;

fn five_backend_tier() -> Vec<fallback_core::BackendDescriptor> {
    ["a1", "b1", "a2", "b2", "a3"].iter().map(|id| descriptor(id, 0, 1, 1000)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_majority_value_wins() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a1", 10, json!("A"))
        .answer_after("b1", 20, json!("B"))
        .answer_after("a2", 30, json!("A"))
        .answer_after("b2", 40, json!("B"))
        .answer_after("a3", 50, json!("A"));
    let provider = provider_with(&mock, five_backend_tier(), |b| b);

    let started = Instant::now();
    let value = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(3))
        .await
        .unwrap();

    assert_eq!(value, json!("A"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(55), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_split_vote_is_unreachable_with_every_record() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a1", 10, json!("A"))
        .answer_after("b1", 20, json!("B"))
        .answer_after("a2", 30, json!("A"))
        .answer_after("b2", 40, json!("B"))
        .answer_after("a3", 50, json!("C"));
    let provider = provider_with(&mock, five_backend_tier(), |b| b);

    let err = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(3))
        .await
        .unwrap_err();

    let FallbackError::QuorumUnreachable { quorum, tiers_tried, records } = err else {
        panic!("expected QuorumUnreachable");
    };
    assert_eq!((quorum, tiers_tried), (3, 1));
    assert_eq!(records.len(), 5);

    // Records come back in arrival order
    let order: Vec<&str> = records.iter().map(|r| &*r.backend_id).collect();
    assert_eq!(order, ["a1", "b1", "a2", "b2", "a3"]);
}

#[tokio::test(start_paused = true)]
async fn test_impossibility_escalates_without_waiting_for_stall_timeout() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("x", 10, json!("X"))
        .answer_after("y", 20, json!("Y"))
        .answer_after("z", 30, json!("Z"))
        .answer_after("w1", 10, json!("W"))
        .answer_after("w2", 10, json!("W"));
    let provider = provider_with(
        &mock,
        vec![
            descriptor("x", 0, 1, 1000),
            descriptor("y", 0, 1, 1000),
            descriptor("z", 0, 1, 1000),
            descriptor("w1", 1, 1, 1000),
            descriptor("w2", 1, 1, 1000),
        ],
        |b| b,
    );

    let started = Instant::now();
    let value = provider
        .query("eth_getBalance", json!(["0xabc", "latest"]), QueryOptions::default().with_quorum(2))
        .await
        .unwrap();

    assert_eq!(value, json!("W"));
    // Three distinct answers make quorum 2 impossible at 30ms; tier 1 answers 10ms later
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(40) && elapsed < Duration::from_millis(45), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_votes_do_not_carry_across_tiers() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("p1", json!("A")).answer("p2", json!("B")).answer("s1", json!("A")).answer("s2", json!("C"));
    let provider = provider_with(
        &mock,
        vec![
            descriptor("p1", 0, 1, 500),
            descriptor("p2", 0, 1, 500),
            descriptor("s1", 1, 1, 500),
            descriptor("s2", 1, 1, 500),
        ],
        |b| b,
    );

    // "A" is seen twice overall but never twice within one tier
    let err = provider
        .query("eth_call", json!([]), QueryOptions::default().with_quorum(2))
        .await
        .unwrap_err();
    assert!(matches!(err, FallbackError::QuorumUnreachable { tiers_tried: 2, .. }));
    assert_eq!(err.records().map(<[_]>::len), Some(4));
}

#[tokio::test(start_paused = true)]
async fn test_field_mask_merges_lagging_timestamps() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 5, create_test_block(100, 1_700_000_000))
        .answer_after("b", 10, create_test_block(100, 1_700_000_003));
    let comparator = FieldMaskComparator::new(HashMap::from([(
        "eth_getBlockByNumber".to_string(),
        vec!["timestamp".to_string()],
    )]));
    let provider = provider_with(
        &mock,
        vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)],
        |b| b.comparator(Arc::new(comparator)),
    );

    let value = provider
        .query("eth_getBlockByNumber", json!(["0x64", false]), QueryOptions::default().with_quorum(2))
        .await
        .unwrap();

    // The bucket's representative is the earliest response
    assert_eq!(value, create_test_block(100, 1_700_000_000));

    // Without a mask for the method the same answers disagree
    let err = provider
        .query("eth_getBlockByHash", json!(["0x64", false]), QueryOptions::default().with_quorum(2))
        .await;
    assert!(matches!(err, Err(FallbackError::QuorumUnreachable { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_object_key_order_does_not_split_votes() {
    let mock = Arc::new(MockBackend::new());
    let a: serde_json::Value = serde_json::from_str(r#"{"status":"0x1","gasUsed":"0x5208"}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str(r#"{"gasUsed":"0x5208","status":"0x1"}"#).unwrap();
    mock.answer("a", a).answer("b", b);
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)], |b| b);

    let value = provider
        .query("eth_getTransactionReceipt", json!(["0x1"]), QueryOptions::default().with_quorum(2))
        .await
        .unwrap();
    assert_eq!(value["status"], json!("0x1"));
}

#[tokio::test(start_paused = true)]
async fn test_event_methods_use_event_quorum() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("a", 10, json!(["log-a"])).answer_after("b", 20, json!(["log-b"]));
    let provider =
        provider_with(&mock, vec![descriptor("a", 0, 1, 500), descriptor("b", 0, 1, 500)], |b| b.quorum(2));

    // Ordinary methods need two matching answers
    let err = provider.query("eth_call", json!([]), QueryOptions::default()).await;
    assert!(matches!(err, Err(FallbackError::QuorumUnreachable { quorum: 2, .. })));

    // Event methods resolve with the event quorum (default 1) on the first answer
    let logs = provider.query("eth_getLogs", json!([{"fromBlock": "0x1"}]), QueryOptions::default()).await;
    assert_eq!(logs.unwrap(), json!(["log-a"]));

    // A per-query quorum override does not apply to event methods
    let logs = provider
        .query("eth_getLogs", json!([{"fromBlock": "0x2"}]), QueryOptions::default().with_quorum(2))
        .await;
    assert!(logs.is_ok());

    let err = provider
        .query(
            "eth_getLogs",
            json!([{"fromBlock": "0x3"}]),
            QueryOptions::default().with_event_quorum(2),
        )
        .await;
    assert!(matches!(err, Err(FallbackError::QuorumUnreachable { quorum: 2, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_third_distinct_value_abandons_tier_before_last_response() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("b1", 10, json!("B"))
        .answer_after("b2", 20, json!("B"))
        .answer_after("c", 30, json!("C"))
        .answer_after("late", 900, json!("B"))
        .answer_after("next-1", 5, json!("D"))
        .answer_after("next-2", 5, json!("D"))
        .answer_after("next-3", 5, json!("D"));
    let provider = provider_with(
        &mock,
        vec![
            descriptor("b1", 0, 1, 1000),
            descriptor("b2", 0, 1, 1000),
            descriptor("c", 0, 1, 1000),
            descriptor("late", 0, 1, 1000),
            descriptor("next-1", 1, 1, 1000),
            descriptor("next-2", 1, 1, 1000),
            descriptor("next-3", 1, 1, 1000),
        ],
        |b| b.quorum(3),
    );

    let started = Instant::now();
    let value = provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();

    assert_eq!(value, json!("D"));
    // Best bucket holds 2 with 1 backend left, so quorum 3 is out of reach at 30ms
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(35) && elapsed < Duration::from_millis(40), "{elapsed:?}");
    assert_eq!(mock.completed_calls(), 6);
}
