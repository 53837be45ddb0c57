//! Integration tests for the provider surface: option validation, live
//! reconfiguration, health-aware ordering, polling and background tasks.

use crate::mock_infrastructure::{descriptor, provider_with, MockBackend};
use fallback_core::{
    backend::HealthConfig, cache::CacheConfig, config::QuorumSettings, BackendError, FallbackError,
    FallbackProvider, QueryOptions, RegistryError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    time::{advance, sleep, timeout},
};

#[tokio::test(start_paused = true)]
async fn test_zero_quorum_rejected_before_dispatch() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let err = provider.query("eth_blockNumber", json!([]), QueryOptions::default().with_quorum(0)).await;
    assert!(matches!(err, Err(FallbackError::InvalidOptions(_))));

    let err = provider
        .query("eth_blockNumber", json!([]), QueryOptions::default().with_max_fanout_per_tier(0))
        .await;
    assert!(matches!(err, Err(FallbackError::InvalidOptions(_))));

    assert_eq!(mock.total_calls(), 0);
}

#[test]
fn test_builder_rejects_invalid_backends() {
    let mock = Arc::new(MockBackend::new());
    let result = FallbackProvider::builder()
        .client(mock)
        .backends(vec![descriptor("a", 0, 1, 500), descriptor("a", 1, 1, 500)])
        .build();

    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_keeps_snapshot_of_running_dispatch() {
    let mock = Arc::new(MockBackend::new());
    mock.answer_after("old", 100, json!("old")).answer("new", json!("new"));
    let provider = provider_with(&mock, vec![descriptor("old", 0, 1, 500)], |b| b);
    let opts = QueryOptions::default().with_cache_ttl(Duration::ZERO);

    let running = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.query("eth_blockNumber", json!([]), opts).await })
    };
    sleep(Duration::from_millis(10)).await;

    provider.reconfigure(vec![descriptor("new", 0, 1, 500)]).unwrap();
    assert!(provider.registry().get("old").is_none());

    assert_eq!(running.await.unwrap().unwrap(), json!("old"));
    assert_eq!(mock.calls("new"), 0);

    let value = provider.query("eth_blockNumber", json!([]), opts).await.unwrap();
    assert_eq!(value, json!("new"));
    assert_eq!(mock.calls("old"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_reconfiguration_keeps_current_registry() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);

    let err = provider.reconfigure(vec![descriptor("b", 0, 0, 500)]).unwrap_err();

    assert!(matches!(err, RegistryError::InvalidWeight { .. }));
    assert!(provider.registry().get("a").is_some());
    assert_eq!(provider.query("eth_chainId", json!([]), QueryOptions::default()).await.unwrap(), json!("0x1"));
}

#[tokio::test(start_paused = true)]
async fn test_cooling_down_backend_tried_last() {
    let mock = Arc::new(MockBackend::new());
    mock.always_fail("flaky", BackendError::TransportConnReset("refused".into()))
        .answer("steady", json!("0x1"));
    let provider = provider_with(
        &mock,
        vec![descriptor("flaky", 0, 2, 500), descriptor("steady", 0, 1, 500)],
        |b| b.health(HealthConfig { enabled: true, failure_threshold: 1, cooldown_ms: 30_000 }),
    );
    let opts = QueryOptions::default().with_max_fanout_per_tier(1).with_cache_ttl(Duration::ZERO);

    provider.query("eth_blockNumber", json!([]), opts).await.unwrap();
    assert_eq!(mock.calls("flaky"), 1);
    assert!(provider.backend_health("flaky").cooling_down);

    // The heavier backend is now launched after the healthy one
    provider.query("eth_blockNumber", json!([]), opts).await.unwrap();
    assert_eq!(mock.calls("flaky"), 1);
    assert_eq!(mock.calls("steady"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_watch_publishes_changed_values() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1"));
    let settings = QuorumSettings { polling_interval_ms: 100, ..QuorumSettings::default() };
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b.settings(settings));

    let mut handle =
        provider.watch("eth_blockNumber", json!([]), QueryOptions::default().with_cache_ttl(Duration::ZERO));

    assert_eq!(handle.changed().await.as_deref(), Some(&json!("0x1")));

    // Unchanged rounds publish nothing
    let quiet = timeout(Duration::from_millis(350), handle.changed()).await;
    assert!(quiet.is_err());
    assert!(mock.total_calls() >= 3);

    mock.answer("a", json!("0x2"));
    assert_eq!(handle.changed().await.as_deref(), Some(&json!("0x2")));
    assert_eq!(handle.latest().as_deref(), Some(&json!("0x2")));

    handle.stop();
    assert!(handle.is_stopped());
    let calls = mock.total_calls();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_watch_handle_stops_polling() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1"));
    let settings = QuorumSettings { polling_interval_ms: 100, cache_timeout_ms: 0, ..QuorumSettings::default() };
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b.settings(settings));

    let mut handle = provider.watch("eth_blockNumber", json!([]), QueryOptions::default());
    handle.changed().await;
    drop(handle);

    let calls = mock.total_calls();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_evicts_and_stops() {
    let mock = Arc::new(MockBackend::new());
    mock.answer("a", json!("0x1"));
    let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| {
        b.cache(CacheConfig { sweep_interval_ms: 100 })
    });
    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = provider.start_background_tasks(&shutdown_tx);

    provider.query("eth_blockNumber", json!([]), QueryOptions::default()).await.unwrap();
    assert_eq!(provider.cache_stats().entries, 1);

    advance(Duration::from_millis(300)).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.cache_stats().entries, 0);
    assert!(provider.cache_stats().evictions >= 1);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}
