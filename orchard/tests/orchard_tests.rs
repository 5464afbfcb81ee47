//! Integration tests for the cache orchestrator
//!
//! These tests run against `MemoryStore` and cover:
//! - Read-through priming and hits
//! - Herd protection under concurrent misses
//! - Expirations
//! - Disconnected stores and fail-through
//! - Hit/miss and lifecycle events

use orchard::cache::CacheOptions;
use orchard::{
    CacheEvent, KeySpec, MemoryStore, Orchard, OrchardConfig, OrchardError, StoreOp, ValueSpec,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn build_orchard(store: &Arc<MemoryStore>, config: OrchardConfig) -> Orchard {
    Orchard::new(store.clone(), config).expect("orchard")
}

fn counting(calls: &Arc<AtomicUsize>, value: serde_json::Value) -> ValueSpec {
    let calls = Arc::clone(calls);
    ValueSpec::from_async(move |_key| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, String>(value)
    })
}

async fn wait_for_connectivity(orchard: &Orchard, connected: bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while orchard.is_connected() != connected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connectivity did not change");
}

#[tokio::test]
async fn test_kaiju_primed_once_and_stored() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());

    let kaiju = orchard
        .cache(
            "kaiju",
            ValueSpec::from_async(|_key| async { Ok::<_, String>(vec!["Godzilla", "Mothra"]) }),
        )
        .await?;
    assert_eq!(kaiju, json!(["Godzilla", "Mothra"]));
    assert_eq!(store.peek("kaiju").await.as_deref(), Some(r#"["Godzilla","Mothra"]"#));

    let calls = Arc::new(AtomicUsize::new(0));
    let again = orchard.cache("kaiju", counting(&calls, json!(["Gamera"]))).await?;
    assert_eq!(again, json!(["Godzilla", "Mothra"]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_misses_invoke_producer_once() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let requests = (0..10).map(|_| orchard.cache("kaiju", counting(&calls, json!("Rodan"))));
    let results = futures::future::join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!("Rodan"));
    }
    assert_eq!(store.counts().set, 1);

    let stats = orchard.stats().await;
    assert_eq!(stats.primes, 1);
    assert_eq!(stats.primes + stats.coalesced + stats.hits, 10);
    assert_eq!(orchard.pending().await, 0);
}

#[tokio::test]
async fn test_del_then_reprime() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());

    assert_ok!(orchard.cache("kaiju", "Godzilla").await);
    assert_eq!(assert_ok!(orchard.del("kaiju").await), 1);
    assert_eq!(assert_ok!(orchard.del("kaiju").await), 0);
    assert_eq!(
        assert_ok!(orchard.cache("kaiju", "Mothra").await),
        json!("Mothra")
    );
    assert_eq!(orchard.stats().await.evicted, 1);
}

#[tokio::test]
async fn test_composite_and_object_keys() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());

    orchard.cache(json!(["t", 3]), 1i64).await.unwrap();
    orchard.cache(json!({ "t": 3 }), 2i64).await.unwrap();
    orchard
        .cache(KeySpec::producer(|| KeySpec::future(async { Ok::<_, String>("lazy") })), 3i64)
        .await
        .unwrap();

    assert_eq!(store.keys().await, vec!["lazy", "t:3", r#"{"t":3}"#]);
}

#[tokio::test]
async fn test_prefix_and_key_hash() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .prefix("monsters")
        .key_hash(|raw| format!("h{}", raw.len()))
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);

    orchard.cache("kaiju", "Godzilla").await.unwrap();
    assert_eq!(store.keys().await, vec!["monsters:h5"]);

    // del hashes exact keys the same way cache does
    assert_eq!(orchard.del("kaiju").await.unwrap(), 1);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_default_and_request_ttl() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .ttl(Duration::from_secs(60))
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);

    orchard.cache("kaiju", "Godzilla").await.unwrap();
    let ttl = store.ttl("kaiju").await.unwrap();
    assert!(ttl > Duration::from_secs(58) && ttl <= Duration::from_secs(60));

    orchard
        .cache_with("mothra", "Mothra", CacheOptions::with_ttl(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(store.ttl("mothra").await.unwrap() <= Duration::from_secs(5));

    // under one second: stored without expiry
    orchard
        .cache_with("rodan", "Rodan", CacheOptions::with_ttl(Duration::from_millis(500)))
        .await
        .unwrap();
    assert_eq!(store.ttl("rodan").await, None);
    assert_eq!(store.counts().expire, 2);
}

#[tokio::test]
async fn test_disconnected_store_never_written() {
    let store = Arc::new(MemoryStore::disconnected());
    let orchard = build_orchard(&store, OrchardConfig::default());
    assert!(!orchard.is_connected());

    let value = orchard
        .cache_with("kaiju", "Godzilla", CacheOptions::force_update())
        .await
        .unwrap();
    assert_eq!(value, json!("Godzilla"));

    let counts = store.counts();
    assert_eq!(counts.get, 0);
    assert_eq!(counts.set, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_connectivity_follows_store_signals() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());
    let mut events = orchard.subscribe();

    store.disconnect();
    wait_for_connectivity(&orchard, false).await;
    assert_eq!(events.recv().await.unwrap(), CacheEvent::StoreDisconnected);

    orchard.cache("kaiju", "Godzilla").await.unwrap();
    assert_eq!(store.counts().set, 0);

    store.reconnect();
    wait_for_connectivity(&orchard, true).await;

    orchard.cache("kaiju", "Mothra").await.unwrap();
    assert_eq!(store.peek("kaiju").await.as_deref(), Some("\"Mothra\""));
}

#[tokio::test]
async fn test_store_failure_propagates_by_default() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());
    store.set_failing(true);

    let err = assert_err!(orchard.cache("kaiju", "Godzilla").await);
    assert!(matches!(err, OrchardError::Store(_)));

    let err = assert_err!(
        orchard
            .cache_with("kaiju", "Godzilla", CacheOptions::force_update())
            .await
    );
    assert!(err.is_store_error());
    assert_eq!(orchard.stats().await.store_errors, 2);
}

#[tokio::test]
async fn test_failthrough_serves_primed_values() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .allow_failthrough(true)
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);
    store.set_failing(true);

    // read path
    assert_eq!(
        orchard.cache("kaiju", "Godzilla").await.unwrap(),
        json!("Godzilla")
    );
    // write path
    assert_eq!(
        orchard
            .cache_with("kaiju", "Mothra", CacheOptions::force_update())
            .await
            .unwrap(),
        json!("Mothra")
    );
    assert_eq!(orchard.del("kaiju").await.unwrap(), 0);

    let stats = orchard.stats().await;
    assert_eq!(stats.failthroughs, 3);
    assert_eq!(stats.store_errors, 3);

    store.set_failing(false);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_priming_failure_is_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());

    let failing = ValueSpec::from_fn(|_: &str| Err::<String, _>("no monsters today"));
    let err = orchard.cache("kaiju", failing).await.unwrap_err();
    assert!(matches!(err, OrchardError::Priming { ref key, .. } if key == "kaiju"));
    assert!(store.is_empty().await);

    assert_eq!(orchard.cache("kaiju", "Godzilla").await.unwrap(), json!("Godzilla"));
}

#[tokio::test]
async fn test_corrupt_record() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw("kaiju", "{not json").await;

    let strict = build_orchard(&store, OrchardConfig::default());
    assert!(matches!(
        strict.cache("kaiju", "Godzilla").await,
        Err(OrchardError::Serialization(_))
    ));

    let lenient = build_orchard(
        &store,
        OrchardConfig::builder().allow_failthrough(true).build().unwrap(),
    );
    assert_eq!(lenient.cache("kaiju", "Godzilla").await.unwrap(), json!("Godzilla"));
    assert_eq!(store.peek("kaiju").await.as_deref(), Some("\"Godzilla\""));
    assert_eq!(store.counts().set, 1);

    // the replaced record now serves hits
    assert_eq!(strict.cache("kaiju", "Mothra").await.unwrap(), json!("Godzilla"));
}

#[tokio::test]
async fn test_unreadable_store_is_not_written_under_failthrough() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .allow_failthrough(true)
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);
    store.fail_op(StoreOp::Get);

    assert_eq!(orchard.cache("kaiju", "Godzilla").await.unwrap(), json!("Godzilla"));
    assert_eq!(store.counts().set, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_abandoned_primer_still_persists() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = {
        let calls = Arc::clone(&calls);
        ValueSpec::from_async(move |_key| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>("Godzilla")
        })
    };
    let abandoned =
        tokio::time::timeout(Duration::from_millis(5), orchard.cache("kaiju", slow)).await;
    assert!(abandoned.is_err());

    // joins the abandoned resolution and drives it, write included
    let joined = orchard.cache("kaiju", counting(&calls, json!("Mothra"))).await.unwrap();
    assert_eq!(joined, json!("Godzilla"));
    assert_eq!(store.peek("kaiju").await.as_deref(), Some("\"Godzilla\""));
    assert_eq!(store.counts().set, 1);

    let hit = orchard.cache("kaiju", counting(&calls, json!("Mothra"))).await.unwrap();
    assert_eq!(hit, json!("Godzilla"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchard.stats().await.hits, 1);
}

#[tokio::test]
async fn test_expire_failure_propagates_by_default() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .ttl(Duration::from_secs(60))
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);
    store.fail_op(StoreOp::Expire);

    let err = assert_err!(orchard.cache("kaiju", "Godzilla").await);
    assert!(matches!(err, OrchardError::Store(_)));

    let counts = store.counts();
    assert_eq!(counts.set, 1);
    assert_eq!(counts.expire, 1);

    let stats = orchard.stats().await;
    assert_eq!(stats.store_errors, 1);
    assert_eq!(stats.failthroughs, 0);
}

#[tokio::test]
async fn test_expire_failure_counted_under_failthrough() {
    let store = Arc::new(MemoryStore::new());
    let config = OrchardConfig::builder()
        .ttl(Duration::from_secs(60))
        .allow_failthrough(true)
        .build()
        .unwrap();
    let orchard = build_orchard(&store, config);
    store.fail_op(StoreOp::Expire);

    assert_eq!(
        assert_ok!(orchard.cache("kaiju", "Godzilla").await),
        json!("Godzilla")
    );
    assert_eq!(store.counts().expire, 1);

    let stats = orchard.stats().await;
    assert_eq!(stats.store_errors, 1);
    assert_eq!(stats.failthroughs, 1);
}

#[tokio::test]
async fn test_hit_and_miss_events() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());
    let mut events = orchard.subscribe();

    orchard.cache("kaiju", "Godzilla").await.unwrap();
    orchard.cache("kaiju", "Godzilla").await.unwrap();

    let miss = events.recv().await.unwrap();
    let hit = events.recv().await.unwrap();
    assert_eq!(miss.name(), "cache:miss");
    assert_eq!(hit.name(), "cache:hit");
    assert_eq!(miss.key(), Some("kaiju"));
    assert_eq!(hit.key(), Some("kaiju"));

    match (miss, hit) {
        (CacheEvent::Miss { request_id: a, .. }, CacheEvent::Hit { request_id: b, .. }) => {
            assert_ne!(a, b)
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_key_propagates() {
    let store = Arc::new(MemoryStore::new());
    let orchard = build_orchard(&store, OrchardConfig::default());

    let err = orchard
        .cache(KeySpec::future(async { Err::<String, _>("lookup failed") }), "x")
        .await
        .unwrap_err();
    assert_eq!(err, OrchardError::InvalidKey("lookup failed".to_string()));
    assert_eq!(store.counts().get, 0);
}
