//! Integration tests for exact and pattern eviction

use orchard::{MemoryStore, Orchard, OrchardConfig, OrchardError};
use std::sync::Arc;

async fn seeded(keys: &[&str], config: OrchardConfig) -> (Orchard, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for key in keys {
        store.insert_raw(*key, "\"x\"").await;
    }
    let orchard = Orchard::new(store.clone(), config).expect("orchard");
    (orchard, store)
}

fn scan_count(count: usize) -> OrchardConfig {
    OrchardConfig::builder().scan_count(count).build().unwrap()
}

#[tokio::test]
async fn test_pattern_spans_multiple_scans() {
    let (orchard, store) = seeded(&["kaiju:a", "kaiju:b"], scan_count(1)).await;

    assert_eq!(orchard.del("kaiju:*").await.unwrap(), 2);
    assert!(store.counts().scan >= 2);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_pattern_over_many_keys() {
    let keys: Vec<String> = (0..50).map(|i| format!("kaiju:{:02}", i)).collect();
    let mut all: Vec<&str> = keys.iter().map(String::as_str).collect();
    all.push("robots:jaeger");

    let (orchard, store) = seeded(&all, scan_count(1)).await;
    assert_eq!(orchard.del("kaiju*").await.unwrap(), 50);
    assert_eq!(store.keys().await, vec!["robots:jaeger"]);
}

#[tokio::test]
async fn test_exact_delete_counts() {
    let (orchard, _store) = seeded(&["kaiju"], OrchardConfig::default()).await;

    assert_eq!(orchard.del("kaiju").await.unwrap(), 1);
    assert_eq!(orchard.del("kaiju").await.unwrap(), 0);
    assert_eq!(orchard.del("nonexistent").await.unwrap(), 0);
}

#[tokio::test]
async fn test_prefix_scopes_patterns() {
    let config = OrchardConfig::builder().prefix("monsters").build().unwrap();
    let (orchard, store) = seeded(
        &["monsters:kaiju:a", "monsters:robots", "other:kaiju:b"],
        config,
    )
    .await;

    assert_eq!(orchard.del("kaiju*").await.unwrap(), 1);
    assert_eq!(store.keys().await, vec!["monsters:robots", "other:kaiju:b"]);
}

#[tokio::test]
async fn test_leading_wildcard_ignores_prefix() {
    let config = OrchardConfig::builder().prefix("monsters").build().unwrap();
    let (orchard, store) = seeded(
        &["monsters:kaiju", "other:kaiju", "other:robots"],
        config,
    )
    .await;

    assert_eq!(orchard.del("*kaiju").await.unwrap(), 2);
    assert_eq!(store.keys().await, vec!["other:robots"]);
}

#[tokio::test]
async fn test_eviction_while_disconnected() {
    let store = Arc::new(MemoryStore::disconnected());
    let strict = Orchard::new(store.clone(), OrchardConfig::default()).unwrap();
    assert!(matches!(
        strict.del("kaiju*").await,
        Err(OrchardError::StoreUnavailable(_))
    ));

    let lenient = Orchard::new(
        store.clone(),
        OrchardConfig::builder().allow_failthrough(true).build().unwrap(),
    )
    .unwrap();
    assert_eq!(lenient.del("kaiju*").await.unwrap(), 0);
    assert_eq!(store.counts().scan, 0);
    assert_eq!(store.counts().delete, 0);
}
