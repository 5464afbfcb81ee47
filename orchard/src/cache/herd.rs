//! Thundering-herd protection
//!
//! The herd guard keeps a bounded, time-windowed table of in-flight value
//! resolutions keyed by cache key. Concurrent requests for the same key share
//! one shared future, so a value producer runs once no matter how many
//! callers miss at the same time.
//!
//! - Lookup and registration happen inside one critical section (atomic
//!   insert-if-absent).
//! - An entry is removed as soon as its resolution settles, success or
//!   failure, so the next request after that primes afresh.
//! - Entries that never settle are reclaimed once they exceed `max_age`, and
//!   the least recently used entry is dropped when the table is full.
//! - A finishing step registered with the resolution runs once, inside the
//!   shared future, whichever waiter happens to drive it. Callers that give
//!   up early do not stop it.

use crate::cache::types::{CacheKey, ResolvedValue};
use crate::cache::value::ValueSpec;
use crate::error::{OrchardError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Resolution shared by every caller waiting on the same key
pub type SharedResolution = Shared<BoxFuture<'static, Result<ResolvedValue>>>;

/// Step applied to a freshly produced value before the resolution settles
pub type Finish = Box<dyn FnOnce(ResolvedValue) -> BoxFuture<'static, Result<ResolvedValue>> + Send>;

/// Sizing of the pending table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdConfig {
    /// Maximum number of in-flight keys tracked at once
    pub max_entries: usize,

    /// Age after which an unsettled entry is forgotten
    pub max_age: Duration,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_age: Duration::from_secs(60),
        }
    }
}

/// How a call to [`HerdGuard::resolve`] obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// This call registered the entry and drove the computation
    Primed,
    /// This call joined a computation another caller registered
    Joined,
}

struct PendingEntry {
    generation: u64,
    future: SharedResolution,
    created_at: Instant,
}

impl PendingEntry {
    fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<CacheKey, PendingEntry>,

    /// Access order, least recently used first
    lru_queue: VecDeque<CacheKey>,

    next_generation: u64,
}

impl PendingTable {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.lru_queue.retain(|k| k != key);
        }
    }

    /// Remove `key` only if it still holds the given generation
    fn settle(&mut self, key: &str, generation: u64) {
        let current = self.entries.get(key).map(|entry| entry.generation);
        if current == Some(generation) {
            self.remove_entry(key);
        }
    }

    fn purge_expired(&mut self, max_age: Duration) {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(max_age))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            warn!(key = %key, "Pending resolution exceeded max age, forgetting it");
            self.remove_entry(&key);
        }
    }

    fn evict_if_needed(&mut self, max_entries: usize) {
        while self.entries.len() >= max_entries {
            match self.lru_queue.pop_front() {
                Some(key) => {
                    debug!(key = %key, "Pending table full, dropping least recently used entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Coalesces concurrent value resolutions per key
#[derive(Clone)]
pub struct HerdGuard {
    config: HerdConfig,
    table: Arc<Mutex<PendingTable>>,
}

impl HerdGuard {
    /// Create a guard with the given table sizing
    pub fn new(config: HerdConfig) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(PendingTable::default())),
        }
    }

    /// Resolve `spec` for `key`, sharing any computation already in flight
    pub async fn resolve(&self, key: &str, spec: ValueSpec) -> Result<ResolvedValue> {
        self.resolve_tracked(key, spec).await.map(|(value, _)| value)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether this call
    /// primed the value or joined another caller's computation
    pub async fn resolve_tracked(
        &self,
        key: &str,
        spec: ValueSpec,
    ) -> Result<(ResolvedValue, Resolution)> {
        self.resolve_with(key, spec, None).await
    }

    /// Like [`resolve_tracked`](Self::resolve_tracked), running `finish` on
    /// the produced value as part of the shared resolution
    ///
    /// `finish` is only used when this call registers the resolution; a call
    /// that joins one already in flight gets that resolution's outcome.
    pub async fn resolve_with(
        &self,
        key: &str,
        spec: ValueSpec,
        finish: Option<Finish>,
    ) -> Result<(ResolvedValue, Resolution)> {
        if spec.is_missing() {
            return Err(OrchardError::MissingValue);
        }

        let (future, resolution) = {
            let mut table = self.table.lock().await;
            table.purge_expired(self.config.max_age);

            if let Some(entry) = table.entries.get(key) {
                let future = entry.future.clone();
                table.touch(key);
                debug!(key = %key, "Joining in-flight resolution");
                (future, Resolution::Joined)
            } else {
                table.evict_if_needed(self.config.max_entries);

                let produced = spec.resolve(key.to_string());
                let resolution = match finish {
                    Some(finish) => async move { finish(produced.await?).await }.boxed(),
                    None => produced,
                };

                table.next_generation += 1;
                let generation = table.next_generation;
                let future =
                    Self::settling(Arc::clone(&self.table), key.to_string(), generation, resolution);

                table.entries.insert(
                    key.to_string(),
                    PendingEntry {
                        generation,
                        future: future.clone(),
                        created_at: Instant::now(),
                    },
                );
                table.lru_queue.push_back(key.to_string());
                debug!(key = %key, generation, "Registered new resolution");
                (future, Resolution::Primed)
            }
        };

        future.await.map(|value| (value, resolution))
    }

    /// Number of resolutions currently tracked
    pub async fn pending(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Whether a resolution for `key` is currently tracked
    pub async fn is_pending(&self, key: &str) -> bool {
        self.table.lock().await.entries.contains_key(key)
    }

    /// Table sizing in use
    pub fn config(&self) -> &HerdConfig {
        &self.config
    }

    fn settling(
        table: Arc<Mutex<PendingTable>>,
        key: CacheKey,
        generation: u64,
        resolution: BoxFuture<'static, Result<ResolvedValue>>,
    ) -> SharedResolution {
        async move {
            let outcome = resolution.await;
            table.lock().await.settle(&key, generation);
            outcome
        }
        .boxed()
        .shared()
    }
}

impl Default for HerdGuard {
    fn default() -> Self {
        Self::new(HerdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counting_producer(calls: Arc<AtomicUsize>, value: serde_json::Value) -> ValueSpec {
        ValueSpec::from_async(move |_key| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(value)
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let guard = HerdGuard::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..10).map(|i| {
            let spec = counting_producer(Arc::clone(&calls), json!(format!("value-{}", i)));
            guard.resolve_tracked("kaiju", spec)
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap().0.clone();
        assert_eq!(first, json!("value-0"));
        for result in &results {
            assert_eq!(result.as_ref().unwrap().0, first);
        }

        let primed = results
            .iter()
            .filter(|r| r.as_ref().unwrap().1 == Resolution::Primed)
            .count();
        assert_eq!(primed, 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_settlement() {
        let guard = HerdGuard::default();
        let calls = Arc::new(AtomicUsize::new(0));

        guard
            .resolve("kaiju", counting_producer(Arc::clone(&calls), json!(1)))
            .await
            .unwrap();
        assert_eq!(guard.pending().await, 0);

        guard
            .resolve("kaiju", counting_producer(Arc::clone(&calls), json!(2)))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_cleared() {
        let guard = HerdGuard::default();

        let failing = || ValueSpec::from_async(|_key| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<serde_json::Value, _>("producer exploded")
        });

        let (a, b) = tokio::join!(guard.resolve("kaiju", failing()), guard.resolve("kaiju", failing()));
        assert!(matches!(a, Err(OrchardError::Priming { .. })));
        assert_eq!(a, b);
        assert!(!guard.is_pending("kaiju").await);

        let value = guard.resolve("kaiju", json!("recovered").into()).await.unwrap();
        assert_eq!(value, json!("recovered"));
    }

    #[tokio::test]
    async fn test_missing_value_registers_nothing() {
        let guard = HerdGuard::default();
        let result = guard.resolve("kaiju", ValueSpec::Missing).await;
        assert_eq!(result, Err(OrchardError::MissingValue));
        assert_eq!(guard.pending().await, 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let guard = HerdGuard::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            guard.resolve("a", counting_producer(Arc::clone(&calls), json!("A"))),
            guard.resolve("b", counting_producer(Arc::clone(&calls), json!("B"))),
        );
        assert_eq!(a.unwrap(), json!("A"));
        assert_eq!(b.unwrap(), json!("B"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_finish_runs_once_when_primer_gives_up() {
        let guard = HerdGuard::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let finish = |finished: &Arc<AtomicUsize>| -> Finish {
            let finished = Arc::clone(finished);
            Box::new(move |value: ResolvedValue| {
                async move {
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OrchardError>(value)
                }
                .boxed()
            })
        };

        let primer = guard.resolve_with(
            "kaiju",
            counting_producer(Arc::clone(&calls), json!("Godzilla")),
            Some(finish(&finished)),
        );
        assert!(tokio::time::timeout(Duration::from_millis(5), primer).await.is_err());

        let (value, resolution) = guard
            .resolve_with("kaiju", json!("Mothra").into(), Some(finish(&finished)))
            .await
            .unwrap();
        assert_eq!(value, json!("Godzilla"));
        assert_eq!(resolution, Resolution::Joined);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(guard.pending().await, 0);
    }

    #[tokio::test]
    async fn test_finish_failure_is_shared() {
        let guard = HerdGuard::default();
        let finish: Finish = Box::new(|_value: ResolvedValue| {
            async { Err::<ResolvedValue, _>(OrchardError::Store("write refused".to_string())) }
                .boxed()
        });

        let result = guard.resolve_with("kaiju", json!("Godzilla").into(), Some(finish)).await;
        assert_eq!(result, Err(OrchardError::Store("write refused".to_string())));
        assert!(!guard.is_pending("kaiju").await);
    }

    #[tokio::test]
    async fn test_stuck_entry_expires_by_age() {
        let guard = HerdGuard::new(HerdConfig {
            max_entries: 16,
            max_age: Duration::from_millis(30),
        });

        // never settles: the sender is kept alive but never used
        let (_tx, rx) = oneshot::channel::<serde_json::Value>();
        let stuck = ValueSpec::future(async move { rx.await.map_err(|e| e.to_string()) });
        let pending = guard.resolve("kaiju", stuck);
        let _ = tokio::time::timeout(Duration::from_millis(5), pending).await;
        assert!(guard.is_pending("kaiju").await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let value = guard.resolve("kaiju", json!("fresh").into()).await.unwrap();
        assert_eq!(value, json!("fresh"));
    }

    #[tokio::test]
    async fn test_capacity_drops_least_recently_used() {
        let guard = HerdGuard::new(HerdConfig {
            max_entries: 2,
            max_age: Duration::from_secs(60),
        });

        let mut senders = Vec::new();
        for key in ["a", "b", "c"] {
            let (tx, rx) = oneshot::channel::<serde_json::Value>();
            senders.push(tx);
            let spec = ValueSpec::future(async move { rx.await.map_err(|e| e.to_string()) });
            let _ = tokio::time::timeout(Duration::from_millis(5), guard.resolve(key, spec)).await;
        }

        assert_eq!(guard.pending().await, 2);
        assert!(!guard.is_pending("a").await);
        assert!(guard.is_pending("b").await);
        assert!(guard.is_pending("c").await);
    }
}
