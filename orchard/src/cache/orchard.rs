//! Read-through cache orchestrator
//!
//! [`Orchard`] ties the pieces together for each request:
//!
//! 1. resolve the key (prefix and optional hashing hook applied)
//! 2. when the store is connected and no refresh is forced, look the key up
//! 3. on a hit return the stored value
//! 4. on a miss prime the value through the herd guard, persist it with the
//!    configured expiration and return it
//!
//! The write in step 4 is part of the herd guard's shared resolution, so it
//! happens once per primed value even if the caller that started it goes
//! away. When the store is disconnected every request is a miss and nothing
//! is written. With `allow_failthrough` a store failure is logged and counted
//! instead of returned, and the caller still gets a primed value.

use crate::cache::config::OrchardConfig;
use crate::cache::events::{CacheEvent, EventBus};
use crate::cache::evict::EvictionEngine;
use crate::cache::herd::{Finish, HerdGuard, Resolution};
use crate::cache::key::{resolve_eviction_key, resolve_key, KeyOptions, KeySpec};
use crate::cache::ttl::ttl_seconds;
use crate::cache::types::{CacheKey, CacheStats, ResolvedValue};
use crate::cache::value::ValueSpec;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::{OrchardError, Result};
use crate::store::StoreClient;
use futures::future::FutureExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-request overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// Skip the lookup and re-prime, overwriting the stored value
    pub force_update: bool,

    /// Expiration for this value, overriding the configured default
    pub ttl: Option<Duration>,
}

impl CacheOptions {
    /// Options that force a refresh
    pub fn force_update() -> Self {
        Self {
            force_update: true,
            ttl: None,
        }
    }

    /// Options with a per-request expiration
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            force_update: false,
            ttl: Some(ttl),
        }
    }
}

/// Read-through caching façade over a [`StoreClient`]
pub struct Orchard {
    store: Arc<dyn StoreClient>,
    config: Arc<OrchardConfig>,
    key_options: KeyOptions,
    herd: HerdGuard,
    events: EventBus,
    connectivity: Arc<ConnectivityMonitor>,
    eviction: EvictionEngine,
    writer: StoreWriter,
    stats: Arc<RwLock<CacheStats>>,
    watcher: JoinHandle<()>,
}

/// Write path and failure policy, shared with resolutions that outlive a request
#[derive(Clone)]
struct StoreWriter {
    store: Arc<dyn StoreClient>,
    config: Arc<OrchardConfig>,
    connectivity: Arc<ConnectivityMonitor>,
    stats: Arc<RwLock<CacheStats>>,
}

impl Orchard {
    /// Create an orchard over `store`
    ///
    /// Must be called from within a tokio runtime: a background task follows
    /// the store's connection signals for the lifetime of the orchard.
    ///
    /// # Example
    /// ```
    /// use orchard::{MemoryStore, Orchard, OrchardConfig};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> orchard::Result<()> {
    /// let config = OrchardConfig::builder().prefix("monsters").build()?;
    /// let orchard = Orchard::new(Arc::new(MemoryStore::new()), config)?;
    ///
    /// let value = orchard.cache("kaiju", "Godzilla").await?;
    /// assert_eq!(value, "Godzilla");
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(store: Arc<dyn StoreClient>, config: OrchardConfig) -> Result<Self> {
        config.validate()?;

        Handle::try_current().map_err(|e| {
            OrchardError::Config(format!("Orchard must be created inside a tokio runtime: {}", e))
        })?;

        info!("Initializing orchard with config: {:?}", config);

        let events = EventBus::new(config.event_capacity);

        // subscribe before sampling readiness so no transition falls in between
        let signals = store.subscribe();
        let connectivity = Arc::new(ConnectivityMonitor::new(store.is_ready(), events.clone()));
        let watcher = Arc::clone(&connectivity).watch(signals);

        let eviction =
            EvictionEngine::new(Arc::clone(&store), Arc::clone(&connectivity), config.scan_count);

        let config = Arc::new(config);
        let stats = Arc::new(RwLock::new(CacheStats::default()));
        let writer = StoreWriter {
            store: Arc::clone(&store),
            config: Arc::clone(&config),
            connectivity: Arc::clone(&connectivity),
            stats: Arc::clone(&stats),
        };

        Ok(Self {
            key_options: config.key_options(),
            herd: HerdGuard::new(config.herd.clone()),
            store,
            config,
            events,
            connectivity,
            eviction,
            writer,
            stats,
            watcher,
        })
    }

    /// Connect to the Redis server named by `config.url`
    #[cfg(feature = "redis")]
    pub async fn connect(config: OrchardConfig) -> Result<Self> {
        use crate::store::{RedisStore, RedisStoreConfig};

        let store = RedisStore::connect(RedisStoreConfig::new(config.url.clone())).await?;
        Self::new(Arc::new(store), config)
    }

    /// Return the cached value for `key`, priming it from `value` on a miss
    pub async fn cache(
        &self,
        key: impl Into<KeySpec>,
        value: impl Into<ValueSpec>,
    ) -> Result<ResolvedValue> {
        self.cache_with(key, value, CacheOptions::default()).await
    }

    /// Like [`cache`](Self::cache), deserializing the result into `T`
    pub async fn cache_as<T: DeserializeOwned>(
        &self,
        key: impl Into<KeySpec>,
        value: impl Into<ValueSpec>,
    ) -> Result<T> {
        let value = self.cache(key, value).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`cache`](Self::cache) with per-request options
    pub async fn cache_with(
        &self,
        key: impl Into<KeySpec>,
        value: impl Into<ValueSpec>,
        options: CacheOptions,
    ) -> Result<ResolvedValue> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();

        let key_spec = key.into();
        let value_spec = value.into();
        if key_spec.is_absent() {
            return Err(OrchardError::MissingKey);
        }
        if value_spec.is_missing() {
            return Err(OrchardError::MissingValue);
        }

        let key = resolve_key(key_spec, &self.key_options).await?;
        debug!(%request_id, key = %key, force_update = options.force_update, "cache request");

        if !self.connectivity.is_connected() {
            debug!(%request_id, key = %key, "Store disconnected, priming without lookup");
            return self.prime(request_id, &key, value_spec, start, None).await;
        }

        if !options.force_update {
            match self.lookup(&key).await {
                Ok(Some(value)) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    self.stats.write().await.hits += 1;
                    self.events.emit(CacheEvent::hit(request_id, &key, elapsed_ms));
                    debug!(%request_id, key = %key, elapsed_ms, "cache hit");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    // a corrupt record is replaced; an unreachable store is left alone
                    let corrupt = matches!(e, OrchardError::Serialization(_));
                    self.writer.suppress(request_id, &key, "read", e).await?;
                    let finish =
                        corrupt.then(|| self.writer.write_back(request_id, &key, options.ttl));
                    return self.prime(request_id, &key, value_spec, start, finish).await;
                }
            }
        }

        let finish = self.writer.write_back(request_id, &key, options.ttl);
        self.prime(request_id, &key, value_spec, start, Some(finish)).await
    }

    /// Remove `key`, or every key matching it when it starts or ends with `*`
    ///
    /// The prefix is applied unless the key starts with `*`. An exact key
    /// also goes through the `key_hash` hook; a pattern is matched against
    /// stored keys as written. Returns the number of records removed.
    pub async fn del(&self, key: impl Into<KeySpec>) -> Result<u64> {
        let key_spec = key.into();
        if key_spec.is_absent() {
            return Err(OrchardError::MissingKey);
        }

        let key = resolve_eviction_key(key_spec, &self.key_options).await?;

        match self.eviction.evict(&key).await {
            Ok(removed) => {
                self.stats.write().await.evicted += removed;
                Ok(removed)
            }
            Err(e) if e.is_store_error() && self.config.allow_failthrough => {
                warn!(key = %key, error = %e, "Eviction failed, continuing (fail-through)");
                let mut stats = self.stats.write().await;
                stats.store_errors += 1;
                stats.failthroughs += 1;
                Ok(0)
            }
            Err(e) => {
                if e.is_store_error() {
                    self.stats.write().await.store_errors += 1;
                }
                Err(e)
            }
        }
    }

    /// Subscribe to hit/miss and store lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the counters
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Whether the store is currently considered reachable
    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity.state()
    }

    pub fn config(&self) -> &OrchardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    /// Number of value resolutions currently in flight
    pub async fn pending(&self) -> usize {
        self.herd.pending().await
    }

    async fn lookup(&self, key: &str) -> Result<Option<ResolvedValue>> {
        match self.store.get(key).await? {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    async fn prime(
        &self,
        request_id: Uuid,
        key: &CacheKey,
        spec: ValueSpec,
        start: Instant,
        finish: Option<Finish>,
    ) -> Result<ResolvedValue> {
        let (value, resolution) = self.herd.resolve_with(key, spec, finish).await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.write().await;
            stats.misses += 1;
            match resolution {
                Resolution::Primed => stats.primes += 1,
                Resolution::Joined => stats.coalesced += 1,
            }
        }
        self.events.emit(CacheEvent::miss(request_id, key, elapsed_ms));
        debug!(%request_id, key = %key, elapsed_ms, ?resolution, "cache miss");

        Ok(value)
    }
}

impl StoreWriter {
    /// Finishing step that stores a primed value while the store is connected
    fn write_back(&self, request_id: Uuid, key: &CacheKey, ttl: Option<Duration>) -> Finish {
        let writer = self.clone();
        let key = key.clone();

        Box::new(move |value: ResolvedValue| {
            async move {
                if writer.connectivity.is_connected() {
                    if let Err(e) = writer.persist(&key, &value, ttl).await {
                        writer.suppress(request_id, &key, "write", e).await?;
                    }
                }
                Ok::<_, OrchardError>(value)
            }
            .boxed()
        })
    }

    async fn persist(&self, key: &str, value: &ResolvedValue, ttl: Option<Duration>) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.store.set(key, &serialized).await?;

        let ttl = ttl
            .or(self.config.ttl)
            .map(|ttl| self.config.ttl_with_jitter(ttl))
            .and_then(ttl_seconds);
        if let Some(secs) = ttl {
            self.store.expire(key, secs).await?;
        }

        Ok(())
    }

    /// Apply the failure policy to a store-side error on the read or write path
    ///
    /// Returns `Ok(())` when the error is suppressed by fail-through.
    async fn suppress(
        &self,
        request_id: Uuid,
        key: &str,
        path: &'static str,
        error: OrchardError,
    ) -> Result<()> {
        let recoverable =
            error.is_store_error() || matches!(error, OrchardError::Serialization(_));
        if !recoverable || !self.config.allow_failthrough {
            if error.is_store_error() {
                self.stats.write().await.store_errors += 1;
            }
            return Err(error);
        }

        warn!(%request_id, key = %key, path, error = %error, "Store failure suppressed (fail-through)");
        let mut stats = self.stats.write().await;
        if error.is_store_error() {
            stats.store_errors += 1;
        }
        stats.failthroughs += 1;
        Ok(())
    }
}

impl Drop for Orchard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
