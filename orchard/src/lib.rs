//! # Orchard
//!
//! A read-through caching façade over a remote key-value store.
//!
//! Callers ask for a value by key. Orchard returns the stored copy when there
//! is one, otherwise it primes the value exactly once however many callers
//! miss at the same time, stores it with an optional expiration and returns
//! it. Keys can be evicted exactly or by wildcard pattern, and the cache
//! keeps serving primed values when the store goes away.
//!
//! ## Features
//!
//! - Async-first design using tokio
//! - Redis backend with lazy reconnect and background health checks
//! - In-memory backend for tests and local development
//! - Thundering-herd protection with a bounded pending table
//! - Cursor-based pattern eviction
//! - Hit/miss and connectivity events, counters
//!
//! ## Quick start
//!
//! ```no_run
//! use orchard::{Orchard, OrchardConfig, ValueSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchardConfig::builder()
//!         .url("redis://localhost:6379")
//!         .prefix("monsters")
//!         .ttl_str("1h")?
//!         .build()?;
//!     let orchard = Orchard::connect(config).await?;
//!
//!     let kaiju = orchard
//!         .cache(
//!             "kaiju",
//!             ValueSpec::from_async(|_key| async { Ok::<_, String>(vec!["Godzilla", "Mothra"]) }),
//!         )
//!         .await?;
//!     println!("{}", kaiju);
//!
//!     let removed = orchard.del("kaiju*").await?;
//!     println!("removed {} keys", removed);
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! ```no_run
//! use orchard::{CacheEvent, MemoryStore, Orchard, OrchardConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchard = Orchard::new(Arc::new(MemoryStore::new()), OrchardConfig::default())?;
//!     let mut events = orchard.subscribe();
//!
//!     orchard.cache("kaiju", "Godzilla").await?;
//!     if let CacheEvent::Miss { key, elapsed_ms, .. } = events.recv().await? {
//!         println!("primed {} in {}ms", key, elapsed_ms);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod connectivity;
pub mod error;
pub mod store;

// Re-export main types for convenience
pub use cache::{
    CacheEvent, CacheKey, CacheOptions, CacheStats, HerdConfig, KeySpec, Orchard, OrchardConfig,
    OrchardConfigBuilder, ResolvedValue, ValueSpec,
};
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use error::{OrchardError, Result};
pub use store::{MemoryStore, StoreClient, StoreOp, StoreSignal};
#[cfg(feature = "redis")]
pub use store::{HealthCheckResult, HealthStatus, RedisStore, RedisStoreConfig};
