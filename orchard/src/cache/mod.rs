//! # Read-through caching
//!
//! This module implements the cache façade: key resolution, herd-protected
//! value priming, persistence with expirations, and pattern eviction.
//!
//! ## Features
//!
//! - **Flexible keys**: literals, JSON values, segment lists, futures and producers
//! - **Herd protection**: concurrent misses for one key prime the value once
//! - **TTL-Based Expiration**: per-instance or per-request, with optional jitter
//! - **Pattern eviction**: `del("prefix*")` walks the key space with cursor scans
//! - **Fail-through**: optionally serve primed values while the store is failing
//!
//! ## Example
//!
//! ```rust
//! use orchard::cache::{CacheOptions, Orchard, OrchardConfig, ValueSpec};
//! use orchard::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> orchard::Result<()> {
//! let config = OrchardConfig::builder()
//!     .ttl(Duration::from_secs(3600)) // 1 hour
//!     .build()?;
//! let orchard = Orchard::new(Arc::new(MemoryStore::new()), config)?;
//!
//! let producer = ValueSpec::from_fn(|key: &str| Ok::<_, String>(format!("primed {}", key)));
//! let value = orchard.cache(vec!["kaiju", "mothra"], producer).await?;
//! assert_eq!(value, "primed kaiju:mothra");
//!
//! orchard
//!     .cache_with("kaiju", "Godzilla", CacheOptions::with_ttl(Duration::from_secs(60)))
//!     .await?;
//! assert_eq!(orchard.del("kaiju*").await?, 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod evict;
pub mod herd;
pub mod key;
pub mod orchard;
pub mod ttl;
pub mod types;
pub mod value;

pub use config::{OrchardConfig, OrchardConfigBuilder};
pub use events::{CacheEvent, EventBus};
pub use evict::EvictionEngine;
pub use herd::{Finish, HerdConfig, HerdGuard, Resolution};
pub use key::{resolve_eviction_key, resolve_key, KeyHasher, KeyOptions, KeySpec};
pub use orchard::{CacheOptions, Orchard};
pub use ttl::parse_ttl;
pub use types::{CacheKey, CacheStats, ResolvedValue};
pub use value::ValueSpec;
