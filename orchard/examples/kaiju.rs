//! Kaiju demo
//!
//! Primes a list of monsters through Orchard, reads it back from the cache,
//! shows herd protection and evicts by pattern.
//!
//! Usage:
//!   cargo run --example kaiju
//!   cargo run --example kaiju -- --memory
//!
//! Environment variables (also read from `.env`):
//!   ORCHARD_URL        - Redis connection URL (default: redis://localhost:6379)
//!   ORCHARD_PREFIX     - key prefix
//!   ORCHARD_TTL        - default expiration, e.g. "1h" or "90s"
//!   RUST_LOG           - log filter (default: info)

use orchard::{CacheEvent, MemoryStore, Orchard, OrchardConfig, ValueSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchardConfig::from_env()?;
    let orchard = if std::env::args().any(|arg| arg == "--memory") {
        info!("Using in-memory store");
        Orchard::new(Arc::new(MemoryStore::new()), config)?
    } else {
        info!("Connecting to {}", config.url);
        Orchard::connect(config).await?
    };

    info!("Store connected: {}", orchard.is_connected());

    let mut events = orchard.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                CacheEvent::Hit { key, elapsed_ms, .. } | CacheEvent::Miss { key, elapsed_ms, .. } => {
                    info!("{} {} ({}ms)", event.name(), key, elapsed_ms)
                }
                other => info!("{}", other.name()),
            }
        }
    });

    let summon = || {
        ValueSpec::from_async(|key| async move {
            info!("Summoning monsters for {}", key);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, String>(vec!["Godzilla", "Mothra"])
        })
    };

    info!("\n--- Read-through ---");
    let kaiju = orchard.cache("kaiju", summon()).await?;
    info!("First call: {}", kaiju);
    let kaiju = orchard.cache("kaiju", summon()).await?;
    info!("Second call: {}", kaiju);

    info!("\n--- Herd protection ---");
    let stampede = (0..5).map(|i| orchard.cache(vec!["kaiju".to_string(), format!("{}", i % 2)], summon()));
    for result in futures::future::join_all(stampede).await {
        info!("Stampede result: {}", result?);
    }

    info!("\n--- Eviction ---");
    let removed = orchard.del("kaiju*").await?;
    info!("Removed {} keys", removed);

    info!("\n--- Stats ---");
    info!("{}", orchard.stats().await);

    Ok(())
}
