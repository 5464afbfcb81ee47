//! Key eviction
//!
//! Exact keys are deleted directly. Keys with a leading or trailing `*` are
//! treated as glob patterns: the engine walks the key space with cursor scans
//! and deletes each batch of matches concurrently before fetching the next.
//!
//! Pattern eviction is not atomic. Keys written while a scan is in progress
//! may survive it, and keys deleted by someone else are simply counted as 0.

use crate::cache::key::is_pattern;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{OrchardError, Result};
use crate::store::{StoreClient, SCAN_START};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Deletes exact keys and glob patterns from the store
#[derive(Clone)]
pub struct EvictionEngine {
    store: Arc<dyn StoreClient>,
    connectivity: Arc<ConnectivityMonitor>,
    scan_count: usize,
}

impl EvictionEngine {
    pub fn new(
        store: Arc<dyn StoreClient>,
        connectivity: Arc<ConnectivityMonitor>,
        scan_count: usize,
    ) -> Self {
        Self {
            store,
            connectivity,
            scan_count: scan_count.max(1),
        }
    }

    /// Remove `key`, or every key matching it when it is a pattern
    ///
    /// Returns the number of records removed. Fails fast with
    /// `StoreUnavailable` when the store is known to be down.
    pub async fn evict(&self, key: &str) -> Result<u64> {
        if !self.connectivity.is_connected() {
            return Err(OrchardError::StoreUnavailable(format!(
                "cannot evict {} while the {} store is disconnected",
                key,
                self.store.name()
            )));
        }

        if is_pattern(key) {
            self.evict_pattern(key).await
        } else {
            let removed = self.store.delete(key).await?;
            debug!(key = %key, removed, "Evicted key");
            Ok(removed)
        }
    }

    async fn evict_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor = SCAN_START;
        let mut removed = 0u64;
        let mut scans = 0u32;

        loop {
            let (next, keys) = self.store.scan(cursor, pattern, self.scan_count).await?;
            scans += 1;

            if !keys.is_empty() {
                let deletes = keys.iter().map(|key| self.store.delete(key));
                removed += try_join_all(deletes).await?.into_iter().sum::<u64>();
            }

            if next == SCAN_START {
                break;
            }
            cursor = next;
        }

        info!(pattern = %pattern, removed, scans, "Evicted keys by pattern");
        Ok(removed)
    }
}
