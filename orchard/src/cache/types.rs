//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical cache key, the fully resolved and prefixed string sent to the store
pub type CacheKey = String;

/// A resolved value, anything that round-trips through JSON
pub type ResolvedValue = serde_json::Value;

/// Separator placed between key segments
pub const KEY_SEPARATOR: &str = ":";

/// Wildcard marker recognised by pattern eviction
pub const WILDCARD: char = '*';

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from the store
    pub hits: u64,

    /// Requests that had to prime a value
    pub misses: u64,

    /// Producer invocations actually started by the herd guard
    pub primes: u64,

    /// Requests that joined an already in-flight resolution
    pub coalesced: u64,

    /// Store operations that failed
    pub store_errors: u64,

    /// Store failures suppressed by fail-through
    pub failthroughs: u64,

    /// Records removed by `del`
    pub evicted: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Total number of cache requests that produced a value
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, primes: {}, store_errors: {}, evicted: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.primes,
            self.store_errors,
            self.evicted
        )
    }
}
