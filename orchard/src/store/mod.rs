//! Remote key-value store clients
//!
//! The cache talks to its backing store only through [`StoreClient`]: five
//! asynchronous operations plus a stream of connection lifecycle signals.
//! Retries, pooling and wire protocol are the client's business.
//!
//! Two clients ship with the crate:
//! - [`MemoryStore`] - in-process store for tests and local development
//! - [`RedisStore`] - Redis over a multiplexed connection (feature `redis`)

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use memory::{MemoryStore, OperationCounts, StoreOp};
#[cfg(feature = "redis")]
pub use self::redis::{HealthCheckResult, HealthStatus, RedisStore, RedisStoreConfig};

/// Cursor value that starts a scan and marks its completion
pub const SCAN_START: u64 = 0;

/// Connection lifecycle signal reported by a store client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "message", rename_all = "lowercase")]
pub enum StoreSignal {
    /// Connection established and accepting commands
    Ready,
    /// The connection failed
    Error(String),
    /// The connection closed for good
    Disconnected,
    /// The client is trying to re-establish the connection
    Reconnecting,
}

impl fmt::Display for StoreSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSignal::Ready => write!(f, "ready"),
            StoreSignal::Error(message) => write!(f, "error: {}", message),
            StoreSignal::Disconnected => write!(f, "disconnected"),
            StoreSignal::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Minimal asynchronous interface to a remote key-value store
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// A name for logs, e.g. "memory" or "redis"
    fn name(&self) -> &'static str;

    /// Whether the client currently holds a usable connection
    fn is_ready(&self) -> bool;

    /// Subscribe to connection lifecycle signals
    fn subscribe(&self) -> broadcast::Receiver<StoreSignal>;

    /// Serialized value stored under `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, clearing any previous expiration
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Expire `key` after `ttl_secs` seconds; `false` if the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remove `key`, returning the number of records removed (0 or 1)
    async fn delete(&self, key: &str) -> Result<u64>;

    /// One scan step: keys matching the glob `pattern` plus the next cursor
    ///
    /// `count` is a hint; a call may return more or fewer keys. A returned
    /// cursor of [`SCAN_START`] means the key space has been fully walked.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}

/// Redis-style glob match supporting `*`, `?`, `[...]` and `\` escapes
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    glob_match_from(&pattern, &key)
}

fn glob_match_from(pattern: &[char], key: &[char]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some('*') => {
            let rest = &pattern[1..];
            (0..=key.len()).any(|skip| glob_match_from(rest, &key[skip..]))
        }
        Some('?') => !key.is_empty() && glob_match_from(&pattern[1..], &key[1..]),
        Some('[') => {
            let Some(&ch) = key.first() else {
                return false;
            };
            match pattern.iter().position(|&c| c == ']') {
                Some(end) if end > 1 => {
                    let class = &pattern[1..end];
                    let (negate, class) = match class.first() {
                        Some('^') => (true, &class[1..]),
                        _ => (false, class),
                    };
                    let hit = class_contains(class, ch);
                    hit != negate && glob_match_from(&pattern[end + 1..], &key[1..])
                }
                _ => key.first() == Some(&'[') && glob_match_from(&pattern[1..], &key[1..]),
            }
        }
        Some('\\') if pattern.len() > 1 => {
            key.first() == Some(&pattern[1]) && glob_match_from(&pattern[2..], &key[1..])
        }
        Some(&c) => key.first() == Some(&c) && glob_match_from(&pattern[1..], &key[1..]),
    }
}

fn class_contains(class: &[char], ch: char) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= ch && ch <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == ch {
                return true;
            }
            i += 1;
        }
    }
    false
}
