//! In-process store client
//!
//! `MemoryStore` behaves like a single Redis node closely enough to exercise
//! the cache: lazy key expiry, glob `MATCH` scanning with opaque cursors that
//! survive concurrent deletes, and lifecycle signals. It also lets tests cut
//! the connection, inject failures and count calls per operation.

use crate::error::{OrchardError, Result};
use crate::store::{glob_match, StoreClient, StoreSignal, SCAN_START};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const SIGNAL_CAPACITY: usize = 64;

/// Number of calls made to each store operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub get: u64,
    pub set: u64,
    pub expire: u64,
    pub delete: u64,
    pub scan: u64,
}

/// A single store operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    Get,
    Set,
    Expire,
    Delete,
    Scan,
}

impl StoreOp {
    const ALL: u8 = 0b1_1111;

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Default)]
struct Counters {
    get: AtomicU64,
    set: AtomicU64,
    expire: AtomicU64,
    delete: AtomicU64,
    scan: AtomicU64,
}

struct Record {
    value: String,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

#[derive(Default)]
struct MemoryState {
    /// Ordered so that a scan cursor can resume after the last key it saw
    records: BTreeMap<String, Record>,

    /// Cursor token -> last key examined by that scan step
    cursors: HashMap<u64, String>,

    next_cursor: u64,
}

impl MemoryState {
    fn live(&mut self, key: &str, now: Instant) -> Option<&Record> {
        if self.records.get(key).map_or(false, |r| r.is_expired(now)) {
            self.records.remove(key);
        }
        self.records.get(key)
    }
}

/// In-memory [`StoreClient`]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    ready: AtomicBool,
    /// Bit set of `StoreOp`s that fail with an injected error
    failing: AtomicU8,
    signals: broadcast::Sender<StoreSignal>,
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store that is connected from the start
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        Self {
            state: RwLock::new(MemoryState::default()),
            ready: AtomicBool::new(true),
            failing: AtomicU8::new(0),
            signals,
            counters: Counters::default(),
        }
    }

    /// Create an empty store that starts out disconnected
    pub fn disconnected() -> Self {
        let store = Self::new();
        store.ready.store(false, Ordering::SeqCst);
        store
    }

    /// Simulate a terminal disconnect
    pub fn disconnect(&self) {
        info!("Memory store disconnected");
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.signals.send(StoreSignal::Disconnected);
    }

    /// Simulate a connection error
    pub fn fail_connection(&self, message: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.signals.send(StoreSignal::Error(message.into()));
    }

    /// Simulate the connection coming (back) up
    pub fn reconnect(&self) {
        info!("Memory store ready");
        self.ready.store(true, Ordering::SeqCst);
        let _ = self.signals.send(StoreSignal::Ready);
    }

    /// Make every operation fail with a store error while `failing` is set,
    /// without touching the connection state
    pub fn set_failing(&self, failing: bool) {
        let ops = if failing { StoreOp::ALL } else { 0 };
        self.failing.store(ops, Ordering::SeqCst);
    }

    /// Make one operation fail with a store error until cleared
    pub fn fail_op(&self, op: StoreOp) {
        self.failing.fetch_or(op.bit(), Ordering::SeqCst);
    }

    /// Stop injecting failures into every operation
    pub fn clear_failures(&self) {
        self.failing.store(0, Ordering::SeqCst);
    }

    /// Snapshot of per-operation call counts
    pub fn counts(&self) -> OperationCounts {
        OperationCounts {
            get: self.counters.get.load(Ordering::SeqCst),
            set: self.counters.set.load(Ordering::SeqCst),
            expire: self.counters.expire.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
            scan: self.counters.scan.load(Ordering::SeqCst),
        }
    }

    /// Write a record directly, bypassing counters and connection state
    pub async fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().await.records.insert(
            key.into(),
            Record {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Read a record directly, bypassing counters and connection state
    pub async fn peek(&self, key: &str) -> Option<String> {
        let mut state = self.state.write().await;
        state.live(key, Instant::now()).map(|r| r.value.clone())
    }

    /// Remaining time to live of `key`, `None` if absent or persistent
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state
            .live(key, now)
            .and_then(|r| r.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// All live keys in order
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.read().await;
        state
            .records
            .iter()
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        let counter = match op {
            StoreOp::Get => &self.counters.get,
            StoreOp::Set => &self.counters.set,
            StoreOp::Expire => &self.counters.expire,
            StoreOp::Delete => &self.counters.delete,
            StoreOp::Scan => &self.counters.scan,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if !self.ready.load(Ordering::SeqCst) {
            return Err(OrchardError::StoreUnavailable(
                "memory store is not connected".to_string(),
            ));
        }
        if self.failing.load(Ordering::SeqCst) & op.bit() != 0 {
            return Err(OrchardError::Store(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreSignal> {
        self.signals.subscribe()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check(StoreOp::Get)?;
        let mut state = self.state.write().await;
        Ok(state.live(key, Instant::now()).map(|r| r.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check(StoreOp::Set)?;
        self.state.write().await.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.check(StoreOp::Expire)?;
        let now = Instant::now();
        let mut state = self.state.write().await;

        if state.live(key, now).is_none() {
            return Ok(false);
        }
        if ttl_secs == 0 {
            state.records.remove(key);
            return Ok(true);
        }
        if let Some(record) = state.records.get_mut(key) {
            // a deadline past the clock's range never arrives
            record.expires_at = now.checked_add(Duration::from_secs(ttl_secs));
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.check(StoreOp::Delete)?;
        let now = Instant::now();
        let mut state = self.state.write().await;

        let removed = match state.records.remove(key) {
            Some(record) if !record.is_expired(now) => 1,
            _ => 0,
        };
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check(StoreOp::Scan)?;
        let now = Instant::now();
        let mut state = self.state.write().await;

        let resume_after = if cursor == SCAN_START {
            None
        } else {
            match state.cursors.remove(&cursor) {
                Some(last) => Some(last),
                None => return Err(OrchardError::Store(format!("invalid scan cursor {}", cursor))),
            }
        };

        let lower = match &resume_after {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };

        let mut examined = state
            .records
            .range((lower, Bound::Unbounded))
            .take(count.max(1) + 1)
            .map(|(k, r)| (k.clone(), r.is_expired(now)))
            .collect::<Vec<_>>();

        // one extra key was taken only to learn whether the walk is finished
        let finished = examined.len() <= count.max(1);
        if !finished {
            examined.pop();
        }

        let matched: Vec<String> = examined
            .iter()
            .filter(|(k, expired)| !expired && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();

        let next = match examined.last() {
            Some((last, _)) if !finished => {
                state.next_cursor += 1;
                let token = state.next_cursor;
                state.cursors.insert(token, last.clone());
                token
            }
            _ => SCAN_START,
        };

        debug!(cursor, next, pattern, matched = matched.len(), "scan step");
        Ok((next, matched))
    }
}
