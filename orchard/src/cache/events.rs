//! Cache telemetry events
//!
//! Every `Orchard` owns an [`EventBus`]. Subscribers receive hit/miss timings
//! and store lifecycle transitions; publishing never blocks and never fails a
//! cache request, even with no subscriber attached.

use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event published by an `Orchard`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// The value was served from the store
    Hit {
        request_id: Uuid,
        key: CacheKey,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The value had to be primed
    Miss {
        request_id: Uuid,
        key: CacheKey,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The store became reachable
    StoreReady,

    /// The store reported a connection error
    StoreError { message: String },

    /// The store connection closed or is being re-established
    StoreDisconnected,
}

impl CacheEvent {
    pub(crate) fn hit(request_id: Uuid, key: &str, elapsed_ms: u64) -> Self {
        CacheEvent::Hit {
            request_id,
            key: key.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn miss(request_id: Uuid, key: &str, elapsed_ms: u64) -> Self {
        CacheEvent::Miss {
            request_id,
            key: key.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Wire name of the event, e.g. `cache:hit`
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache:hit",
            CacheEvent::Miss { .. } => "cache:miss",
            CacheEvent::StoreReady => "store:ready",
            CacheEvent::StoreError { .. } => "store:error",
            CacheEvent::StoreDisconnected => "store:disconnected",
        }
    }

    /// Cache key carried by hit and miss events
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. } | CacheEvent::Miss { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Broadcast channel for [`CacheEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn emit(&self, event: CacheEvent) {
        trace!(event = event.name(), "emit");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
