//! Store connectivity tracking
//!
//! Each `Orchard` owns one [`ConnectivityMonitor`]. It starts from the store's
//! readiness at construction, then follows the store's lifecycle signals on a
//! background task. Readers check the flag synchronously and never wait on it.

use crate::cache::events::{CacheEvent, EventBus};
use crate::store::StoreSignal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Whether the store is currently usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

/// Connected/disconnected cell driven by store signals
#[derive(Debug)]
pub struct ConnectivityMonitor {
    connected: AtomicBool,
    events: EventBus,
}

impl ConnectivityMonitor {
    pub fn new(initially_connected: bool, events: EventBus) -> Self {
        Self {
            connected: AtomicBool::new(initially_connected),
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectivityState {
        if self.is_connected() {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Disconnected
        }
    }

    /// Apply one signal, publishing an event only when the state flips
    pub fn apply(&self, signal: &StoreSignal) -> Option<CacheEvent> {
        let (from, to) = match signal {
            StoreSignal::Ready => (false, true),
            _ => (true, false),
        };

        if self
            .connected
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let event = match signal {
            StoreSignal::Ready => {
                info!("Store connected");
                CacheEvent::StoreReady
            }
            StoreSignal::Error(message) => {
                warn!(error = %message, "Store connection error, bypassing cache");
                CacheEvent::StoreError {
                    message: message.clone(),
                }
            }
            StoreSignal::Disconnected | StoreSignal::Reconnecting => {
                warn!(signal = %signal, "Store disconnected, bypassing cache");
                CacheEvent::StoreDisconnected
            }
        };

        self.events.emit(event.clone());
        Some(event)
    }

    /// Follow `signals` until the store drops its sender
    pub fn watch(self: Arc<Self>, mut signals: broadcast::Receiver<StoreSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => {
                        self.apply(&signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connectivity monitor lagged behind store signals");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
