//! Redis store client and health checks
//!
//! `RedisStore` holds one multiplexed connection that is opened lazily and
//! re-opened after I/O failures. A background task pings the server on a
//! fixed interval and reports `Ready` / `Error` transitions to subscribers.

use crate::error::{OrchardError, Result};
use crate::store::{StoreClient, StoreSignal};
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, RedisError, RedisResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SIGNAL_CAPACITY: usize = 64;

/// Configuration for [`RedisStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://localhost:6379`
    pub url: String,

    /// Interval between background pings; zero disables the health task
    pub health_check_interval: Duration,

    /// Timeout for opening a connection
    pub connect_timeout: Duration,

    /// Ping latency above which the store is reported degraded (ms)
    pub degraded_threshold_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            health_check_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            degraded_threshold_ms: 1000,
        }
    }
}

impl RedisStoreConfig {
    /// Config for `url` with default health check settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Server answered within the degraded threshold
    Healthy,
    /// Server answered, but slowly
    Degraded,
    /// Server did not answer or answered with an error
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Detailed health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall health status
    pub status: HealthStatus,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Timestamp of the health check
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

struct RedisInner {
    client: Client,
    config: RedisStoreConfig,
    connection: Mutex<Option<MultiplexedConnection>>,
    ready: AtomicBool,
    signals: broadcast::Sender<StoreSignal>,
}

impl RedisInner {
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        if !self.ready.load(Ordering::SeqCst) {
            let _ = self.signals.send(StoreSignal::Reconnecting);
        }

        let opened = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await;

        match opened {
            Ok(Ok(conn)) => {
                *slot = Some(conn.clone());
                drop(slot);
                self.mark_ready();
                Ok(conn)
            }
            Ok(Err(e)) => {
                drop(slot);
                self.mark_failed(&e.to_string());
                Err(OrchardError::StoreUnavailable(e.to_string()))
            }
            Err(_) => {
                drop(slot);
                let message = format!(
                    "connection attempt timed out after {:?}",
                    self.config.connect_timeout
                );
                self.mark_failed(&message);
                Err(OrchardError::StoreUnavailable(message))
            }
        }
    }

    /// Convert a command result, dropping the connection on transport failure
    async fn observe<T>(&self, result: RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if is_transport_error(&e) => {
                self.connection.lock().await.take();
                self.mark_failed(&e.to_string());
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!(url = %self.config.url, "Redis connection ready");
            let _ = self.signals.send(StoreSignal::Ready);
        }
    }

    fn mark_failed(&self, message: &str) {
        if self.ready.swap(false, Ordering::SeqCst) {
            error!(url = %self.config.url, error = %message, "Redis connection failed");
        } else {
            debug!(url = %self.config.url, error = %message, "Redis still unreachable");
        }
        let _ = self.signals.send(StoreSignal::Error(message.to_string()));
    }

    async fn health_check(&self) -> Result<bool> {
        debug!("Executing health check (PING)");
        let mut conn = self.connection().await?;
        let result: RedisResult<String> = ::redis::cmd("PING").query_async(&mut conn).await;
        let pong = self.observe(result).await?;
        Ok(pong.eq_ignore_ascii_case("PONG"))
    }

    async fn health_check_detailed(&self) -> HealthCheckResult {
        let start = Instant::now();

        match self.health_check().await {
            Ok(true) => {
                self.mark_ready();
                let result =
                    HealthCheckResult::healthy(start.elapsed(), self.config.degraded_threshold_ms);
                if result.status == HealthStatus::Degraded {
                    warn!(
                        response_time_ms = result.response_time_ms,
                        "Redis responding slowly"
                    );
                }
                result
            }
            Ok(false) => {
                error!("PING returned an unexpected reply");
                HealthCheckResult::unhealthy(start.elapsed(), "unexpected PING reply")
            }
            Err(e) => HealthCheckResult::unhealthy(start.elapsed(), &e.to_string()),
        }
    }
}

fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Redis-backed [`StoreClient`]
pub struct RedisStore {
    inner: Arc<RedisInner>,
    health_task: Option<JoinHandle<()>>,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// An unreachable server does not fail construction: the store starts
    /// out not ready and keeps retrying on the health check interval. Only an
    /// unparsable URL is an error.
    ///
    /// # Example
    /// ```no_run
    /// # use orchard::store::{RedisStore, RedisStoreConfig, StoreClient};
    /// # #[tokio::main]
    /// # async fn main() -> orchard::Result<()> {
    /// let store = RedisStore::connect(RedisStoreConfig::new("redis://localhost:6379")).await?;
    /// println!("ready: {}", store.is_ready());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to Redis");

        let client = Client::open(config.url.as_str())
            .map_err(|e| OrchardError::Config(format!("invalid redis url {}: {}", config.url, e)))?;
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        let inner = Arc::new(RedisInner {
            client,
            config,
            connection: Mutex::new(None),
            ready: AtomicBool::new(false),
            signals,
        });

        if let Err(e) = inner.connection().await {
            warn!(error = %e, "Initial Redis connection failed, will keep retrying");
        }

        let interval = inner.config.health_check_interval;
        let health_task = if interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(health_loop(Arc::downgrade(&inner), interval)))
        };

        Ok(Self { inner, health_task })
    }

    /// PING the server, `Ok(true)` when it answers
    pub async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    /// PING the server and report status and latency; never fails
    pub async fn health_check_detailed(&self) -> HealthCheckResult {
        self.inner.health_check_detailed().await
    }

    /// Configuration in use
    pub fn config(&self) -> &RedisStoreConfig {
        &self.inner.config
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
    }
}

async fn health_loop(inner: Weak<RedisInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately and connect() has just tried
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(store) = inner.upgrade() else {
            break;
        };
        let result = store.health_check_detailed().await;
        debug!(status = ?result.status, response_time_ms = result.response_time_ms, "Redis health check");
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreSignal> {
        self.inner.signals.subscribe()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.inner.connection().await?;
        let result: RedisResult<Option<String>> = conn.get(key).await;
        self.inner.observe(result).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.inner.connection().await?;
        let result: RedisResult<()> = conn.set(key, value).await;
        self.inner.observe(result).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.inner.connection().await?;
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let result: RedisResult<bool> = conn.expire(key, seconds).await;
        self.inner.observe(result).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.inner.connection().await?;
        let result: RedisResult<u64> = conn.del(key).await;
        self.inner.observe(result).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.inner.connection().await?;
        let result: RedisResult<(u64, Vec<String>)> = ::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await;
        self.inner.observe(result).await
    }
}
