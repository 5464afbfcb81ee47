//! Configuration for the cache façade

use crate::cache::events::DEFAULT_EVENT_CAPACITY;
use crate::cache::herd::HerdConfig;
use crate::cache::key::{KeyHasher, KeyOptions};
use crate::cache::ttl::parse_ttl;
use crate::error::{OrchardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default scan batch hint for pattern eviction
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// Default store URL
pub const DEFAULT_URL: &str = "redis://localhost:6379";

/// Configuration for an `Orchard`
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchardConfig {
    /// Store connection URL, used by [`Orchard::connect`](crate::Orchard::connect)
    pub url: String,

    /// First segment of every key
    pub prefix: Option<String>,

    /// Default expiration for primed values; `None` keeps them forever
    pub ttl: Option<Duration>,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads expirations so that keys primed together do not expire together
    pub ttl_jitter: f64,

    /// Scan batch hint for pattern eviction
    pub scan_count: usize,

    /// Serve primed values when the store fails instead of returning the error
    pub allow_failthrough: bool,

    /// Pending table sizing
    pub herd: HerdConfig,

    /// Events buffered per subscriber
    pub event_capacity: usize,

    /// Transform applied to each raw key before prefixing
    #[serde(skip)]
    pub key_hash: Option<KeyHasher>,
}

impl Default for OrchardConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            prefix: None,
            ttl: None,
            ttl_jitter: 0.0,
            scan_count: DEFAULT_SCAN_COUNT,
            allow_failthrough: false,
            herd: HerdConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            key_hash: None,
        }
    }
}

impl fmt::Debug for OrchardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchardConfig")
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("ttl_jitter", &self.ttl_jitter)
            .field("scan_count", &self.scan_count)
            .field("allow_failthrough", &self.allow_failthrough)
            .field("herd", &self.herd)
            .field("event_capacity", &self.event_capacity)
            .field("key_hash", &self.key_hash.is_some())
            .finish()
    }
}

impl OrchardConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> OrchardConfigBuilder {
        OrchardConfigBuilder::default()
    }

    /// Load configuration from the environment, reading `.env` first
    ///
    /// Recognised variables: `ORCHARD_URL`, `ORCHARD_PREFIX`, `ORCHARD_TTL`
    /// (`"1h"`, `"90s"` or milliseconds), `ORCHARD_SCAN_COUNT`,
    /// `ORCHARD_ALLOW_FAILTHROUGH`. Anything unset keeps its default.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = std::env::var("ORCHARD_URL") {
            config.url = url;
        }
        if let Ok(prefix) = std::env::var("ORCHARD_PREFIX") {
            config.prefix = Some(prefix).filter(|p| !p.is_empty());
        }
        if let Ok(ttl) = std::env::var("ORCHARD_TTL") {
            config.ttl = Some(parse_ttl(&ttl)?);
        }
        if let Ok(count) = std::env::var("ORCHARD_SCAN_COUNT") {
            config.scan_count = count.trim().parse().map_err(|_| {
                OrchardError::Config(format!("ORCHARD_SCAN_COUNT is not a number: {}", count))
            })?;
        }
        if let Ok(flag) = std::env::var("ORCHARD_ALLOW_FAILTHROUGH") {
            config.allow_failthrough = parse_flag(&flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan_count == 0 {
            return Err(OrchardError::Config(
                "scan_count must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(OrchardError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.herd.max_entries == 0 {
            return Err(OrchardError::Config(
                "herd.max_entries must be greater than 0".to_string(),
            ));
        }

        if self.herd.max_age.is_zero() {
            return Err(OrchardError::Config(
                "herd.max_age must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Key resolution options derived from this configuration
    pub fn key_options(&self) -> KeyOptions {
        KeyOptions {
            prefix: self.prefix.clone(),
            hasher: self.key_hash.clone(),
        }
    }

    /// Apply jitter to `ttl`, never going below one second
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 || ttl < Duration::from_secs(1) {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::try_from_secs_f64(final_secs).unwrap_or(ttl)
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(OrchardError::Config(format!("invalid boolean: {}", other))),
    }
}

/// Builder for cache configuration with validation
#[derive(Default)]
pub struct OrchardConfigBuilder {
    url: Option<String>,
    prefix: Option<String>,
    ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    scan_count: Option<usize>,
    allow_failthrough: Option<bool>,
    herd: Option<HerdConfig>,
    event_capacity: Option<usize>,
    key_hash: Option<KeyHasher>,
}

impl OrchardConfigBuilder {
    /// Set the store URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the key prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the default TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the default TTL from a string such as `"1h"` or `"90s"`
    pub fn ttl_str(mut self, ttl: &str) -> Result<Self> {
        self.ttl = Some(parse_ttl(ttl)?);
        Ok(self)
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the scan batch hint
    pub fn scan_count(mut self, count: usize) -> Self {
        self.scan_count = Some(count);
        self
    }

    /// Enable or disable fail-through
    pub fn allow_failthrough(mut self, allow: bool) -> Self {
        self.allow_failthrough = Some(allow);
        self
    }

    /// Set pending table sizing
    pub fn herd(mut self, herd: HerdConfig) -> Self {
        self.herd = Some(herd);
        self
    }

    /// Set per-subscriber event buffer
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Set the key hashing hook
    ///
    /// `del` hashes exact keys too; eviction patterns match the stored
    /// (hashed) keys as written.
    pub fn key_hash<F>(mut self, hash: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.key_hash = Some(Arc::new(hash));
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<OrchardConfig> {
        let defaults = OrchardConfig::default();

        let config = OrchardConfig {
            url: self.url.unwrap_or(defaults.url),
            prefix: self.prefix.or(defaults.prefix),
            ttl: self.ttl.or(defaults.ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            scan_count: self.scan_count.unwrap_or(defaults.scan_count),
            allow_failthrough: self
                .allow_failthrough
                .unwrap_or(defaults.allow_failthrough),
            herd: self.herd.unwrap_or(defaults.herd),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
            key_hash: self.key_hash,
        };

        config.validate()?;
        Ok(config)
    }
}
