//! Key resolution
//!
//! A [`KeySpec`] describes a cache key the way callers naturally have it: a
//! literal, a JSON value, a list of segments, a pending future or a deferred
//! producer. [`resolve_key`] turns any of these into the canonical
//! [`CacheKey`] string sent to the store.

use crate::cache::types::{CacheKey, KEY_SEPARATOR, WILDCARD};
use crate::error::{OrchardError, Result};
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future resolving to another key specification
pub type KeyFuture = BoxFuture<'static, std::result::Result<KeySpec, String>>;

/// Deferred key producer, invoked with no arguments
pub type KeyProducer = Box<dyn FnOnce() -> KeySpec + Send>;

/// Optional transform applied to the raw key before prefixing
pub type KeyHasher = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Specification of a cache key
pub enum KeySpec {
    /// No key supplied
    Absent,

    /// A literal JSON value: strings, numbers, booleans, arrays and objects
    Value(Value),

    /// Ordered segments, each resolved independently and joined with `:`
    Parts(Vec<KeySpec>),

    /// A computation that yields the key later
    Future(KeyFuture),

    /// A producer invoked once at resolution time
    Producer(KeyProducer),
}

impl KeySpec {
    /// Key computed by a closure at resolution time
    pub fn producer<F, K>(f: F) -> Self
    where
        F: FnOnce() -> K + Send + 'static,
        K: Into<KeySpec> + 'static,
    {
        KeySpec::Producer(Box::new(move || f().into()))
    }

    /// Key delivered by a future; a failed future yields `InvalidKey`
    pub fn future<F, K, E>(fut: F) -> Self
    where
        F: Future<Output = std::result::Result<K, E>> + Send + 'static,
        K: Into<KeySpec> + 'static,
        E: fmt::Display + 'static,
    {
        KeySpec::Future(
            fut.map(|res| res.map(Into::into).map_err(|e| e.to_string()))
                .boxed(),
        )
    }

    /// Key assembled from ordered segments
    pub fn parts<I, K>(parts: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeySpec>,
    {
        KeySpec::Parts(parts.into_iter().map(Into::into).collect())
    }

    /// Whether no key was supplied at all
    pub fn is_absent(&self) -> bool {
        matches!(self, KeySpec::Absent)
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Absent => write!(f, "Absent"),
            KeySpec::Value(v) => f.debug_tuple("Value").field(v).finish(),
            KeySpec::Parts(parts) => f.debug_tuple("Parts").field(parts).finish(),
            KeySpec::Future(_) => write!(f, "Future(..)"),
            KeySpec::Producer(_) => write!(f, "Producer(..)"),
        }
    }
}

impl From<&str> for KeySpec {
    fn from(s: &str) -> Self {
        KeySpec::Value(Value::String(s.to_string()))
    }
}

impl From<String> for KeySpec {
    fn from(s: String) -> Self {
        KeySpec::Value(Value::String(s))
    }
}

impl From<&String> for KeySpec {
    fn from(s: &String) -> Self {
        KeySpec::Value(Value::String(s.clone()))
    }
}

impl From<i64> for KeySpec {
    fn from(n: i64) -> Self {
        KeySpec::Value(Value::from(n))
    }
}

impl From<i32> for KeySpec {
    fn from(n: i32) -> Self {
        KeySpec::Value(Value::from(n))
    }
}

impl From<u64> for KeySpec {
    fn from(n: u64) -> Self {
        KeySpec::Value(Value::from(n))
    }
}

impl From<u32> for KeySpec {
    fn from(n: u32) -> Self {
        KeySpec::Value(Value::from(n))
    }
}

impl From<bool> for KeySpec {
    fn from(b: bool) -> Self {
        KeySpec::Value(Value::Bool(b))
    }
}

impl From<Value> for KeySpec {
    fn from(v: Value) -> Self {
        KeySpec::Value(v)
    }
}

impl<K: Into<KeySpec>> From<Vec<K>> for KeySpec {
    fn from(parts: Vec<K>) -> Self {
        KeySpec::parts(parts)
    }
}

impl<K: Into<KeySpec>> From<Option<K>> for KeySpec {
    fn from(key: Option<K>) -> Self {
        key.map_or(KeySpec::Absent, Into::into)
    }
}

/// Options applied while resolving a key
#[derive(Clone, Default)]
pub struct KeyOptions {
    /// First segment of every key, unless the raw key starts with `*`
    pub prefix: Option<String>,

    /// Transform applied to the raw key before the prefix is added
    pub hasher: Option<KeyHasher>,
}

impl KeyOptions {
    /// Options with only a prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            hasher: None,
        }
    }
}

impl fmt::Debug for KeyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOptions")
            .field("prefix", &self.prefix)
            .field("hasher", &self.hasher.is_some())
            .finish()
    }
}

/// Resolve a key specification into its canonical cache key
///
/// Prefixing is skipped for keys that begin with the wildcard marker so that
/// `del("*suffix")` matches across every prefix.
///
/// # Example
/// ```
/// # use orchard::cache::key::{resolve_key, KeyOptions, KeySpec};
/// # #[tokio::main]
/// # async fn main() -> orchard::Result<()> {
/// let key = resolve_key(KeySpec::parts(["kaiju", "mothra"]), &KeyOptions::with_prefix("monsters")).await?;
/// assert_eq!(key, "monsters:kaiju:mothra");
/// # Ok(())
/// # }
/// ```
pub async fn resolve_key(spec: KeySpec, options: &KeyOptions) -> Result<CacheKey> {
    let raw = resolve_raw(spec).await?;
    Ok(finish_key(&raw, options.hasher.as_ref(), options.prefix.as_deref()))
}

/// Resolve the target of an eviction
///
/// Exact keys go through the hasher like [`resolve_key`], so a key written
/// by the cache is the key deleted. Patterns keep their raw text and only
/// receive the prefix.
pub async fn resolve_eviction_key(spec: KeySpec, options: &KeyOptions) -> Result<CacheKey> {
    let raw = resolve_raw(spec).await?;
    let hasher = options.hasher.as_ref().filter(|_| !is_pattern(&raw));
    Ok(finish_key(&raw, hasher, options.prefix.as_deref()))
}

fn finish_key(raw: &str, hasher: Option<&KeyHasher>, prefix: Option<&str>) -> CacheKey {
    let hashed = match hasher {
        Some(hasher) => hasher(raw),
        None => raw.to_string(),
    };

    match prefix {
        Some(prefix) if !prefix.is_empty() && !raw.starts_with(WILDCARD) => {
            format!("{}{}{}", prefix, KEY_SEPARATOR, hashed)
        }
        _ => hashed,
    }
}

/// Whether a resolved key is an eviction pattern (leading or trailing `*`)
pub fn is_pattern(key: &str) -> bool {
    key.starts_with(WILDCARD) || key.ends_with(WILDCARD)
}

fn resolve_raw(spec: KeySpec) -> BoxFuture<'static, Result<String>> {
    async move {
        match spec {
            KeySpec::Absent => Err(OrchardError::InvalidKey(
                "missing required parameter: key".to_string(),
            )),
            KeySpec::Value(value) => segment(&value),
            KeySpec::Parts(parts) => {
                if parts.is_empty() {
                    return Err(OrchardError::InvalidKey("empty composite key".to_string()));
                }
                let segments = future::try_join_all(parts.into_iter().map(resolve_raw)).await?;
                Ok(segments.join(KEY_SEPARATOR))
            }
            KeySpec::Future(fut) => {
                let inner = fut.await.map_err(OrchardError::InvalidKey)?;
                resolve_raw(inner).await
            }
            KeySpec::Producer(producer) => resolve_raw(producer()).await,
        }
    }
    .boxed()
}

fn segment(value: &Value) -> Result<String> {
    match value {
        Value::Null => Err(OrchardError::InvalidKey("null key component".to_string())),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(OrchardError::InvalidKey("empty composite key".to_string()));
            }
            let segments = items.iter().map(segment).collect::<Result<Vec<_>>>()?;
            Ok(segments.join(KEY_SEPARATOR))
        }
        Value::Object(_) => Ok(serde_json::to_string(&canonicalize(value))?),
    }
}

/// Rebuild objects with sorted keys so equal structures serialize identically
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
