//! Value specifications
//!
//! A cache request carries a [`ValueSpec`]: the value itself, a future that
//! will produce it, or a producer invoked with the resolved key. The herd
//! guard resolves the spec only on a miss and at most once per key window.

use crate::cache::types::{CacheKey, ResolvedValue};
use crate::error::{OrchardError, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Future yielding a value or a failure message
pub type ValueFuture = BoxFuture<'static, std::result::Result<ResolvedValue, String>>;

/// Producer invoked with the resolved cache key
pub type ValueProducer = Box<dyn FnOnce(CacheKey) -> ValueFuture + Send>;

/// Specification of the value to prime on a miss
pub enum ValueSpec {
    /// No value supplied
    Missing,

    /// An already known value
    Literal(ResolvedValue),

    /// A computation already under way
    Future(ValueFuture),

    /// A producer called with the resolved key
    Producer(ValueProducer),
}

impl ValueSpec {
    /// Literal from any serializable value
    pub fn literal<T: Serialize>(value: &T) -> Result<Self> {
        Ok(ValueSpec::Literal(serde_json::to_value(value)?))
    }

    /// Synchronous producer; an `Err` surfaces as `Priming`
    pub fn from_fn<F, T, E>(f: F) -> Self
    where
        F: FnOnce(&str) -> std::result::Result<T, E> + Send + 'static,
        T: Serialize + 'static,
        E: fmt::Display + 'static,
    {
        ValueSpec::Producer(Box::new(move |key: CacheKey| {
            let outcome = f(&key)
                .map_err(|e| e.to_string())
                .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()));
            futures::future::ready(outcome).boxed()
        }))
    }

    /// Asynchronous producer; a rejected future surfaces as `Priming`
    pub fn from_async<F, Fut, T, E>(f: F) -> Self
    where
        F: FnOnce(CacheKey) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize + 'static,
        E: fmt::Display + 'static,
    {
        ValueSpec::Producer(Box::new(move |key: CacheKey| {
            f(key).map(settle).boxed()
        }))
    }

    /// Value delivered by a future that is already running or ready to run
    pub fn future<Fut, T, E>(fut: Fut) -> Self
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize + 'static,
        E: fmt::Display + 'static,
    {
        ValueSpec::Future(fut.map(settle).boxed())
    }

    /// Whether no value was supplied at all
    pub fn is_missing(&self) -> bool {
        matches!(self, ValueSpec::Missing)
    }

    /// Resolve the spec for `key`
    ///
    /// Literal values are returned as-is, futures awaited, producers invoked
    /// with the key and awaited. Failures become `Priming`.
    pub fn resolve(self, key: CacheKey) -> BoxFuture<'static, Result<ResolvedValue>> {
        async move {
            let outcome = match self {
                ValueSpec::Missing => return Err(OrchardError::MissingValue),
                ValueSpec::Literal(value) => Ok(value),
                ValueSpec::Future(fut) => fut.await,
                ValueSpec::Producer(producer) => producer(key.clone()).await,
            };

            outcome.map_err(|message| OrchardError::Priming { key, message })
        }
        .boxed()
    }
}

fn settle<T: Serialize, E: fmt::Display>(
    outcome: std::result::Result<T, E>,
) -> std::result::Result<ResolvedValue, String> {
    outcome
        .map_err(|e| e.to_string())
        .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()))
}

impl fmt::Debug for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSpec::Missing => write!(f, "Missing"),
            ValueSpec::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ValueSpec::Future(_) => write!(f, "Future(..)"),
            ValueSpec::Producer(_) => write!(f, "Producer(..)"),
        }
    }
}

impl From<Value> for ValueSpec {
    fn from(v: Value) -> Self {
        ValueSpec::Literal(v)
    }
}

impl From<&str> for ValueSpec {
    fn from(s: &str) -> Self {
        ValueSpec::Literal(Value::String(s.to_string()))
    }
}

impl From<String> for ValueSpec {
    fn from(s: String) -> Self {
        ValueSpec::Literal(Value::String(s))
    }
}

impl From<i64> for ValueSpec {
    fn from(n: i64) -> Self {
        ValueSpec::Literal(Value::from(n))
    }
}

impl From<bool> for ValueSpec {
    fn from(b: bool) -> Self {
        ValueSpec::Literal(Value::Bool(b))
    }
}

impl<V: Into<ValueSpec>> From<Option<V>> for ValueSpec {
    fn from(value: Option<V>) -> Self {
        value.map_or(ValueSpec::Missing, Into::into)
    }
}
