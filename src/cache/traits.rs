//! Core traits and types for the response cache.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::key::CacheKey;

/// A decoded response body and the moment it was stored.
///
/// The value is shared: every hit hands out the same allocation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: Arc<Value>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(value: Arc<Value>, stored_at: DateTime<Utc>) -> Self {
    Self { value, stored_at }
  }

  /// Fresh while `now - stored_at < ttl`. A non-positive ttl is never fresh.
  pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    ttl > Duration::zero() && now - self.stored_at < ttl
  }
}

/// Storage backend for cache entries.
///
/// Implementations replace whole entries; readers never observe a partially
/// written one.
pub trait CacheStorage: Send + Sync {
  fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

  fn set(&self, key: &CacheKey, entry: CacheEntry);

  /// Remove one entry. Returns whether it existed.
  fn remove(&self, key: &CacheKey) -> bool;

  /// Remove the entry for `key` only if `predicate` holds for it, checked
  /// and removed atomically. Returns whether an entry was removed.
  fn remove_if(&self, key: &CacheKey, predicate: &dyn Fn(&CacheEntry) -> bool) -> bool;

  /// Remove everything. Returns the number of dropped entries.
  fn clear(&self) -> usize;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Result from a cache-aware fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the network
  Network,
  /// A fresh cache entry; no request was made
  Cache,
}
