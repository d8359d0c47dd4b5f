//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::key::CacheKey;
use super::traits::{CacheEntry, CacheResult, CacheStorage};

/// How a single request may use the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  /// How long a stored response may be reused. Non-positive disables caching.
  pub ttl: Duration,
  /// Skip the lookup and always hit the network. The response is still stored.
  pub bypass: bool,
}

impl CachePolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl, bypass: false }
  }

  pub fn bypass(mut self, bypass: bool) -> Self {
    self.bypass = bypass;
    self
  }

  pub fn is_enabled(&self) -> bool {
    self.ttl > Duration::zero()
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the API client and its callers. All clones share
/// one storage backend.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
    }
  }

  /// Replace the time source used for freshness checks.
  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Number of stored entries, fresh or not.
  pub fn len(&self) -> usize {
    self.storage.len()
  }

  pub fn is_empty(&self) -> bool {
    self.storage.is_empty()
  }

  /// Return a fresh entry for `key`.
  ///
  /// Entries older than `ttl` are dropped on the way out, so expiry is only
  /// ever checked lazily here.
  pub fn lookup(&self, key: &CacheKey, ttl: Duration) -> Option<CacheEntry> {
    if ttl <= Duration::zero() {
      return None;
    }

    let now = self.clock.now();
    let entry = self.storage.get(key)?;
    if entry.is_fresh(now, ttl) {
      return Some(entry);
    }

    // Another writer may have stored a fresh entry since the read above.
    if self.storage.remove_if(key, &|current| !current.is_fresh(now, ttl)) {
      debug!(key = %key, stored_at = %entry.stored_at, "dropped stale cache entry");
    }
    None
  }

  /// Store a response. Does nothing (and returns false) when `ttl` is not positive.
  pub fn store(&self, key: &CacheKey, value: Arc<Value>, ttl: Duration) -> bool {
    if ttl <= Duration::zero() {
      return false;
    }
    self.storage.set(key, CacheEntry::new(value, self.clock.now()));
    true
  }

  /// Remove `key` if it still holds `value`.
  ///
  /// Used to drop a response the caller could not use without clobbering a
  /// newer one stored in the meantime.
  pub fn evict(&self, key: &CacheKey, value: &Arc<Value>) -> bool {
    let removed = self
      .storage
      .remove_if(key, &|current| Arc::ptr_eq(&current.value, value));
    if removed {
      debug!(key = %key, "cache entry evicted");
    }
    removed
  }

  /// Remove one entry, or every entry when `key` is `None`.
  pub fn invalidate(&self, key: Option<&CacheKey>) -> usize {
    match key {
      Some(key) => {
        let removed = usize::from(self.storage.remove(key));
        debug!(key = %key, removed, "cache entry invalidated");
        removed
      }
      None => {
        let removed = self.storage.clear();
        debug!(removed, "cache cleared");
        removed
      }
    }
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Unless bypassing, return a fresh entry without calling `fetcher`
  /// 2. Otherwise call `fetcher`
  /// 3. On success, store the response (when the policy allows caching)
  /// 4. On failure, return the error and leave the cache untouched
  pub async fn fetch<F, Fut, E>(
    &self,
    key: &CacheKey,
    policy: CachePolicy,
    fetcher: F,
  ) -> Result<CacheResult<Arc<Value>>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
  {
    if !policy.bypass {
      if let Some(cached) = self.lookup(key, policy.ttl) {
        debug!(key = %key, "cache hit");
        return Ok(CacheResult::from_cache(cached.value, cached.stored_at));
      }
    }

    debug!(key = %key, bypass = policy.bypass, "cache miss");
    let data = Arc::new(fetcher().await?);
    if self.store(key, Arc::clone(&data), policy.ttl) {
      debug!(key = %key, "response cached");
    }
    Ok(CacheResult::from_network(data))
  }
}

impl std::fmt::Debug for CacheLayer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheLayer")
      .field("entries", &self.storage.len())
      .finish_non_exhaustive()
  }
}
