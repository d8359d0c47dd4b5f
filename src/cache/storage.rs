//! In-memory cache storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::key::CacheKey;
use super::traits::{CacheEntry, CacheStorage};

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
#[derive(Debug, Default)]
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
    None // Always miss
  }

  fn set(&self, _key: &CacheKey, _entry: CacheEntry) {}

  fn remove(&self, _key: &CacheKey) -> bool {
    false
  }

  fn remove_if(&self, _key: &CacheKey, _predicate: &dyn Fn(&CacheEntry) -> bool) -> bool {
    false
  }

  fn clear(&self) -> usize {
    0
  }

  fn len(&self) -> usize {
    0
  }
}

/// Process-memory storage shared by every clone of the owning layer.
///
/// Entries live until removed, cleared, or found stale by a reader.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

// A panic while holding the lock cannot leave an entry half written (inserts
// replace whole values), so a poisoned map is still usable.
impl CacheStorage for MemoryStorage {
  fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    entries.get(key).cloned()
  }

  fn set(&self, key: &CacheKey, entry: CacheEntry) {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.insert(key.clone(), entry);
  }

  fn remove(&self, key: &CacheKey) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.remove(key).is_some()
  }

  fn remove_if(&self, key: &CacheKey, predicate: &dyn Fn(&CacheEntry) -> bool) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let matched = entries.get(key).is_some_and(predicate);
    if matched {
      entries.remove(key);
    }
    matched
  }

  fn clear(&self) -> usize {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let count = entries.len();
    entries.clear();
    count
  }

  fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }
}
