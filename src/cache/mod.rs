//! In-memory response cache.
//!
//! This module provides the caching half of the fetch client:
//! - Deterministic keys from method, endpoint, params and body
//! - TTL freshness checked lazily on read, per request
//! - Single-entry and clear-all invalidation
//! - A no-op backend for when caching is disabled

mod clock;
mod key;
mod layer;
mod storage;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{canonical_json, CacheKey};
pub use layer::{CacheLayer, CachePolicy};
pub use storage::{MemoryStorage, NoopStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheStorage};
