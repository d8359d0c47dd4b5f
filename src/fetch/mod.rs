//! Fetch-cache client.
//!
//! - [`Fetcher`] pairs the HTTP client with the shared response cache
//! - [`Query`] tracks one call site's loading, data and error state
//! - [`RequestOptions`] describes a single request and derives its cache key

mod fetcher;
mod options;
mod query;

pub use fetcher::{decode, Fetcher};
pub use options::{
  default_cache_time, Method, RequestBody, RequestOptions, Upload, DEFAULT_CACHE_TIME_MS,
};
pub use query::{Phase, Query, RequestState};
