use chrono::Duration;
use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::api::{ApiClient, FetchError};
use crate::cache::{CacheKey, CacheLayer, CachePolicy, CacheResult, MemoryStorage, NoopStorage};
use crate::config::Config;
use crate::fetch::options::{default_cache_time, RequestOptions};
use crate::fetch::query::Query;
use crate::session::SessionStore;

/// Authenticated client with an in-memory response cache.
///
/// Clones share the HTTP client, the session and the cache, so one value
/// created at startup serves the whole process.
#[derive(Clone, Debug)]
pub struct Fetcher {
  client: ApiClient,
  cache: CacheLayer,
  default_cache_time: Duration,
}

impl Fetcher {
  pub fn new(client: ApiClient, cache: CacheLayer) -> Self {
    Self {
      client,
      cache,
      default_cache_time: default_cache_time(),
    }
  }

  /// Build the client and cache described by `config`.
  pub fn from_config(config: &Config, session: Arc<dyn SessionStore>) -> Result<Self> {
    let client = ApiClient::new(&config.api, session)?;
    let cache = if config.cache.enabled {
      CacheLayer::new(MemoryStorage::new())
    } else {
      CacheLayer::new(NoopStorage)
    };
    Ok(Self::new(client, cache).with_default_cache_time(config.cache.ttl()))
  }

  /// Cache time for requests that don't set their own.
  pub fn with_default_cache_time(mut self, cache_time: Duration) -> Self {
    self.default_cache_time = cache_time;
    self
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn default_cache_time(&self) -> Duration {
    self.default_cache_time
  }

  fn policy(&self, options: &RequestOptions, force: bool) -> CachePolicy {
    CachePolicy::new(options.effective_cache_time(self.default_cache_time))
      .bypass(force || options.skip_cache)
  }

  /// Fresh cached response for this request, without touching the network.
  pub fn cached(&self, endpoint: &str, options: &RequestOptions) -> Option<CacheResult<Arc<Value>>> {
    let policy = self.policy(options, false);
    if policy.bypass {
      return None;
    }
    self
      .cache
      .lookup(&options.cache_key(endpoint), policy.ttl)
      .map(|entry| CacheResult::from_cache(entry.value, entry.stored_at))
  }

  /// Perform one request through the cache.
  ///
  /// With `force` (or `skip_cache` on the options) the lookup is skipped; a
  /// successful response is still stored. Failures never touch the cache.
  #[instrument(skip(self, options), fields(method = %options.method))]
  pub async fn request(
    &self,
    endpoint: &str,
    options: &RequestOptions,
    force: bool,
  ) -> Result<CacheResult<Arc<Value>>, FetchError> {
    if endpoint.trim().is_empty() {
      return Err(FetchError::invalid("endpoint must not be empty"));
    }

    let key = options.cache_key(endpoint);
    let policy = self.policy(options, force);
    self
      .cache
      .fetch(&key, policy, || self.client.send(endpoint, options))
      .await
  }

  /// [`request`](Self::request) and decode the body into `T`.
  ///
  /// A body that does not decode is evicted, so the next call goes back to
  /// the network instead of replaying the failure.
  pub async fn request_as<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    options: &RequestOptions,
    force: bool,
  ) -> Result<CacheResult<T>, FetchError> {
    let result = self.request(endpoint, options, force).await?;
    let data = self.decode_or_evict::<T>(&options.cache_key(endpoint), &result.data)?;
    Ok(result.map(|_| data))
  }

  /// Decode a response stored under `key`, dropping it from the cache when
  /// it does not fit `T`.
  pub(crate) fn decode_or_evict<T: DeserializeOwned>(
    &self,
    key: &CacheKey,
    value: &Arc<Value>,
  ) -> Result<T, FetchError> {
    decode::<T>(value).inspect_err(|err| {
      warn!(key = %key, error = %err, "response does not match the expected shape");
      self.cache.evict(key, value);
    })
  }

  /// Drop one cached response, or all of them.
  pub fn clear_cache(&self, key: Option<&CacheKey>) -> usize {
    self.cache.invalidate(key)
  }

  /// Call-site handle for `endpoint`. With `immediate` the first fetch starts
  /// right away; it must be called inside a tokio runtime.
  pub fn query<T>(&self, endpoint: impl Into<String>, options: RequestOptions, immediate: bool) -> Query<T>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    Query::new(self.clone(), endpoint.into(), options, immediate)
  }
}

/// Decode a cached JSON value into `T`.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, FetchError> {
  T::deserialize(value).map_err(FetchError::from)
}
