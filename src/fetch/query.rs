//! Per-call-site request state on top of the shared [`Fetcher`].
//!
//! A `Query<T>` owns one `(endpoint, options)` target and a
//! `RequestState<T>` that observers can read or subscribe to:
//!
//! ```ignore
//! let notebooks = fetcher.query::<Vec<Notebook>>("/notebooks", RequestOptions::get(), true);
//! let state = notebooks.settled().await;
//!
//! // Later, after creating a notebook
//! notebooks.refetch(true).await?;
//! ```
//!
//! Fetches are numbered. Only the most recently started one may settle the
//! state; a slower response from an earlier fetch is dropped. Network legs
//! run on their own task, so they are never aborted (not even when the
//! caller stops waiting) and always settle the state and the shared cache.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::FetchError;
use crate::cache::CacheKey;
use crate::fetch::fetcher::Fetcher;
use crate::fetch::options::RequestOptions;

/// What a call site knows about its request.
///
/// Starting a fetch keeps the previous `data`; a failure drops it.
#[derive(Debug)]
pub struct RequestState<T> {
  pub data: Option<Arc<T>>,
  pub loading: bool,
  pub error: Option<FetchError>,
}

impl<T> RequestState<T> {
  pub fn phase(&self) -> Phase {
    if self.loading {
      Phase::Loading
    } else if self.error.is_some() {
      Phase::Failure
    } else if self.data.is_some() {
      Phase::Success
    } else {
      Phase::Idle
    }
  }

  fn start(&mut self) {
    self.loading = true;
    self.error = None;
  }

  fn succeed(&mut self, data: Arc<T>) {
    self.data = Some(data);
    self.error = None;
    self.loading = false;
  }

  fn fail(&mut self, error: FetchError) {
    self.data = None;
    self.error = Some(error);
    self.loading = false;
  }
}

impl<T> Default for RequestState<T> {
  fn default() -> Self {
    Self {
      data: None,
      loading: false,
      error: None,
    }
  }
}

impl<T> Clone for RequestState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      loading: self.loading,
      error: self.error.clone(),
    }
  }
}

/// Coarse view of a [`RequestState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Nothing fetched yet
  Idle,
  Loading,
  Success,
  Failure,
}

#[derive(Debug)]
struct Target {
  endpoint: String,
  options: RequestOptions,
  key: CacheKey,
}

impl Target {
  fn new(endpoint: String, options: RequestOptions) -> Self {
    let key = options.cache_key(&endpoint);
    Self {
      endpoint,
      options,
      key,
    }
  }
}

enum Step<T> {
  /// Settled without a network call (cache hit or invalid request)
  Done(Result<Arc<T>, FetchError>),
  Pending {
    generation: u64,
    endpoint: String,
    options: RequestOptions,
  },
}

struct Inner<T> {
  fetcher: Fetcher,
  target: RwLock<Target>,
  immediate: bool,
  state: watch::Sender<RequestState<T>>,
  generation: AtomicU64,
}

impl<T> Inner<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  fn begin(&self, force: bool) -> Step<T> {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (endpoint, options, key) = {
      let target = self.target.read().unwrap_or_else(PoisonError::into_inner);
      (target.endpoint.clone(), target.options.clone(), target.key.clone())
    };

    if endpoint.trim().is_empty() {
      let result = Err(FetchError::invalid("endpoint must not be empty"));
      self.settle(generation, result.clone());
      return Step::Done(result);
    }

    if !force {
      if let Some(hit) = self.fetcher.cached(&endpoint, &options) {
        let result = self.fetcher.decode_or_evict::<T>(&key, &hit.data).map(Arc::new);
        self.settle(generation, result.clone());
        return Step::Done(result);
      }
    }

    self.state.send_modify(RequestState::start);
    Step::Pending {
      generation,
      endpoint,
      options,
    }
  }

  async fn complete(
    &self,
    generation: u64,
    endpoint: String,
    options: RequestOptions,
    force: bool,
  ) -> Result<Arc<T>, FetchError> {
    let result = match self.fetcher.request(&endpoint, &options, force).await {
      Ok(response) => self
        .fetcher
        .decode_or_evict::<T>(&options.cache_key(&endpoint), &response.data)
        .map(Arc::new),
      Err(e) => Err(e),
    };
    self.settle(generation, result.clone());
    result
  }

  /// Run the network leg on its own task so it settles even if nobody awaits it.
  fn launch(
    self: &Arc<Self>,
    generation: u64,
    endpoint: String,
    options: RequestOptions,
    force: bool,
  ) -> JoinHandle<Result<Arc<T>, FetchError>> {
    let inner = Arc::clone(self);
    tokio::spawn(async move { inner.complete(generation, endpoint, options, force).await })
  }

  /// Apply a result unless a newer fetch has started since `generation`.
  fn settle(&self, generation: u64, result: Result<Arc<T>, FetchError>) -> bool {
    self.state.send_if_modified(|state| {
      if self.generation.load(Ordering::SeqCst) != generation {
        debug!(generation, "ignoring superseded response");
        return false;
      }
      match result {
        Ok(data) => state.succeed(data),
        Err(e) => state.fail(e),
      }
      true
    })
  }
}

/// Handle to one call site's request. Clones share state.
pub struct Query<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for Query<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> Query<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  pub(crate) fn new(fetcher: Fetcher, endpoint: String, options: RequestOptions, immediate: bool) -> Self {
    let (state, _) = watch::channel(RequestState::default());
    let query = Self {
      inner: Arc::new(Inner {
        fetcher,
        target: RwLock::new(Target::new(endpoint, options)),
        immediate,
        state,
        generation: AtomicU64::new(0),
      }),
    };

    if immediate {
      query.fetch();
    }
    query
  }

  /// Start a fetch in the background, using the cache when it can.
  ///
  /// A fresh cache entry settles the state before this returns.
  pub fn fetch(&self) {
    self.spawn(false);
  }

  /// Fetch again and wait for the outcome. With `force` the cache is
  /// skipped (the response is still stored).
  ///
  /// Dropping the returned future stops the wait, not the request: the state
  /// still settles when the response arrives.
  pub async fn refetch(&self, force: bool) -> Result<Arc<T>, FetchError> {
    let handle = match self.inner.begin(force) {
      Step::Done(result) => return result,
      Step::Pending {
        generation,
        endpoint,
        options,
      } => self.inner.launch(generation, endpoint, options, force),
    };

    match handle.await {
      Ok(result) => result,
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(e) => Err(FetchError::Transport {
        message: format!("request task stopped: {}", e),
      }),
    }
  }

  fn spawn(&self, force: bool) {
    if let Step::Pending {
      generation,
      endpoint,
      options,
    } = self.inner.begin(force)
    {
      drop(self.inner.launch(generation, endpoint, options, force));
    }
  }

  /// Replace the options. Returns whether the cache key changed; if it did
  /// and the query is immediate, a fetch starts.
  pub fn set_options(&self, options: RequestOptions) -> bool {
    let endpoint = self.endpoint();
    self.retarget(endpoint, options)
  }

  /// Replace endpoint and options, with the same re-fetch rule as
  /// [`set_options`](Self::set_options).
  pub fn retarget(&self, endpoint: impl Into<String>, options: RequestOptions) -> bool {
    let target = Target::new(endpoint.into(), options);
    let changed = {
      let mut current = self.inner.target.write().unwrap_or_else(PoisonError::into_inner);
      let changed = current.key != target.key;
      *current = target;
      changed
    };

    if changed && self.inner.immediate {
      self.fetch();
    }
    changed
  }

  /// Snapshot of the current state.
  pub fn state(&self) -> RequestState<T> {
    self.inner.state.borrow().clone()
  }

  pub fn data(&self) -> Option<Arc<T>> {
    self.inner.state.borrow().data.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.inner.state.borrow().loading
  }

  pub fn error(&self) -> Option<FetchError> {
    self.inner.state.borrow().error.clone()
  }

  pub fn phase(&self) -> Phase {
    self.inner.state.borrow().phase()
  }

  /// Cache key of the current target.
  pub fn key(&self) -> CacheKey {
    self
      .inner
      .target
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .key
      .clone()
  }

  pub fn endpoint(&self) -> String {
    self
      .inner
      .target
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .endpoint
      .clone()
  }

  /// Receive every state transition from now on.
  pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
    self.inner.state.subscribe()
  }

  /// Wait until no fetch is loading and return that state.
  pub async fn settled(&self) -> RequestState<T> {
    let mut rx = self.inner.state.subscribe();
    let settled = rx.wait_for(|state| !state.loading).await.map(|state| (*state).clone());
    settled.unwrap_or_else(|_| self.state())
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &*self.inner.state.borrow())
      .field("immediate", &self.inner.immediate)
      .field("generation", &self.inner.generation.load(Ordering::SeqCst))
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ApiClient;
  use crate::cache::{CacheLayer, MemoryStorage};
  use crate::config::ApiConfig;
  use crate::session::MemorySession;
  use serde_json::{json, Value};

  fn fetcher() -> Fetcher {
    let client = ApiClient::new(&ApiConfig::default(), Arc::new(MemorySession::new())).expect("client");
    Fetcher::new(client, CacheLayer::new(MemoryStorage::new()))
  }

  fn seed(fetcher: &Fetcher, endpoint: &str, options: &RequestOptions, value: Value) {
    fetcher.cache().store(
      &options.cache_key(endpoint),
      Arc::new(value),
      fetcher.default_cache_time(),
    );
  }

  #[test]
  fn test_phase() {
    let mut state = RequestState::<u32>::default();
    assert_eq!(state.phase(), Phase::Idle);

    state.start();
    assert_eq!(state.phase(), Phase::Loading);

    state.succeed(Arc::new(1));
    assert_eq!(state.phase(), Phase::Success);

    state.start();
    assert_eq!(state.data.as_deref(), Some(&1));

    state.fail(FetchError::invalid("x"));
    assert_eq!(state.phase(), Phase::Failure);
    assert!(state.data.is_none());
  }

  #[tokio::test]
  async fn test_immediate_cache_hit_settles_synchronously() {
    let fetcher = fetcher();
    seed(&fetcher, "/notebooks", &RequestOptions::get(), json!(["a", "b"]));

    let query = fetcher.query::<Vec<String>>("/notebooks", RequestOptions::get(), true);

    let state = query.state();
    assert!(!state.loading);
    assert_eq!(state.data.as_deref(), Some(&vec!["a".to_string(), "b".to_string()]));
  }

  #[tokio::test]
  async fn test_deferred_query_stays_idle() {
    let fetcher = fetcher();
    seed(&fetcher, "/notebooks", &RequestOptions::get(), json!([]));

    let query = fetcher.query::<Vec<String>>("/notebooks", RequestOptions::get(), false);
    assert_eq!(query.phase(), Phase::Idle);

    let data = query.refetch(false).await.expect("cached data");
    assert!(data.is_empty());
    assert_eq!(query.phase(), Phase::Success);
  }

  #[tokio::test]
  async fn test_empty_endpoint_populates_error() {
    let query = fetcher().query::<Value>("", RequestOptions::get(), true);

    assert!(matches!(query.error(), Some(FetchError::InvalidRequest { .. })));
    assert!(!query.is_loading());
  }

  #[tokio::test]
  async fn test_cached_value_of_wrong_shape_is_decode_error() {
    let fetcher = fetcher();
    seed(&fetcher, "/users/me", &RequestOptions::get(), json!("not a number"));

    let query = fetcher.query::<u64>("/users/me", RequestOptions::get(), false);
    let err = query.refetch(false).await.unwrap_err();

    assert!(matches!(err, FetchError::Decode { .. }));
    assert_eq!(query.phase(), Phase::Failure);
    assert!(fetcher.cache().is_empty());
  }

  #[tokio::test]
  async fn test_set_options_refetches_only_on_key_change() {
    let fetcher = fetcher();
    let page1 = RequestOptions::get().param("page", 1);
    let page2 = RequestOptions::get().param("page", 2);
    seed(&fetcher, "/notebooks", &page1, json!(1));
    seed(&fetcher, "/notebooks", &page2, json!(2));

    let query = fetcher.query::<u32>("/notebooks", page1.clone(), true);
    assert_eq!(query.data().as_deref(), Some(&1));

    assert!(!query.set_options(page1.header("X-Trace", "1")));
    assert_eq!(query.data().as_deref(), Some(&1));

    assert!(query.set_options(page2.clone()));
    assert_eq!(query.data().as_deref(), Some(&2));
    assert_eq!(query.key(), page2.cache_key("/notebooks"));
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let fetcher = fetcher();
    seed(&fetcher, "/notebooks", &RequestOptions::get(), json!(7));

    let query = fetcher.query::<u32>("/notebooks", RequestOptions::get(), false);
    let mut rx = query.subscribe();

    query.fetch();
    rx.changed().await.expect("state should change");
    assert_eq!(rx.borrow().data.as_deref(), Some(&7));
  }
}
