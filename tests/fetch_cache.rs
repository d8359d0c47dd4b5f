use chrono::Duration;
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

use escruta_client::api::{ApiClient, FetchError, Notebook, NotebooksApi};
use escruta_client::cache::{CacheLayer, ManualClock, MemoryStorage};
use escruta_client::config::ApiConfig;
use escruta_client::fetch::{Fetcher, Phase, RequestOptions, Upload};
use escruta_client::session::MemorySession;

fn fetcher(server: &MockServer, token: Option<&str>) -> (Fetcher, ManualClock) {
  let session = match token {
    Some(token) => MemorySession::with_token(token),
    None => MemorySession::new(),
  };
  let config = ApiConfig {
    url: server.base_url(),
    timeout_secs: 5,
  };
  let client = ApiClient::new(&config, Arc::new(session)).expect("client");
  let clock = ManualClock::default();
  let cache = CacheLayer::new(MemoryStorage::new()).with_clock(clock.clone());
  (Fetcher::new(client, cache), clock)
}

fn ttl_5s() -> RequestOptions {
  RequestOptions::get().cache_time(Duration::milliseconds(5000))
}

#[tokio::test]
async fn repeated_get_within_ttl_is_served_from_cache() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([{"id": "1", "title": "X"}]));
    })
    .await;
  let (fetcher, clock) = fetcher(&server, Some("t"));

  let first = fetcher.request("/notebooks", &ttl_5s(), false).await.expect("first");
  clock.advance(Duration::milliseconds(1000));
  let second = fetcher.request("/notebooks", &ttl_5s(), false).await.expect("second");

  mock.assert_calls_async(1).await;
  assert!(!first.is_cached());
  assert!(second.is_cached());
  assert!(Arc::ptr_eq(&first.data, &second.data));
  assert_eq!(*second.data, json!([{"id": "1", "title": "X"}]));
}

#[tokio::test]
async fn failed_post_writes_nothing_and_retry_hits_network() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when
        .method(POST)
        .path("/notebooks")
        .json_body(json!({"title": "Y"}));
      then.status(500).json_body(json!({"description": "Database unavailable"}));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Notebook>("/notebooks", RequestOptions::post(json!({"title": "Y"})), false);
  let err = query.refetch(false).await.unwrap_err();

  assert_eq!(err.status(), Some(500));
  assert_eq!(err.message(), "Database unavailable");
  let state = query.state();
  assert!(state.data.is_none());
  assert_eq!(state.error.as_ref().and_then(FetchError::status), Some(500));
  assert!(!state.loading);
  assert!(fetcher.cache().is_empty());

  query.refetch(false).await.unwrap_err();
  mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn stale_entry_triggers_fresh_request() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks/1");
      then.status(200).json_body(json!({"id": "1", "title": "X"}));
    })
    .await;
  let (fetcher, clock) = fetcher(&server, Some("t"));

  fetcher.request("/notebooks/1", &ttl_5s(), false).await.expect("first");
  clock.advance(Duration::milliseconds(6000));
  let again = fetcher.request("/notebooks/1", &ttl_5s(), false).await.expect("second");

  mock.assert_calls_async(2).await;
  assert!(!again.is_cached());
}

#[tokio::test]
async fn different_params_never_share_an_entry() {
  let server = MockServer::start_async().await;
  let asc = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks").query_param("sort", "asc");
      then.status(200).json_body(json!(["a", "b"]));
    })
    .await;
  let desc = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks").query_param("sort", "desc");
      then.status(200).json_body(json!(["b", "a"]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let asc_options = RequestOptions::get().param("sort", "asc");
  let desc_options = RequestOptions::get().param("sort", "desc");
  assert_ne!(asc_options.cache_key("/notebooks"), desc_options.cache_key("/notebooks"));

  let a = fetcher.request("/notebooks", &asc_options, false).await.expect("asc");
  let d = fetcher.request("/notebooks", &desc_options, false).await.expect("desc");
  let a_again = fetcher.request("/notebooks", &asc_options, false).await.expect("asc again");

  assert_eq!(*a.data, json!(["a", "b"]));
  assert_eq!(*d.data, json!(["b", "a"]));
  assert!(a_again.is_cached());
  asc.assert_calls_async(1).await;
  desc.assert_calls_async(1).await;
}

#[tokio::test]
async fn forced_request_bypasses_and_overwrites() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/users/me");
      then.status(200).json_body(json!({"id": "u", "fullName": "Ada"}));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));
  let options = RequestOptions::get();

  let first = fetcher.request("/users/me", &options, false).await.expect("first");
  let forced = fetcher.request("/users/me", &options, true).await.expect("forced");
  let cached = fetcher.request("/users/me", &options, false).await.expect("cached");

  mock.assert_calls_async(2).await;
  assert!(!forced.is_cached());
  assert!(cached.is_cached());
  assert!(!Arc::ptr_eq(&first.data, &cached.data));
  assert!(Arc::ptr_eq(&forced.data, &cached.data));
}

#[tokio::test]
async fn skip_cache_option_behaves_like_force() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  fetcher.request("/notebooks", &RequestOptions::get(), false).await.expect("first");
  fetcher
    .request("/notebooks", &RequestOptions::get().skip_cache(true), false)
    .await
    .expect("second");

  mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn zero_cache_time_never_stores() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));
  let options = RequestOptions::get().no_cache();

  fetcher.request("/notebooks", &options, false).await.expect("first");
  fetcher.request("/notebooks", &options, false).await.expect("second");

  mock.assert_calls_async(2).await;
  assert!(fetcher.cache().is_empty());
  assert!(fetcher.cached("/notebooks", &RequestOptions::get()).is_none());
}

#[tokio::test]
async fn bearer_and_json_content_type_are_sent() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when
        .method(GET)
        .path("/notebooks")
        .header("authorization", "Bearer t0k3n")
        .header("content-type", "application/json");
      then.status(200).json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t0k3n"));

  fetcher.request("/notebooks", &RequestOptions::get(), false).await.expect("request");
  mock.assert_async().await;
}

#[tokio::test]
async fn missing_token_omits_authorization() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks").header_missing("authorization");
      then.status(200).json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, None);

  fetcher.request("/notebooks", &RequestOptions::get(), false).await.expect("request");
  mock.assert_async().await;
}

#[tokio::test]
async fn caller_headers_override_computed_ones() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when
        .method(GET)
        .path("/notebooks")
        .header("content-type", "text/plain")
        .header("x-client", "cli")
        .header("authorization", "Bearer t");
      then.status(200).json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));
  let options = RequestOptions::get()
    .header("Content-Type", "text/plain")
    .header("X-Client", "cli");

  fetcher.request("/notebooks", &options, false).await.expect("request");
  mock.assert_async().await;
}

#[tokio::test]
async fn error_message_comes_from_description() {
  let server = MockServer::start_async().await;
  server
    .mock_async(|when, then| {
      when.method(GET).path("/users/me");
      then
        .status(401)
        .json_body(json!({"description": "The JWT token has expired", "status": 401}));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("old"));

  let err = fetcher
    .request("/users/me", &RequestOptions::get(), false)
    .await
    .unwrap_err();

  assert_eq!(
    err,
    FetchError::Http {
      status: 401,
      message: "The JWT token has expired".to_string()
    }
  );
  assert!(err.is_unauthorized());
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
  let (fetcher, _clock) = {
    let config = ApiConfig {
      url: "http://127.0.0.1:9".to_string(),
      timeout_secs: 2,
    };
    let client = ApiClient::new(&config, Arc::new(MemorySession::new())).expect("client");
    let clock = ManualClock::default();
    let cache = CacheLayer::new(MemoryStorage::new()).with_clock(clock.clone());
    (Fetcher::new(client, cache), clock)
  };

  let err = fetcher
    .request("/notebooks", &RequestOptions::get(), false)
    .await
    .unwrap_err();

  assert!(matches!(err, FetchError::Transport { .. }));
  assert_eq!(err.status(), None);
  assert!(fetcher.cache().is_empty());
}

#[tokio::test]
async fn plain_text_response_is_a_json_string() {
  let server = MockServer::start_async().await;
  server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks/nb/summary");
      then
        .status(200)
        .header("content-type", "text/plain")
        .body("A notebook about caches.");
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let result = fetcher
    .request("/notebooks/nb/summary", &RequestOptions::get(), false)
    .await
    .expect("summary");
  assert_eq!(*result.data, Value::String("A notebook about caches.".into()));
}

#[tokio::test]
async fn query_loads_immediately_and_settles() {
  let server = MockServer::start_async().await;
  server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([{"id": "1", "title": "X"}]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Vec<Notebook>>("/notebooks", RequestOptions::get(), true);
  assert!(query.is_loading());

  let state = query.settled().await;
  assert_eq!(state.phase(), Phase::Success);
  assert_eq!(state.data.as_ref().map(|n| n[0].title.as_str()), Some("X"));
  assert!(state.error.is_none());

  // A second call site for the same key is satisfied from the cache.
  let other = fetcher.query::<Vec<Notebook>>("/notebooks", RequestOptions::get(), true);
  assert!(!other.is_loading());
  assert_eq!(other.phase(), Phase::Success);
}

#[tokio::test]
async fn refetch_keeps_previous_data_while_loading() {
  let server = MockServer::start_async().await;
  server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then
        .status(200)
        .delay(std::time::Duration::from_millis(100))
        .json_body(json!([]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Vec<Notebook>>("/notebooks", RequestOptions::get(), false);
  query.refetch(false).await.expect("first");

  let mut rx = query.subscribe();
  let pending = tokio::spawn({
    let query = query.clone();
    async move { query.refetch(true).await }
  });

  rx.wait_for(|state| state.loading).await.expect("loading state");
  assert!(query.state().data.is_some());

  pending.await.expect("join").expect("second");
  assert!(!query.is_loading());
}

#[tokio::test]
async fn only_the_latest_started_fetch_settles_state() {
  let server = MockServer::start_async().await;
  let slow = server
    .mock_async(|when, then| {
      when.method(GET).path("/slow");
      then
        .status(200)
        .delay(std::time::Duration::from_millis(300))
        .json_body(json!(1));
    })
    .await;
  server
    .mock_async(|when, then| {
      when.method(GET).path("/fast");
      then.status(200).json_body(json!(2));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<u32>("/slow", RequestOptions::get(), false);
  query.fetch();
  assert!(query.retarget("/fast", RequestOptions::get()));

  let latest = query.refetch(false).await.expect("fast");
  assert_eq!(*latest, 2);

  tokio::time::sleep(std::time::Duration::from_millis(600)).await;
  slow.assert_calls_async(1).await;
  assert_eq!(query.data().as_deref(), Some(&2));
  // The superseded request still populated the shared cache.
  assert!(fetcher.cached("/slow", &RequestOptions::get()).is_some());
}

#[tokio::test]
async fn abandoned_refetch_still_settles_state() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then
        .status(200)
        .delay(std::time::Duration::from_millis(500))
        .json_body(json!([{"id": "1", "title": "X"}]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Vec<Notebook>>("/notebooks", RequestOptions::get(), false);
  let waited = tokio::time::timeout(std::time::Duration::from_millis(50), query.refetch(false)).await;
  assert!(waited.is_err());
  assert!(query.is_loading());

  let state = tokio::time::timeout(std::time::Duration::from_secs(3), query.settled())
    .await
    .expect("state should settle after the caller stopped waiting");

  assert!(!state.loading);
  assert_eq!(state.phase(), Phase::Success);
  assert_eq!(state.data.map(|notebooks| notebooks.len()), Some(1));
  assert!(fetcher.cached("/notebooks", &RequestOptions::get()).is_some());
  mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn undecodable_body_is_not_replayed_from_cache() {
  let server = MockServer::start_async().await;
  let mock = server
    .mock_async(|when, then| {
      when.method(GET).path("/users/me");
      then.status(200).json_body(json!({"unexpected": true}));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Vec<Notebook>>("/users/me", RequestOptions::get(), false);
  let err = query.refetch(false).await.unwrap_err();
  assert!(matches!(err, FetchError::Decode { .. }));
  assert!(fetcher.cached("/users/me", &RequestOptions::get()).is_none());

  query.refetch(false).await.unwrap_err();
  let direct = fetcher
    .request_as::<Vec<Notebook>>("/users/me", &RequestOptions::get(), false)
    .await;
  assert!(matches!(direct, Err(FetchError::Decode { .. })));

  mock.assert_calls_async(3).await;
  assert!(fetcher.cache().is_empty());
}

#[tokio::test]
async fn set_options_with_new_key_refetches() {
  let server = MockServer::start_async().await;
  let page1 = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks").query_param("page", "1");
      then.status(200).json_body(json!([1]));
    })
    .await;
  let page2 = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks").query_param("page", "2");
      then.status(200).json_body(json!([2]));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));

  let query = fetcher.query::<Vec<u32>>("/notebooks", RequestOptions::get().param("page", 1), true);
  query.settled().await;

  assert!(!query.set_options(RequestOptions::get().param("page", "1")));
  assert!(query.set_options(RequestOptions::get().param("page", 2)));
  let state = query.settled().await;

  assert_eq!(state.data.as_deref(), Some(&vec![2]));
  page1.assert_calls_async(1).await;
  page2.assert_calls_async(1).await;
}

#[tokio::test]
async fn multipart_upload_sends_file_and_fields_and_invalidates_list() {
  let server = MockServer::start_async().await;
  let list = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks/nb/sources");
      then.status(200).json_body(json!([]));
    })
    .await;
  let upload = server
    .mock_async(|when, then| {
      when
        .method(POST)
        .path("/notebooks/nb/sources/upload")
        .header("authorization", "Bearer t")
        .body_includes("filename=\"notes.txt\"")
        .body_includes("name=\"title\"")
        .body_includes("Lecture notes")
        .body_includes("name=\"aiConverter\"");
      then.status(201).json_body(json!({
        "id": "s-1",
        "notebookId": "nb",
        "title": "Lecture notes",
        "link": "notes.txt"
      }));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));
  let api = NotebooksApi::new(fetcher.clone());

  api.sources("nb", false).await.expect("initial list");
  let source = api
    .upload_source(
      "nb",
      "Lecture notes",
      None,
      Upload::new("notes.txt", b"caching 101".to_vec()).with_mime("text/plain"),
      false,
    )
    .await
    .expect("upload");
  api.sources("nb", false).await.expect("list after upload");

  assert_eq!(source.id, "s-1");
  upload.assert_async().await;
  list.assert_calls_async(2).await;
}

#[tokio::test]
async fn writes_invalidate_cached_lists() {
  let server = MockServer::start_async().await;
  let list = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([]));
    })
    .await;
  let create = server
    .mock_async(|when, then| {
      when
        .method(POST)
        .path("/notebooks")
        .json_body(json!({"title": "New"}));
      then.status(201).json_body(json!({"id": "nb", "title": "New"}));
    })
    .await;
  let delete = server
    .mock_async(|when, then| {
      when.method(DELETE).path("/notebooks").json_body(json!({"id": "nb"}));
      then.status(200).json_body(json!({"id": "nb", "title": "New"}));
    })
    .await;
  let (fetcher, _clock) = fetcher(&server, Some("t"));
  let api = NotebooksApi::new(fetcher);

  api.notebooks(false).await.expect("list");
  api.notebooks(false).await.expect("cached list");
  list.assert_calls_async(1).await;

  let created = api
    .create_notebook(&escruta_client::api::NewNotebook {
      icon: None,
      title: "New".into(),
    })
    .await
    .expect("create");
  api.notebooks(false).await.expect("list after create");
  list.assert_calls_async(2).await;

  api.delete_notebook(&created.id).await.expect("delete");
  api.notebooks(false).await.expect("list after delete");

  create.assert_async().await;
  delete.assert_async().await;
  list.assert_calls_async(3).await;
}
