use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use escruta_client::api::ApiClient;
use escruta_client::auth::AuthService;
use escruta_client::cache::{CacheLayer, MemoryStorage};
use escruta_client::config::ApiConfig;
use escruta_client::fetch::{Fetcher, RequestOptions};
use escruta_client::session::{FileSession, MemorySession, SessionStore};

fn fetcher(server: &MockServer, session: Arc<dyn SessionStore>) -> Fetcher {
  let config = ApiConfig {
    url: server.base_url(),
    timeout_secs: 5,
  };
  let client = ApiClient::new(&config, session).expect("client");
  Fetcher::new(client, CacheLayer::new(MemoryStorage::new()))
}

#[tokio::test]
async fn login_stores_token_used_by_later_requests() {
  let server = MockServer::start_async().await;
  let login = server
    .mock_async(|when, then| {
      when
        .method(POST)
        .path("/login")
        .header_missing("authorization")
        .json_body(json!({"email": "ada@example.com", "password": "Secret123"}));
      then
        .status(200)
        .json_body(json!({"token": "jwt-1", "expiresIn": 3_600_000}));
    })
    .await;
  let me = server
    .mock_async(|when, then| {
      when
        .method(GET)
        .path("/users/me")
        .header("authorization", "Bearer jwt-1");
      then
        .status(200)
        .json_body(json!({"id": "u-1", "fullName": "Ada", "email": "ada@example.com"}));
    })
    .await;

  let session = Arc::new(MemorySession::new());
  let auth = AuthService::new(fetcher(&server, session.clone()));

  let token = auth
    .login("ada@example.com", "Secret123")
    .await
    .expect("login should succeed");

  assert_eq!(token.token.as_deref(), Some("jwt-1"));
  assert_eq!(token.expires_in, 3_600_000);
  assert!(token.created_at.is_some());
  assert_eq!(session.bearer().as_deref(), Some("jwt-1"));
  assert!(auth.is_authenticated());

  let user = auth.current_user(false).await.expect("current user");
  auth.current_user(false).await.expect("cached user");
  assert_eq!(user.full_name, "Ada");

  login.assert_async().await;
  me.assert_calls_async(1).await;
}

#[tokio::test]
async fn failed_login_keeps_session_empty() {
  let server = MockServer::start_async().await;
  server
    .mock_async(|when, then| {
      when.method(POST).path("/login");
      then.status(401).json_body(json!({"description": "Bad credentials"}));
    })
    .await;

  let session = Arc::new(MemorySession::new());
  let auth = AuthService::new(fetcher(&server, session.clone()));

  let err = auth
    .login("ada@example.com", "wrong")
    .await
    .expect_err("login should fail");

  assert!(err.to_string().contains("Bad credentials"));
  assert!(session.load().is_none());
  assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn register_logs_in() {
  let server = MockServer::start_async().await;
  let register = server
    .mock_async(|when, then| {
      when.method(POST).path("/register").json_body(json!({
        "email": "ada@example.com",
        "password": "Secret123",
        "fullName": "Ada Lovelace"
      }));
      then
        .status(201)
        .json_body(json!({"token": "jwt-new", "expiresIn": 60_000}));
    })
    .await;

  let session = Arc::new(MemorySession::new());
  let auth = AuthService::new(fetcher(&server, session.clone()));

  auth
    .register("ada@example.com", "Secret123", "Ada Lovelace")
    .await
    .expect("register should succeed");

  register.assert_async().await;
  assert_eq!(session.bearer().as_deref(), Some("jwt-new"));
}

#[tokio::test]
async fn logout_clears_cache_and_persisted_session() {
  let server = MockServer::start_async().await;
  let notebooks = server
    .mock_async(|when, then| {
      when.method(GET).path("/notebooks");
      then.status(200).json_body(json!([{"id": "1", "title": "Private"}]));
    })
    .await;

  let dir = TempDir::new().expect("Failed to create temp directory");
  let path = dir.path().join("session.json");
  let session = Arc::new(FileSession::open(&path).expect("open session"));
  session
    .save(escruta_client::session::Token::new("jwt", 0, chrono::Utc::now()))
    .expect("save session");

  let fetcher = fetcher(&server, session.clone());
  let auth = AuthService::new(fetcher.clone());

  fetcher
    .request("/notebooks", &RequestOptions::get(), false)
    .await
    .expect("list");
  assert!(fetcher.cached("/notebooks", &RequestOptions::get()).is_some());

  auth.logout().expect("logout");

  assert!(fetcher.cache().is_empty());
  assert!(fetcher.cached("/notebooks", &RequestOptions::get()).is_none());
  assert!(session.bearer().is_none());
  assert!(!path.exists());

  fetcher
    .request("/notebooks", &RequestOptions::get(), false)
    .await
    .expect("list after logout");
  notebooks.assert_calls_async(2).await;
}
