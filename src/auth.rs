//! Login, registration and logout on top of the fetcher and session store.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::{info, instrument};

use crate::api::{FetchError, LoginRequest, LoginResponse, RegisterRequest, User};
use crate::fetch::{decode, Fetcher, RequestOptions};
use crate::session::{SessionStore, Token};

const LOGIN: &str = "/login";
const REGISTER: &str = "/register";
const CURRENT_USER: &str = "/users/me";

#[derive(Clone, Debug)]
pub struct AuthService {
  fetcher: Fetcher,
}

impl AuthService {
  pub fn new(fetcher: Fetcher) -> Self {
    Self { fetcher }
  }

  fn session(&self) -> &dyn SessionStore {
    self.fetcher.client().session().as_ref()
  }

  /// Exchange credentials for a token and store it.
  ///
  /// Cached responses belong to whoever was logged in before, so the cache
  /// is cleared once the new token is saved.
  #[instrument(skip(self, password))]
  pub async fn login(&self, email: &str, password: &str) -> Result<Token> {
    let body = serde_json::to_value(LoginRequest {
      email: email.to_string(),
      password: password.to_string(),
    })?;
    let token = self.authenticate(LOGIN, body).await?;
    info!(email, "logged in");
    Ok(token)
  }

  /// Create an account. The server logs the new user in right away.
  #[instrument(skip(self, password))]
  pub async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<Token> {
    let body = serde_json::to_value(RegisterRequest {
      email: email.to_string(),
      password: password.to_string(),
      full_name: full_name.to_string(),
    })?;
    let token = self.authenticate(REGISTER, body).await?;
    info!(email, "registered");
    Ok(token)
  }

  async fn authenticate(&self, endpoint: &str, body: Value) -> Result<Token> {
    let result = self
      .fetcher
      .request(endpoint, &RequestOptions::post(body).no_cache(), true)
      .await
      .map_err(|e| eyre!("Authentication failed: {}", e.message()))?;
    let response: LoginResponse =
      decode(&result.data).map_err(|e| eyre!("Unexpected authentication response: {}", e))?;

    let token = Token::new(response.token, response.expires_in, self.fetcher.cache().now());
    self.session().save(token.clone())?;
    self.fetcher.clear_cache(None);
    Ok(token)
  }

  /// The logged-in user, through the cache.
  pub async fn current_user(&self, force: bool) -> Result<User, FetchError> {
    let result = self
      .fetcher
      .request_as::<User>(CURRENT_USER, &RequestOptions::get(), force)
      .await?;
    Ok(result.data)
  }

  /// Whether a stored token exists and has not expired.
  pub fn is_authenticated(&self) -> bool {
    self
      .session()
      .load()
      .is_some_and(|token| token.is_valid(self.fetcher.cache().now()))
  }

  /// Drop every cached response, then forget the token.
  pub fn logout(&self) -> Result<()> {
    let dropped = self.fetcher.clear_cache(None);
    self.session().clear()?;
    info!(dropped, "logged out");
    Ok(())
  }
}
