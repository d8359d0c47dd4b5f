use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::api::error::FetchError;
use crate::config::ApiConfig;
use crate::fetch::{RequestBody, RequestOptions, Upload};
use crate::session::SessionStore;

const USER_AGENT: &str = concat!("escruta-client/", env!("CARGO_PKG_VERSION"));

/// Escruta API client wrapper
///
/// Every request carries `Authorization: Bearer <token>` with the token read
/// from the session store at send time. No caching happens here; see
/// [`Fetcher`](crate::fetch::Fetcher).
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  session: Arc<dyn SessionStore>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
    let base_url = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      session,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn session(&self) -> &Arc<dyn SessionStore> {
    &self.session
  }

  /// Join `endpoint` onto the base URL and append the query parameters.
  ///
  /// Leading slashes on the endpoint are ignored so a base URL with a path
  /// prefix (`https://host/api`) keeps it.
  pub fn url(&self, endpoint: &str, options: &RequestOptions) -> Result<Url, FetchError> {
    if endpoint.trim().is_empty() {
      return Err(FetchError::invalid("endpoint must not be empty"));
    }

    let base = self.base_url.as_str().trim_end_matches('/');
    let path = endpoint.trim().trim_start_matches('/');
    let mut url = Url::parse(&format!("{}/{}", base, path))
      .map_err(|e| FetchError::invalid(format!("bad endpoint {}: {}", endpoint, e)))?;

    if !options.params.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in &options.params {
        pairs.append_pair(name, value);
      }
    }

    Ok(url)
  }

  /// Computed headers with the caller's merged on top.
  ///
  /// JSON requests get `Content-Type: application/json`; multipart requests
  /// leave it to the form encoder. A caller-supplied header of the same name
  /// replaces the computed one.
  fn headers(&self, options: &RequestOptions) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();

    if let Some(token) = self.session.bearer() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| FetchError::invalid(format!("bad session token: {}", e)))?;
      headers.insert(AUTHORIZATION, value);
    }

    if !matches!(options.body, Some(RequestBody::Multipart(_))) {
      headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    for (name, value) in &options.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| FetchError::invalid(format!("bad header name {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| FetchError::invalid(format!("bad value for header {}: {}", name, e)))?;
      headers.insert(name, value);
    }

    Ok(headers)
  }

  /// Send one request and decode the response body.
  ///
  /// Empty bodies decode to `null`; bodies that aren't JSON are returned as
  /// a JSON string.
  #[instrument(skip(self, options), fields(method = %options.method))]
  pub async fn send(&self, endpoint: &str, options: &RequestOptions) -> Result<Value, FetchError> {
    let url = self.url(endpoint, options)?;
    let headers = self.headers(options)?;

    let mut request = self.http.request(options.method.into(), url);
    request = match &options.body {
      Some(RequestBody::Json(body)) => request.body(serde_json::to_vec(body)?),
      Some(RequestBody::Multipart(upload)) => request.multipart(multipart_form(upload)?),
      None => request,
    };
    // After the body so explicit caller headers win over the form's content type.
    request = request.headers(headers);

    let response = request.send().await.map_err(|e| {
      warn!(endpoint, error = %e, "request failed");
      FetchError::from(e)
    })?;

    let status = response.status();
    let body = response.bytes().await?;
    debug!(endpoint, %status, bytes = body.len(), "response received");

    if !status.is_success() {
      let err = FetchError::from_response(status, &body);
      warn!(endpoint, %status, error = %err, "server returned an error");
      return Err(err);
    }

    Ok(decode_body(&body))
  }
}

impl std::fmt::Debug for ApiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApiClient")
      .field("base_url", &self.base_url.as_str())
      .finish_non_exhaustive()
  }
}

fn multipart_form(upload: &Upload) -> Result<Form, FetchError> {
  let mut part = Part::bytes(upload.content.clone()).file_name(upload.file_name.clone());
  if let Some(mime) = &upload.mime {
    part = part
      .mime_str(mime)
      .map_err(|e| FetchError::invalid(format!("bad mime type {}: {}", mime, e)))?;
  }

  let mut form = Form::new().part(upload.field.clone(), part);
  for (name, value) in &upload.fields {
    form = form.text(name.clone(), value.clone());
  }
  Ok(form)
}

fn decode_body(body: &[u8]) -> Value {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Value::Null;
  }
  serde_json::from_slice(body)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
