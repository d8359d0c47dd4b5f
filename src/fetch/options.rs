//! Per-request configuration.

use chrono::Duration;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::cache::CacheKey;

/// Cache time used when a request does not set one: five minutes.
pub const DEFAULT_CACHE_TIME_MS: i64 = 300_000;

pub fn default_cache_time() -> Duration {
  Duration::milliseconds(DEFAULT_CACHE_TIME_MS)
}

/// HTTP methods the API uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A file sent as `multipart/form-data`, plus any text fields beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
  /// Form field holding the file (the API expects `file`)
  pub field: String,
  pub file_name: String,
  pub content: Vec<u8>,
  /// Explicit MIME type for the file part
  pub mime: Option<String>,
  /// Additional text fields
  pub fields: BTreeMap<String, String>,
}

impl Upload {
  pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
    Self {
      field: "file".to_string(),
      file_name: file_name.into(),
      content,
      mime: None,
      fields: BTreeMap::new(),
    }
  }

  pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
    self.mime = Some(mime.into());
    self
  }

  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }

  /// What the cache key sees of an upload: its text fields, the file name and size.
  fn key_value(&self) -> Value {
    let mut map: Map<String, Value> = self
      .fields
      .iter()
      .map(|(k, v)| (k.clone(), Value::String(v.clone())))
      .collect();
    map.insert(
      self.field.clone(),
      json!({ "fileName": self.file_name, "size": self.content.len() }),
    );
    Value::Object(map)
  }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
  Json(Value),
  Multipart(Upload),
}

/// Options for one request.
///
/// `cache_time` left unset means "use the fetcher's default", which is
/// [`DEFAULT_CACHE_TIME_MS`] unless configured otherwise. A non-positive cache
/// time disables caching for the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
  pub method: Method,
  pub params: BTreeMap<String, String>,
  pub body: Option<RequestBody>,
  pub headers: BTreeMap<String, String>,
  pub cache_time: Option<Duration>,
  pub skip_cache: bool,
}

impl RequestOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get() -> Self {
    Self::default()
  }

  pub fn post(body: Value) -> Self {
    Self::new().method(Method::Post).json(body)
  }

  pub fn put(body: Value) -> Self {
    Self::new().method(Method::Put).json(body)
  }

  pub fn delete() -> Self {
    Self::new().method(Method::Delete)
  }

  pub fn method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    self.params.insert(name.into(), value.to_string());
    self
  }

  pub fn json(mut self, body: Value) -> Self {
    self.body = Some(RequestBody::Json(body));
    self
  }

  pub fn upload(mut self, upload: Upload) -> Self {
    self.body = Some(RequestBody::Multipart(upload));
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = Some(cache_time);
    self
  }

  /// Never read or write the cache for this request.
  pub fn no_cache(self) -> Self {
    self.cache_time(Duration::zero())
  }

  pub fn skip_cache(mut self, skip: bool) -> Self {
    self.skip_cache = skip;
    self
  }

  pub fn effective_cache_time(&self, fallback: Duration) -> Duration {
    self.cache_time.unwrap_or(fallback)
  }

  /// Key of the cache slot this request maps to.
  pub fn cache_key(&self, endpoint: &str) -> CacheKey {
    let params = Value::Object(
      self
        .params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect(),
    );
    let body = match &self.body {
      None | Some(RequestBody::Json(Value::Null)) => json!({}),
      Some(RequestBody::Json(value)) => value.clone(),
      Some(RequestBody::Multipart(upload)) => upload.key_value(),
    };
    CacheKey::new(self.method.as_str(), endpoint, &params, &body)
  }
}
