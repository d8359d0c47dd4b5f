//! Failures surfaced by the fetch client.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Why a request produced no data.
///
/// Cloneable so it can sit in a [`RequestState`](crate::fetch::RequestState)
/// snapshot and still be returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The server could not be reached (offline, DNS, timeout, reset)
  #[error("request failed: {message}")]
  Transport { message: String },

  /// The server answered with a non-2xx status
  #[error("server responded with {status}: {message}")]
  Http { status: u16, message: String },

  /// A 2xx body could not be decoded into the requested type
  #[error("failed to decode response: {message}")]
  Decode { message: String },

  /// The request could not be built
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },
}

impl FetchError {
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::InvalidRequest {
      message: message.into(),
    }
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }

  /// Build an HTTP failure from a response status and raw body.
  ///
  /// The message is, in order: the body's `description` field, its `message`
  /// field, the body text when it isn't a JSON object, the status reason.
  pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
    Self::Http {
      status: status.as_u16(),
      message: extract_message(status, body),
    }
  }

  /// HTTP status, when the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Transport { message }
      | Self::Http { message, .. }
      | Self::Decode { message }
      | Self::InvalidRequest { message } => message,
    }
  }

  /// 401 or 403: the session token is missing, expired or not accepted.
  pub fn is_unauthorized(&self) -> bool {
    matches!(self.status(), Some(401) | Some(403))
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Self::decode(err.to_string())
    } else if err.is_builder() {
      Self::invalid(err.to_string())
    } else {
      Self::Transport {
        message: err.to_string(),
      }
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(err: serde_json::Error) -> Self {
    Self::decode(err.to_string())
  }
}

fn extract_message(status: StatusCode, body: &[u8]) -> String {
  let fallback = || {
    status
      .canonical_reason()
      .map(String::from)
      .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
  };

  match serde_json::from_slice::<Value>(body) {
    Ok(Value::Object(map)) => ["description", "message"]
      .iter()
      .filter_map(|field| map.get(*field).and_then(Value::as_str))
      .map(str::trim)
      .find(|text| !text.is_empty())
      .map(String::from)
      .unwrap_or_else(fallback),
    Ok(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
    _ => {
      let text = String::from_utf8_lossy(body);
      let text = text.trim();
      if text.is_empty() {
        fallback()
      } else {
        text.to_string()
      }
    }
  }
}
