//! Cache keys for API requests.

use serde_json::Value;
use std::fmt;

/// Identifies one cached response.
///
/// The key is `method:endpoint:params:body`, where params and body are
/// rendered as canonical JSON (object keys sorted at every depth). Two
/// requests that differ only in the order of their object keys share a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(method: &str, endpoint: &str, params: &Value, body: &Value) -> Self {
    let params = canonical_json(params);
    let body = canonical_json(body);

    let mut key = String::with_capacity(method.len() + endpoint.len() + params.len() + body.len() + 3);
    key.push_str(method);
    key.push(':');
    key.push_str(endpoint);
    key.push(':');
    key.push_str(&params);
    key.push(':');
    key.push_str(&body);

    Self(key)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Render JSON with object keys sorted recursively.
///
/// `serde_json`'s own ordering depends on whether some crate in the build
/// enabled `preserve_order`, so the sort is done here explicitly.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (name, item)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(name.clone()).to_string());
        out.push(':');
        write_canonical(item, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
