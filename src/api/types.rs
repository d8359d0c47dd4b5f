//! Wire types for the Escruta API.
//!
//! Fields follow the server's camelCase JSON. Ids are UUID strings and kept
//! as `String`; timestamps may arrive as epoch milliseconds or ISO strings.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub full_name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
  pub id: String,
  #[serde(default)]
  pub user: Option<User>,
  #[serde(default)]
  pub icon: Option<String>,
  pub title: String,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

/// A notebook together with its notes and sources (`GET notebooks/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookContent {
  #[serde(flatten)]
  pub notebook: Notebook,
  #[serde(default)]
  pub notes: Vec<Note>,
  #[serde(default)]
  pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
  pub id: String,
  #[serde(default)]
  pub notebook_id: Option<String>,
  #[serde(default)]
  pub source_id: Option<String>,
  #[serde(default)]
  pub icon: Option<String>,
  pub title: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
  pub id: String,
  #[serde(default)]
  pub notebook_id: Option<String>,
  #[serde(default)]
  pub icon: Option<String>,
  pub title: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default)]
  pub summary: Option<String>,
  #[serde(default)]
  pub link: Option<String>,
  #[serde(default)]
  pub is_converted_by_ai: bool,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub email: String,
  pub password: String,
  pub full_name: String,
}

/// Returned by both `/login` and `/register`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub token: String,
  /// Token lifetime in milliseconds
  #[serde(default)]
  pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewNotebook {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotebookUpdate {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewNote {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteUpdate {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

/// A web source added by link.
#[derive(Debug, Clone, Serialize)]
pub struct NewSource {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  pub title: String,
  pub link: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
  pub user_input: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
  pub content: String,
  #[serde(default)]
  pub conversation_id: Option<String>,
  #[serde(default)]
  pub cited_sources: Vec<CitedSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CitedSource {
  pub id: String,
  #[serde(default)]
  pub title: Option<String>,
}

/// Suggested questions for a notebook, either a bare list or `{"questions": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExampleQuestions {
  List(Vec<String>),
  Wrapped { questions: Vec<String> },
}

impl ExampleQuestions {
  pub fn into_vec(self) -> Vec<String> {
    match self {
      Self::List(questions) | Self::Wrapped { questions } => questions,
    }
  }
}

/// Accept epoch milliseconds, RFC 3339, or a zone-less `YYYY-MM-DDTHH:MM:SS[.f]`
/// (read as UTC). Anything else becomes `None`.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Millis(i64),
    Float(f64),
    Text(String),
  }

  let parsed = match Option::<Raw>::deserialize(deserializer)? {
    Some(Raw::Millis(ms)) => Utc.timestamp_millis_opt(ms).single(),
    Some(Raw::Float(ms)) => Utc.timestamp_millis_opt(ms as i64).single(),
    Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
      .map(|dt| dt.with_timezone(&Utc))
      .ok()
      .or_else(|| {
        NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
          .ok()
          .map(|naive| naive.and_utc())
      }),
    None => None,
  };
  Ok(parsed)
}
