//! Session token storage.
//!
//! The token is read synchronously before every request and never refreshed
//! by the client itself; login writes it, logout clears it.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::warn;

/// Stored authentication token, serialized as `{token, expiresIn, createdAt}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
  pub token: Option<String>,
  /// Lifetime in milliseconds, as reported by the login endpoint
  #[serde(default)]
  pub expires_in: i64,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub created_at: Option<DateTime<Utc>>,
}

impl Token {
  pub fn new(token: impl Into<String>, expires_in: i64, created_at: DateTime<Utc>) -> Self {
    Self {
      token: Some(token.into()),
      expires_in,
      created_at: Some(created_at),
    }
  }

  /// When the token stops being valid, if that can be known.
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    match self.created_at {
      Some(created_at) if self.expires_in > 0 => {
        Some(created_at + Duration::milliseconds(self.expires_in))
      }
      _ => None,
    }
  }

  /// Present, non-empty and not past its expiry.
  pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
    let present = self.token.as_deref().is_some_and(|t| !t.is_empty());
    present && self.expires_at().map_or(true, |expires_at| now < expires_at)
  }
}

/// Where the session token lives between requests.
pub trait SessionStore: Send + Sync {
  fn load(&self) -> Option<Token>;

  fn save(&self, token: Token) -> Result<()>;

  fn clear(&self) -> Result<()>;

  /// Raw token for the `Authorization` header.
  fn bearer(&self) -> Option<String> {
    self
      .load()
      .and_then(|t| t.token)
      .filter(|t| !t.is_empty())
  }
}

/// Session kept only in process memory.
#[derive(Debug, Default)]
pub struct MemorySession {
  token: RwLock<Option<Token>>,
}

impl MemorySession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Session already holding a non-expiring token.
  pub fn with_token(token: impl Into<String>) -> Self {
    Self {
      token: RwLock::new(Some(Token {
        token: Some(token.into()),
        ..Token::default()
      })),
    }
  }
}

impl SessionStore for MemorySession {
  fn load(&self) -> Option<Token> {
    self.token.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  fn save(&self, token: Token) -> Result<()> {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    Ok(())
  }
}

/// Session persisted as a JSON file, read once at open.
#[derive(Debug)]
pub struct FileSession {
  path: PathBuf,
  current: RwLock<Option<Token>>,
}

impl FileSession {
  /// Open the session file at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(Self::default_path()?)
  }

  /// Open (but don't create) the session file at `path`.
  ///
  /// A file that can't be parsed is treated as "logged out".
  pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();

    let current = if path.exists() {
      let contents = std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
      match serde_json::from_str::<Token>(&contents) {
        Ok(token) => Some(token),
        Err(e) => {
          warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
          None
        }
      }
    } else {
      None
    };

    Ok(Self {
      path,
      current: RwLock::new(current),
    })
  }

  /// Get the default session path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("escruta").join("session.json"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn write_file(&self, token: &Token) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let data = serde_json::to_vec_pretty(token)
      .map_err(|e| eyre!("Failed to serialize session: {}", e))?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
      use std::os::unix::fs::OpenOptionsExt;
      options.mode(0o600);
    }

    let mut file = options
      .open(&self.path)
      .map_err(|e| eyre!("Failed to open session file {}: {}", self.path.display(), e))?;
    std::io::Write::write_all(&mut file, &data)
      .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;

    Ok(())
  }
}

impl SessionStore for FileSession {
  fn load(&self) -> Option<Token> {
    self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  fn save(&self, token: Token) -> Result<()> {
    self.write_file(&token)?;
    *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => {
        return Err(eyre!(
          "Failed to remove session file {}: {}",
          self.path.display(),
          e
        ))
      }
    }
    *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    Ok(())
  }
}
