use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::fetch::DEFAULT_CACHE_TIME_MS;

/// Environment variable overriding `api.url`.
pub const BACKEND_URL_ENV: &str = "ESCRUTA_BACKEND_URL";

const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every endpoint is joined onto
  #[serde(default = "default_url", deserialize_with = "deserialize_base_url")]
  pub url: String,
  /// Whole-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, responses are never cached
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Cache time for requests that don't set their own
  #[serde(default = "default_ttl_ms")]
  pub ttl_ms: i64,
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::milliseconds(self.ttl_ms)
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_ms: default_ttl_ms(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
  /// Session file (defaults to $XDG_DATA_HOME/escruta/session.json)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive; RUST_LOG takes precedence
  #[serde(default = "default_level")]
  pub level: String,
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      directory: None,
    }
  }
}

fn default_url() -> String {
  DEFAULT_BACKEND_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

fn default_ttl_ms() -> i64 {
  DEFAULT_CACHE_TIME_MS
}

fn default_level() -> String {
  "info".to_string()
}

fn deserialize_base_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let url = String::deserialize(deserializer)?;
  Ok(url.trim().trim_end_matches('/').to_string())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./escruta.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/escruta/config.yaml
  ///
  /// With no file anywhere the defaults are used. Environment overrides are
  /// applied last.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.apply_env_from(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("escruta.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("escruta").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse a YAML document. An empty document yields the defaults.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Apply environment overrides using `lookup` to read variables.
  pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = lookup(BACKEND_URL_ENV).filter(|u| !u.trim().is_empty()) {
      self.api.url = url.trim().trim_end_matches('/').to_string();
    }
    self
  }
}
