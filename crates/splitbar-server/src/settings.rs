//! Layered server configuration: built-in defaults, then an optional TOML
//! file, then `SPLITBAR_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Duration;
use serde::Deserialize;
use splitbar_api::{AdminAuth, ApiConfig, DEFAULT_COOKIE_NAME};
use splitbar_core::{
  event::{DEFAULT_IMPRESSION_WINDOW_SECS, DEFAULT_MAX_BATCH_SIZE, EventPolicy},
  flag,
};

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                   String,
  #[serde(default = "default_port")]
  pub port:                   u16,
  #[serde(default = "default_store_path")]
  pub store_path:             PathBuf,
  #[serde(default = "default_max_batch_size")]
  pub max_batch_size:         usize,
  #[serde(default = "default_impression_window_secs")]
  pub impression_window_secs: i64,
  #[serde(default = "default_true", deserialize_with = "flag::deserialize_truthy")]
  pub coerce_click_aliases:   bool,
  #[serde(default = "default_cookie_name")]
  pub cookie_name:            String,
  pub admin_username:         Option<String>,
  pub admin_password_hash:    Option<String>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("splitbar.db") }
fn default_max_batch_size() -> usize { DEFAULT_MAX_BATCH_SIZE }
fn default_impression_window_secs() -> i64 { DEFAULT_IMPRESSION_WINDOW_SECS }
fn default_true() -> bool { true }
fn default_cookie_name() -> String { DEFAULT_COOKIE_NAME.to_string() }

impl ServerConfig {
  /// Load from `path` (which may be absent) overlaid with the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_source(config::File::from(path).required(false))
  }

  fn from_source<T>(file: T) -> anyhow::Result<Self>
  where
    T: config::Source + Send + Sync + 'static,
  {
    let settings = config::Config::builder()
      .add_source(file)
      .add_source(config::Environment::with_prefix("SPLITBAR"))
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn event_policy(&self) -> EventPolicy {
    EventPolicy {
      max_batch_size:       self.max_batch_size,
      impression_window:    Duration::seconds(self.impression_window_secs),
      coerce_click_aliases: self.coerce_click_aliases,
    }
  }

  pub fn api_config(&self) -> ApiConfig { ApiConfig { cookie_name: self.cookie_name.clone() } }

  /// Admin credentials, present only when both the username and hash are set.
  pub fn admin_auth(&self) -> Option<AdminAuth> {
    match (&self.admin_username, &self.admin_password_hash) {
      (Some(username), Some(hash)) if !username.is_empty() && !hash.is_empty() => Some(AdminAuth {
        username:      username.clone(),
        password_hash: hash.clone(),
      }),
      _ => None,
    }
  }
}
