//! Error types for `splitbar-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no traffic configured: variant weights sum to zero")]
  NoTrafficConfigured,

  #[error("batch of {size} events exceeds the maximum of {max}")]
  BatchTooLarge { size: usize, max: usize },

  #[error("invalid event: {0}")]
  InvalidEvent(String),

  #[error("invalid experiment: {0}")]
  InvalidExperiment(String),

  #[error("experiment not found: {0}")]
  ExperimentNotFound(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
