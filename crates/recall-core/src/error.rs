//! Error types for `recall-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required key resolved to nothing through env, config file and
  /// defaults.
  #[error("missing config key: {0}")]
  MissingConfig(String),

  #[error("invalid value for config key {key}: {value:?}")]
  InvalidConfig { key: String, value: String },

  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("invalid record: {0}")]
  InvalidRecord(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
