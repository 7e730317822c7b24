//! Error types for `warden-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown channel type: {0:?}")]
  UnknownChannelType(String),

  #[error("invalid {channel_type} config: {reason}")]
  InvalidChannelConfig {
    channel_type: &'static str,
    reason:       String,
  },

  #[error("invalid ip address: {0:?}")]
  InvalidIp(String),

  #[error("geo lookup failed: {0}")]
  GeoLookup(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap any backend error as [`Error::Store`].
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
