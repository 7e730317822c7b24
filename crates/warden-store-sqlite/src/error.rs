//! Error type for `warden-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] warden_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown channel id: {0}")]
  ChannelNotFound(uuid::Uuid),

  /// Trust scores only ever move down.
  #[error("score penalty must not be negative, got {0}")]
  NegativePenalty(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
