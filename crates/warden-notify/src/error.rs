//! Delivery error types.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Why a single channel's delivery failed.
#[derive(Debug, Error)]
pub enum ChannelError {
  /// The stored configuration did not decode or validate.
  #[error("invalid configuration: {0}")]
  Config(#[from] warden_core::Error),

  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("endpoint returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("delivery cancelled")]
  Cancelled,
}

/// One failed channel, as reported in a [`DispatchError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
  pub channel_id:   Uuid,
  pub channel_name: String,
  pub error:        String,
}

/// Aggregate failure of a fan-out: every channel that did not succeed.
///
/// When the rule's channels could not be loaded at all, `failures` is empty
/// and `channel_lookup` carries the reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchError {
  pub failures:       Vec<ChannelFailure>,
  pub channel_lookup: Option<String>,
}

impl DispatchError {
  pub fn from_failures(failures: Vec<ChannelFailure>) -> Self {
    Self { failures, channel_lookup: None }
  }

  pub fn channel_lookup(reason: impl Into<String>) -> Self {
    Self { failures: Vec::new(), channel_lookup: Some(reason.into()) }
  }
}

impl fmt::Display for DispatchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(reason) = &self.channel_lookup {
      return write!(f, "could not load notification channels: {reason}");
    }
    write!(f, "{} notification channel(s) failed: ", self.failures.len())?;
    for (i, failure) in self.failures.iter().enumerate() {
      if i > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{} ({}): {}", failure.channel_name, failure.channel_id, failure.error)?;
    }
    Ok(())
  }
}

impl std::error::Error for DispatchError {}
