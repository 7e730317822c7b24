//! Notification channels and their per-type configuration.
//!
//! A channel row stores its `channel_type` discriminant and the raw JSON
//! configuration side by side. The raw form is kept so that a malformed row
//! can still be listed and is only rejected, per channel, when it is decoded
//! for delivery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Typed configuration ─────────────────────────────────────────────────────

/// Discord incoming-webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
  pub webhook_url: String,
}

/// Generic HTTP webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
  pub url:     String,
  /// HTTP method; `POST` when omitted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub method:  Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub headers: BTreeMap<String, String>,
}

impl WebhookConfig {
  pub fn method(&self) -> &str {
    self.method.as_deref().filter(|m| !m.is_empty()).unwrap_or("POST")
  }
}

/// Pushover application token and recipient key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushoverConfig {
  pub api_token: String,
  pub user_key:  String,
}

/// ntfy server and topic, with an optional access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfyConfig {
  pub server_url: String,
  pub topic:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token:      Option<String>,
}

/// Strongly-typed channel configuration, one variant per channel kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel_type", content = "config", rename_all = "lowercase")]
pub enum ChannelConfig {
  Discord(DiscordConfig),
  Webhook(WebhookConfig),
  Pushover(PushoverConfig),
  Ntfy(NtfyConfig),
}

/// Every discriminant accepted by [`ChannelConfig::from_parts`].
pub const CHANNEL_TYPES: [&str; 4] = ["discord", "webhook", "pushover", "ntfy"];

const WEBHOOK_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

impl ChannelConfig {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Discord(_) => "discord",
      Self::Webhook(_) => "webhook",
      Self::Pushover(_) => "pushover",
      Self::Ntfy(_) => "ntfy",
    }
  }

  /// Serialise the inner configuration (without the type tag) for the
  /// `config_json` database column.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("config").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Decode from the stored discriminant and JSON payload, then validate.
  pub fn from_parts(channel_type: &str, config: serde_json::Value) -> Result<Self> {
    let Some(&known) = CHANNEL_TYPES.iter().find(|t| **t == channel_type) else {
      return Err(Error::UnknownChannelType(channel_type.to_owned()));
    };

    let wrapped = serde_json::json!({ "channel_type": known, "config": config });
    let decoded: Self = serde_json::from_value(wrapped).map_err(|e| {
      Error::InvalidChannelConfig { channel_type: known, reason: e.to_string() }
    })?;

    decoded.validate()?;
    Ok(decoded)
  }

  /// Check required fields, URL schemes, and webhook method/headers.
  pub fn validate(&self) -> Result<()> {
    let kind = self.discriminant();
    let invalid = |reason: String| Error::InvalidChannelConfig { channel_type: kind, reason };

    match self {
      Self::Discord(c) => {
        check_url(&c.webhook_url, "webhook_url").map_err(invalid)?;
      }
      Self::Webhook(c) => {
        check_url(&c.url, "url").map_err(invalid)?;
        let method = c.method().to_ascii_uppercase();
        if !WEBHOOK_METHODS.contains(&method.as_str()) {
          return Err(invalid(format!("unsupported method {method:?}")));
        }
        for (name, value) in &c.headers {
          if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(invalid(format!("invalid header name {name:?}")));
          }
          if value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(invalid(format!("invalid value for header {name:?}")));
          }
        }
      }
      Self::Pushover(c) => {
        check_required(&c.api_token, "api_token").map_err(invalid)?;
        check_required(&c.user_key, "user_key").map_err(invalid)?;
      }
      Self::Ntfy(c) => {
        check_url(&c.server_url, "server_url").map_err(invalid)?;
        check_required(&c.topic, "topic").map_err(invalid)?;
        if c.topic.contains('/') {
          return Err(invalid("topic must not contain '/'".to_owned()));
        }
      }
    }
    Ok(())
  }
}

fn check_required(value: &str, field: &str) -> std::result::Result<(), String> {
  if value.trim().is_empty() {
    Err(format!("{field} is required"))
  } else {
    Ok(())
  }
}

fn check_url(value: &str, field: &str) -> std::result::Result<(), String> {
  check_required(value, field)?;
  let parsed = Url::parse(value).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
  match parsed.scheme() {
    "http" | "https" => Ok(()),
    other => Err(format!("{field} has unsupported scheme {other:?}")),
  }
}

/// RFC 7230 `tchar`.
fn is_token_byte(b: u8) -> bool {
  b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

// ─── Channel rows ────────────────────────────────────────────────────────────

/// A configured notification channel as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
  pub id:           Uuid,
  pub name:         String,
  pub channel_type: String,
  pub config:       serde_json::Value,
  pub enabled:      bool,
  pub created_at:   DateTime<Utc>,
}

impl NotificationChannel {
  /// Decode and validate this channel's configuration.
  pub fn decode_config(&self) -> Result<ChannelConfig> {
    ChannelConfig::from_parts(&self.channel_type, self.config.clone())
  }
}

/// Input to [`crate::store::WardenStore::create_channel`].
#[derive(Debug, Clone)]
pub struct NewChannel {
  pub name:    String,
  pub config:  ChannelConfig,
  pub enabled: bool,
}

/// Input to [`crate::store::WardenStore::update_channel`]. `None` leaves the
/// field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdate {
  pub name:    Option<String>,
  pub config:  Option<ChannelConfig>,
  pub enabled: Option<bool>,
}
