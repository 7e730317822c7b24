//! [`Notifier`]: concurrent, partial-failure-tolerant channel fan-out.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use reqwest::{Client, Method, Response};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::{
  channel::{ChannelConfig, NotificationChannel},
  violation::{RuleViolation, Severity},
};

use crate::{
  error::{ChannelError, ChannelFailure, DispatchError},
  format,
};

/// Default Pushover message endpoint.
pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// At most this much of a response body is read before it is discarded.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// How much of an error body is kept in the failure message.
const ERROR_SNIPPET_CHARS: usize = 200;

/// Delivers violations to notification channels.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct Notifier {
  client:       Client,
  timeout:      Duration,
  pushover_url: String,
}

impl Notifier {
  pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, timeout, pushover_url: PUSHOVER_API_URL.to_owned() })
  }

  /// Overrides the Pushover endpoint (for testing with wiremock).
  pub fn with_pushover_url(mut self, url: impl Into<String>) -> Self {
    self.pushover_url = url.into();
    self
  }

  pub fn timeout(&self) -> Duration { self.timeout }

  /// Deliver `violation` to every enabled channel and wait for all of them.
  ///
  /// Zero channels is a successful no-op. Failures never stop the other
  /// deliveries; they are reported together in the returned error.
  pub async fn notify(
    &self,
    violation: &RuleViolation,
    channels:  &[NotificationChannel],
  ) -> Result<(), DispatchError> {
    self.notify_with_cancel(violation, channels, CancellationToken::new()).await
  }

  /// Like [`Notifier::notify`], but channels still in flight when `cancel`
  /// fires are recorded as failed. No delivery is retried.
  pub async fn notify_with_cancel(
    &self,
    violation: &RuleViolation,
    channels:  &[NotificationChannel],
    cancel:    CancellationToken,
  ) -> Result<(), DispatchError> {
    let violation = Arc::new(violation.clone());
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<task::Id, (Uuid, String)> = HashMap::new();

    for channel in channels.iter().filter(|c| c.enabled) {
      let notifier  = self.clone();
      let violation = Arc::clone(&violation);
      let channel   = channel.clone();
      let cancel    = cancel.clone();
      let label     = (channel.id, channel.name.clone());

      let handle = tasks.spawn(async move {
        tokio::select! {
          biased;
          _ = cancel.cancelled() => Err(ChannelError::Cancelled),
          r = notifier.deliver(&channel, &violation) => r,
        }
      });
      pending.insert(handle.id(), label);
    }

    if pending.is_empty() {
      debug!(violation_id = %violation.id, "no enabled channels; nothing to deliver");
      return Ok(());
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
      let (task_id, result) = match joined {
        Ok((id, result)) => (id, result.map_err(|e| e.to_string())),
        Err(e) => {
          warn!(error = %e, "notification task aborted");
          (e.id(), Err("delivery task aborted".to_owned()))
        }
      };
      let Some((channel_id, channel_name)) = pending.remove(&task_id) else {
        continue;
      };
      match result {
        Ok(()) => debug!(%channel_id, channel_name, "notification delivered"),
        Err(error) => {
          warn!(%channel_id, channel_name, error = %error, "notification delivery failed");
          failures.push(ChannelFailure { channel_id, channel_name, error });
        }
      }
    }

    if failures.is_empty() {
      info!(violation_id = %violation.id, "notifications delivered");
      Ok(())
    } else {
      Err(DispatchError::from_failures(failures))
    }
  }

  /// Deliver a clearly-labelled synthetic violation to one channel,
  /// regardless of whether it is enabled.
  pub async fn test_channel(&self, channel: &NotificationChannel) -> Result<(), ChannelError> {
    let violation = test_violation(&channel.name);
    self.deliver(channel, &violation).await
  }

  /// One delivery attempt to one channel.
  pub async fn deliver(
    &self,
    channel:   &NotificationChannel,
    violation: &RuleViolation,
  ) -> Result<(), ChannelError> {
    let config = channel.decode_config()?;

    let request = match &config {
      ChannelConfig::Discord(c) => {
        self.client.post(&c.webhook_url).json(&format::discord_payload(violation))
      }
      ChannelConfig::Webhook(c) => {
        let method = Method::from_bytes(c.method().to_ascii_uppercase().as_bytes())
          .unwrap_or(Method::POST);
        let mut req = self
          .client
          .request(method, &c.url)
          .json(&format::webhook_payload(violation));
        for (name, value) in &c.headers {
          req = req.header(name.as_str(), value.as_str());
        }
        req
      }
      ChannelConfig::Pushover(c) => self
        .client
        .post(&self.pushover_url)
        .form(&format::pushover_form(&c.api_token, &c.user_key, violation)),
      ChannelConfig::Ntfy(c) => {
        let url = format!("{}/{}", c.server_url.trim_end_matches('/'), c.topic);
        let mut req = self
          .client
          .post(url)
          .header("Title", format::header_safe(&format::title(violation)))
          .header("Priority", format::ntfy_priority(violation.severity))
          .header("Tags", format::ntfy_tags(violation.severity))
          .body(format::ntfy_body(violation));
        if let Some(token) = c.token.as_deref().filter(|t| !t.is_empty()) {
          req = req.bearer_auth(token);
        }
        req
      }
    };

    let response = request.timeout(self.timeout).send().await?;
    check_response(response).await
  }
}

/// Map status >= 400 to an error; drain (a bounded amount of) the body
/// either way.
async fn check_response(mut response: Response) -> Result<(), ChannelError> {
  let status = response.status();
  let mut body = Vec::new();
  while let Some(chunk) = response.chunk().await? {
    let room = MAX_RESPONSE_BYTES.saturating_sub(body.len());
    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    if body.len() >= MAX_RESPONSE_BYTES {
      break;
    }
  }

  if status.as_u16() >= 400 {
    let text: String = String::from_utf8_lossy(&body).chars().take(ERROR_SNIPPET_CHARS).collect();
    return Err(ChannelError::Status { status: status.as_u16(), body: text });
  }
  Ok(())
}

fn test_violation(channel_name: &str) -> RuleViolation {
  RuleViolation {
    id:               Uuid::new_v4(),
    rule_id:          Uuid::nil(),
    user_name:        "warden-test".to_owned(),
    severity:         Severity::Info,
    message:          format!(
      "[TEST] This is a test notification from Warden for channel \"{channel_name}\"."
    ),
    details:          serde_json::json!({ "test": true }),
    confidence_score: 1.0,
    session_key:      None,
    occurred_at:      Utc::now(),
  }
}
