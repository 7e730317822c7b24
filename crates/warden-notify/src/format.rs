//! Per-channel payload shaping.
//!
//! Every function here is pure: it maps a violation (and, where needed, the
//! channel's config) to the body and headers a channel expects.

use serde_json::{Value, json};
use warden_core::violation::{RuleViolation, Severity};

pub const DISCORD_RED: u32 = 0xE7_4C_3C;
pub const DISCORD_ORANGE: u32 = 0xE6_7E_22;
pub const DISCORD_BLUE: u32 = 0x34_98_DB;
pub const DISCORD_GRAY: u32 = 0x95_A5_A6;

pub fn title(v: &RuleViolation) -> String {
  format!("Warden: {} violation for {}", v.severity, v.user_name)
}

fn confidence_pct(v: &RuleViolation) -> String {
  format!("{:.0}%", v.confidence_score * 100.0)
}

// ─── Discord ─────────────────────────────────────────────────────────────────

pub fn discord_color(severity: Severity) -> u32 {
  match severity {
    Severity::Critical => DISCORD_RED,
    Severity::Warning => DISCORD_ORANGE,
    Severity::Info => DISCORD_BLUE,
    Severity::Unknown => DISCORD_GRAY,
  }
}

pub fn discord_payload(v: &RuleViolation) -> Value {
  json!({
    "embeds": [{
      "title":       title(v),
      "description": v.message,
      "color":       discord_color(v.severity),
      "fields": [
        { "name": "User",       "value": v.user_name,          "inline": true },
        { "name": "Severity",   "value": v.severity.as_str(),  "inline": true },
        { "name": "Confidence", "value": confidence_pct(v),    "inline": true },
      ],
      "timestamp": v.occurred_at.to_rfc3339(),
    }]
  })
}

// ─── Generic webhook ─────────────────────────────────────────────────────────

pub fn webhook_payload(v: &RuleViolation) -> Value {
  json!({
    "violation_id": v.id,
    "rule_id":      v.rule_id,
    "user_name":    v.user_name,
    "severity":     v.severity.as_str(),
    "message":      v.message,
    "confidence":   v.confidence_score,
    "details":      v.details,
    "session_key":  v.session_key,
    "timestamp":    v.occurred_at.to_rfc3339(),
  })
}

// ─── Pushover ────────────────────────────────────────────────────────────────

pub fn pushover_priority(severity: Severity) -> i8 {
  match severity {
    Severity::Critical => 1,
    Severity::Info => -1,
    Severity::Warning | Severity::Unknown => 0,
  }
}

pub fn pushover_form(api_token: &str, user_key: &str, v: &RuleViolation) -> Vec<(&'static str, String)> {
  vec![
    ("token", api_token.to_owned()),
    ("user", user_key.to_owned()),
    ("title", title(v)),
    ("message", format!("{}\nConfidence: {}", v.message, confidence_pct(v))),
    ("priority", pushover_priority(v.severity).to_string()),
    ("timestamp", v.occurred_at.timestamp().to_string()),
  ]
}

// ─── ntfy ────────────────────────────────────────────────────────────────────

pub fn ntfy_priority(severity: Severity) -> &'static str {
  match severity {
    Severity::Critical => "urgent",
    Severity::Warning => "high",
    Severity::Info | Severity::Unknown => "default",
  }
}

pub fn ntfy_tags(severity: Severity) -> &'static str {
  match severity {
    Severity::Critical => "rotating_light",
    Severity::Warning => "warning",
    Severity::Info => "information_source",
    Severity::Unknown => "grey_question",
  }
}

pub fn ntfy_body(v: &RuleViolation) -> String {
  format!(
    "{}\nUser: {} | Severity: {} | Confidence: {}",
    v.message,
    v.user_name,
    v.severity,
    confidence_pct(v)
  )
}

/// Header values must be visible ASCII; anything else becomes `?`.
pub fn header_safe(s: &str) -> String {
  s.chars()
    .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
    .collect()
}
