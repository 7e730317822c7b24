//! Rule violations: the append-only log of anomalies raised by the rule
//! evaluator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Severity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
  Info,
  #[default]
  Warning,
  Critical,
  /// Any severity string this build does not recognise.
  Unknown,
}

impl From<String> for Severity {
  fn from(s: String) -> Self { Self::parse(&s) }
}

impl Severity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Info => "info",
      Self::Warning => "warning",
      Self::Critical => "critical",
      Self::Unknown => "unknown",
    }
  }

  /// Lenient parse; unrecognised values map to [`Severity::Unknown`].
  pub fn parse(s: &str) -> Self {
    match s {
      "info" => Self::Info,
      "warning" => Self::Warning,
      "critical" => Self::Critical,
      _ => Self::Unknown,
    }
  }
}

impl std::fmt::Display for Severity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Violation ───────────────────────────────────────────────────────────────

/// A recorded violation. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
  pub id:               Uuid,
  pub rule_id:          Uuid,
  pub user_name:        String,
  pub severity:         Severity,
  pub message:          String,
  /// Opaque, rule-specific context (e.g. the offending IPs or stream count).
  pub details:          serde_json::Value,
  pub confidence_score: f64,
  /// Correlates the violation with a single streaming session, if known.
  pub session_key:      Option<String>,
  pub occurred_at:      DateTime<Utc>,
}

/// A violation as proposed by the (external) rule evaluator, before it has
/// been deduplicated and assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationCandidate {
  pub rule_id:          Uuid,
  pub user_name:        String,
  pub severity:         Severity,
  pub message:          String,
  #[serde(default)]
  pub details:          serde_json::Value,
  pub confidence_score: f64,
  #[serde(default)]
  pub session_key:      Option<String>,
}

impl ViolationCandidate {
  /// Assign an id and timestamp, producing the row to be recorded.
  pub fn into_violation(self, occurred_at: DateTime<Utc>) -> RuleViolation {
    RuleViolation {
      id: Uuid::new_v4(),
      rule_id: self.rule_id,
      user_name: self.user_name,
      severity: self.severity,
      message: self.message,
      details: self.details,
      confidence_score: self.confidence_score,
      session_key: self.session_key.filter(|k| !k.is_empty()),
      occurred_at,
    }
  }
}

/// Per-rule recording policy. Both values are rule configuration; nothing in
/// this crate fixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulePolicy {
  /// Repeats inside this window are suppressed.
  pub dedup_window:  Duration,
  /// Trust-score points removed per recorded violation.
  pub score_penalty: i64,
}

impl Default for RulePolicy {
  fn default() -> Self {
    Self { dedup_window: Duration::minutes(30), score_penalty: 10 }
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::WardenStore::list_violations`].
#[derive(Debug, Clone, Default)]
pub struct ViolationQuery {
  pub user_name: Option<String>,
  pub rule_id:   Option<Uuid>,
  /// Only violations with `occurred_at >= since`.
  pub since:     Option<DateTime<Utc>>,
  pub limit:     Option<usize>,
}
