//! Per-user trust scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Score assigned to a user who has never had a violation recorded.
pub const INITIAL_TRUST_SCORE: i64 = 100;

/// A user's reputation. Only violation decrements change it; it has no floor,
/// so a negative score is a valid (severe) state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrustScore {
  pub user_name:       String,
  pub score:           i64,
  pub violation_count: i64,
  /// `None` for the virtual default of a user with no stored row.
  pub updated_at:      Option<DateTime<Utc>>,
}

impl UserTrustScore {
  /// The in-memory default for an unseen user. Never persisted by a read.
  pub fn initial(user_name: impl Into<String>) -> Self {
    Self {
      user_name:       user_name.into(),
      score:           INITIAL_TRUST_SCORE,
      violation_count: 0,
      updated_at:      None,
    }
  }

  pub fn is_materialized(&self) -> bool { self.updated_at.is_some() }
}
