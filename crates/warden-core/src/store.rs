//! The `WardenStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `warden-store-sqlite`).
//! Higher layers (`warden-notify`, `warden-api`, `warden-server`) depend on
//! this abstraction, not on any concrete backend.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
  channel::{ChannelUpdate, NewChannel, NotificationChannel},
  geo::GeoResult,
  household::{HouseholdLocation, HouseholdUpsert, SessionRecord},
  trust::UserTrustScore,
  violation::{RuleViolation, ViolationQuery},
};

/// Abstraction over a Warden storage backend.
///
/// The violation log is append-only. The trust-score row and the violation
/// log are only ever written together, through
/// [`WardenStore::record_violation`].
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait WardenStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Geo cache ─────────────────────────────────────────────────────────

  /// Return the cached result for `ip` if it is still fresh at `as_of`
  /// (defaults to now). Stale rows behave as misses.
  fn resolve_geo<'a>(
    &'a self,
    ip: &'a str,
    as_of: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Option<GeoResult>, Self::Error>> + Send + 'a;

  /// The fresh subset of `ips`, keyed by IP. Missing keys are misses.
  fn resolve_geo_batch<'a>(
    &'a self,
    ips: &'a [String],
    as_of: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<HashMap<String, GeoResult>, Self::Error>> + Send + 'a;

  /// Upsert by IP (last write wins) and restart its freshness clock.
  fn store_geo(
    &self,
    geo: GeoResult,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Session history ───────────────────────────────────────────────────

  fn record_session(
    &self,
    session: SessionRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Number of recorded sessions for `(user_name, ip)`.
  fn count_sessions<'a>(
    &'a self,
    user_name: &'a str,
    ip: &'a str,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  // ── Household locations ───────────────────────────────────────────────

  /// Insert or refresh the location for `(user_name, ip_address)`.
  ///
  /// Returns the stored row and whether it was newly created. An existing
  /// row's `trusted` flag is never modified.
  fn upsert_household(
    &self,
    upsert: HouseholdUpsert,
  ) -> impl Future<Output = Result<(HouseholdLocation, bool), Self::Error>> + Send + '_;

  fn get_household(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<HouseholdLocation>, Self::Error>> + Send + '_;

  /// All locations for a user, or only trusted ones.
  fn list_households<'a>(
    &'a self,
    user_name: &'a str,
    trusted_only: bool,
  ) -> impl Future<Output = Result<Vec<HouseholdLocation>, Self::Error>> + Send + 'a;

  /// Operator promotion/demotion. Returns `None` for an unknown id.
  fn set_household_trusted(
    &self,
    id: Uuid,
    trusted: bool,
  ) -> impl Future<Output = Result<Option<HouseholdLocation>, Self::Error>> + Send + '_;

  // ── Trust scores ──────────────────────────────────────────────────────

  /// The stored score, or [`UserTrustScore::initial`] without writing.
  fn get_trust_score<'a>(
    &'a self,
    user_name: &'a str,
  ) -> impl Future<Output = Result<UserTrustScore, Self::Error>> + Send + 'a;

  /// Atomically seed (at 100) if absent, subtract `amount`, and bump the
  /// violation count.
  fn decrement_trust_score<'a>(
    &'a self,
    user_name: &'a str,
    amount: i64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<UserTrustScore, Self::Error>> + Send + 'a;

  /// Stored scores, lowest first.
  fn list_trust_scores(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<UserTrustScore>, Self::Error>> + Send + '_;

  // ── Violations ────────────────────────────────────────────────────────

  /// Dedup predicate.
  ///
  /// With a non-empty `session_key`, matches only the same
  /// `(rule_id, user_name, session_key)`; otherwise any violation of
  /// `(rule_id, user_name)`. Either way only violations that occurred within
  /// `window` before `as_of` (defaults to now) count. A window too large to
  /// subtract covers all history.
  fn violation_exists_recent<'a>(
    &'a self,
    rule_id: Uuid,
    user_name: &'a str,
    session_key: Option<&'a str>,
    window: Duration,
    as_of: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Insert `violation` and decrement the user's trust score by
  /// `score_penalty` as one transaction. Returns the updated score.
  /// Negative penalties are rejected before anything is written.
  fn record_violation(
    &self,
    violation: RuleViolation,
    score_penalty: i64,
  ) -> impl Future<Output = Result<UserTrustScore, Self::Error>> + Send + '_;

  fn get_violation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<RuleViolation>, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_violations<'a>(
    &'a self,
    query: &'a ViolationQuery,
  ) -> impl Future<Output = Result<Vec<RuleViolation>, Self::Error>> + Send + 'a;

  // ── Notification channels ─────────────────────────────────────────────

  fn create_channel(
    &self,
    input: NewChannel,
  ) -> impl Future<Output = Result<NotificationChannel, Self::Error>> + Send + '_;

  fn get_channel(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<NotificationChannel>, Self::Error>> + Send + '_;

  fn list_channels(
    &self,
  ) -> impl Future<Output = Result<Vec<NotificationChannel>, Self::Error>> + Send + '_;

  /// Returns `None` for an unknown id.
  fn update_channel(
    &self,
    id: Uuid,
    update: ChannelUpdate,
  ) -> impl Future<Output = Result<Option<NotificationChannel>, Self::Error>> + Send + '_;

  /// Delete a channel and its rule links. Returns whether it existed.
  fn delete_channel(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Replace the set of channels linked to `rule_id`.
  fn set_rule_channels(
    &self,
    rule_id: Uuid,
    channel_ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Channels linked to `rule_id`; disabled ones are filtered when
  /// `enabled_only` is set.
  fn channels_for_rule(
    &self,
    rule_id: Uuid,
    enabled_only: bool,
  ) -> impl Future<Output = Result<Vec<NotificationChannel>, Self::Error>> + Send + '_;
}
