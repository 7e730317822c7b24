//! Household locations and the session-count learner that discovers them.
//!
//! A `(user, ip)` pair becomes a household location only once the user has
//! streamed from it at least `session_threshold` times. Learned locations
//! start untrusted; promotion is an operator decision and is never reverted
//! by re-learning.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  geo::{GeoLocator, GeoResolver, GeoResult},
  store::WardenStore,
};

/// One physical location a user is known to stream from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdLocation {
  pub id:            Uuid,
  pub user_name:     String,
  pub ip_address:    String,
  pub city:          String,
  pub country:       String,
  pub latitude:      f64,
  pub longitude:     f64,
  pub auto_learned:  bool,
  pub trusted:       bool,
  pub session_count: i64,
  pub first_seen:    DateTime<Utc>,
  pub last_seen:     DateTime<Utc>,
}

/// Input to [`WardenStore::upsert_household`].
///
/// On insert the row is auto-learned and untrusted. On update only
/// `session_count` (never lowered), `last_seen`, and the geo fields (when
/// `geo` is set) change.
#[derive(Debug, Clone)]
pub struct HouseholdUpsert {
  pub user_name:     String,
  pub ip_address:    String,
  pub geo:           Option<GeoResult>,
  pub session_count: i64,
  pub seen_at:       DateTime<Utc>,
}

/// One entry of the session history used as learning evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
  pub user_name:   String,
  pub ip_address:  String,
  pub session_key: Option<String>,
  pub started_at:  DateTime<Utc>,
}

// ─── Learner ─────────────────────────────────────────────────────────────────

/// Promotes frequently-used IPs into household locations.
pub struct HouseholdLearner<S, L> {
  store: Arc<S>,
  geo:   GeoResolver<S, L>,
}

impl<S, L> Clone for HouseholdLearner<S, L> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), geo: self.geo.clone() }
  }
}

impl<S, L> HouseholdLearner<S, L>
where
  S: WardenStore,
  L: GeoLocator,
{
  pub fn new(store: Arc<S>, locator: Arc<L>) -> Self {
    let geo = GeoResolver::new(Arc::clone(&store), locator);
    Self { store, geo }
  }

  /// The resolver used for newly learned locations.
  pub fn geo(&self) -> &GeoResolver<S, L> { &self.geo }

  /// Consider the session history of `(user_name, ip)` and upsert a
  /// household location once it reaches `session_threshold` sessions.
  ///
  /// Returns `true` only on the call that creates the row.
  pub async fn consider_session(
    &self,
    user_name:         &str,
    ip:                &str,
    session_threshold: i64,
  ) -> Result<bool> {
    let ip = ip.trim();
    if ip.is_empty() {
      return Ok(false);
    }

    let count = self
      .store
      .count_sessions(user_name, ip)
      .await
      .map_err(Error::store)?;

    if count < session_threshold {
      debug!(user_name, ip, count, session_threshold, "below household threshold");
      return Ok(false);
    }

    let geo = match self.geo.resolve(ip).await {
      Ok(geo) => Some(geo),
      Err(Error::Store(e)) => return Err(Error::Store(e)),
      Err(e) => {
        warn!(user_name, ip, error = %e, "geo resolution failed; learning without location");
        None
      }
    };

    let (location, created) = self
      .store
      .upsert_household(HouseholdUpsert {
        user_name:     user_name.to_owned(),
        ip_address:    ip.to_owned(),
        geo,
        session_count: count,
        seen_at:       Utc::now(),
      })
      .await
      .map_err(Error::store)?;

    if created {
      info!(
        user_name,
        ip,
        city = %location.city,
        country = %location.country,
        sessions = count,
        "learned new household location"
      );
    }

    Ok(created)
  }

  /// Locations an operator has marked trusted.
  pub async fn list_trusted(&self, user_name: &str) -> Result<Vec<HouseholdLocation>> {
    self.store.list_households(user_name, true).await.map_err(Error::store)
  }

  pub async fn list_all(&self, user_name: &str) -> Result<Vec<HouseholdLocation>> {
    self.store.list_households(user_name, false).await.map_err(Error::store)
  }
}
