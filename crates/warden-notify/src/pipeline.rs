//! [`AlertPipeline`]: dedup, record, score, and notify for one candidate
//! violation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use warden_core::{
  Error as CoreError, Result,
  store::WardenStore,
  trust::UserTrustScore,
  violation::{RulePolicy, RuleViolation, ViolationCandidate},
};

use crate::{error::DispatchError, notifier::Notifier};

/// What happened to a submitted candidate.
#[derive(Debug)]
pub enum Outcome {
  /// A matching violation was already recorded inside the dedup window.
  Suppressed,
  /// The violation was recorded and the score decremented. Delivery is
  /// best-effort and never undoes the recording; a failure to load the
  /// rule's channels is reported here too.
  Recorded {
    violation: RuleViolation,
    score:     UserTrustScore,
    delivery:  Result<(), DispatchError>,
  },
}

impl Outcome {
  pub fn is_recorded(&self) -> bool { matches!(self, Self::Recorded { .. }) }
}

pub struct AlertPipeline<S> {
  store:    Arc<S>,
  notifier: Notifier,
}

impl<S> Clone for AlertPipeline<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), notifier: self.notifier.clone() }
  }
}

impl<S: WardenStore> AlertPipeline<S> {
  pub fn new(store: Arc<S>, notifier: Notifier) -> Self { Self { store, notifier } }

  pub fn notifier(&self) -> &Notifier { &self.notifier }

  pub async fn submit(
    &self,
    candidate: ViolationCandidate,
    policy: RulePolicy,
  ) -> Result<Outcome> {
    let session_key = candidate.session_key.as_deref().filter(|k| !k.is_empty());
    let duplicate = self
      .store
      .violation_exists_recent(
        candidate.rule_id,
        &candidate.user_name,
        session_key,
        policy.dedup_window,
        None,
      )
      .await
      .map_err(CoreError::store)?;

    if duplicate {
      debug!(
        rule_id = %candidate.rule_id,
        user = candidate.user_name,
        "violation suppressed by dedup window"
      );
      return Ok(Outcome::Suppressed);
    }

    let violation = candidate.into_violation(Utc::now());
    let score = self
      .store
      .record_violation(violation.clone(), policy.score_penalty)
      .await
      .map_err(CoreError::store)?;

    info!(
      violation_id = %violation.id,
      rule_id = %violation.rule_id,
      user = violation.user_name,
      severity = %violation.severity,
      score = score.score,
      "violation recorded"
    );

    let delivery = match self.store.channels_for_rule(violation.rule_id, true).await {
      Ok(channels) => self.notifier.notify(&violation, &channels).await,
      Err(e) => Err(DispatchError::channel_lookup(e.to_string())),
    };
    if let Err(e) = &delivery {
      warn!(violation_id = %violation.id, error = %e, "alert delivery incomplete");
    }

    Ok(Outcome::Recorded { violation, score, delivery })
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, sync::Arc, time::Duration};

  use chrono::{DateTime, Duration as Window};
  use serde_json::json;
  use uuid::Uuid;
  use warden_core::{
    channel::{ChannelConfig, ChannelUpdate, DiscordConfig, NewChannel, NotificationChannel},
    geo::GeoResult,
    household::{HouseholdLocation, HouseholdUpsert, SessionRecord},
    violation::{Severity, ViolationQuery},
  };
  use warden_store_sqlite::{Error as StoreError, SqliteStore};
  use wiremock::matchers::method;
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;

  fn candidate(rule_id: Uuid, session_key: Option<&str>) -> ViolationCandidate {
    ViolationCandidate {
      rule_id,
      user_name: "alice".into(),
      severity: Severity::Critical,
      message: "impossible travel".into(),
      details: json!({ "km_per_hour": 4200 }),
      confidence_score: 0.9,
      session_key: session_key.map(str::to_owned),
    }
  }

  async fn pipeline() -> (Arc<SqliteStore>, AlertPipeline<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let notifier = Notifier::new(Duration::from_secs(5)).unwrap();
    (Arc::clone(&store), AlertPipeline::new(store, notifier))
  }

  /// Delegates to an in-memory [`SqliteStore`], except that rule channel
  /// lookups always fail.
  struct BrokenChannelLookup(SqliteStore);

  type StoreResult<T> = std::result::Result<T, StoreError>;

  impl WardenStore for BrokenChannelLookup {
    type Error = StoreError;

    async fn resolve_geo(
      &self,
      ip:    &str,
      as_of: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<GeoResult>> {
      self.0.resolve_geo(ip, as_of).await
    }

    async fn resolve_geo_batch(
      &self,
      ips:   &[String],
      as_of: Option<DateTime<Utc>>,
    ) -> StoreResult<HashMap<String, GeoResult>> {
      self.0.resolve_geo_batch(ips, as_of).await
    }

    async fn store_geo(&self, geo: GeoResult) -> StoreResult<()> { self.0.store_geo(geo).await }

    async fn record_session(&self, session: SessionRecord) -> StoreResult<()> {
      self.0.record_session(session).await
    }

    async fn count_sessions(&self, user_name: &str, ip: &str) -> StoreResult<i64> {
      self.0.count_sessions(user_name, ip).await
    }

    async fn upsert_household(
      &self,
      upsert: HouseholdUpsert,
    ) -> StoreResult<(HouseholdLocation, bool)> {
      self.0.upsert_household(upsert).await
    }

    async fn get_household(&self, id: Uuid) -> StoreResult<Option<HouseholdLocation>> {
      self.0.get_household(id).await
    }

    async fn list_households(
      &self,
      user_name:    &str,
      trusted_only: bool,
    ) -> StoreResult<Vec<HouseholdLocation>> {
      self.0.list_households(user_name, trusted_only).await
    }

    async fn set_household_trusted(
      &self,
      id:      Uuid,
      trusted: bool,
    ) -> StoreResult<Option<HouseholdLocation>> {
      self.0.set_household_trusted(id, trusted).await
    }

    async fn get_trust_score(&self, user_name: &str) -> StoreResult<UserTrustScore> {
      self.0.get_trust_score(user_name).await
    }

    async fn decrement_trust_score(
      &self,
      user_name: &str,
      amount:    i64,
      at:        DateTime<Utc>,
    ) -> StoreResult<UserTrustScore> {
      self.0.decrement_trust_score(user_name, amount, at).await
    }

    async fn list_trust_scores(&self, limit: usize) -> StoreResult<Vec<UserTrustScore>> {
      self.0.list_trust_scores(limit).await
    }

    async fn violation_exists_recent(
      &self,
      rule_id:     Uuid,
      user_name:   &str,
      session_key: Option<&str>,
      window:      Window,
      as_of:       Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
      self.0.violation_exists_recent(rule_id, user_name, session_key, window, as_of).await
    }

    async fn record_violation(
      &self,
      violation:     RuleViolation,
      score_penalty: i64,
    ) -> StoreResult<UserTrustScore> {
      self.0.record_violation(violation, score_penalty).await
    }

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<RuleViolation>> {
      self.0.get_violation(id).await
    }

    async fn list_violations(&self, query: &ViolationQuery) -> StoreResult<Vec<RuleViolation>> {
      self.0.list_violations(query).await
    }

    async fn create_channel(&self, input: NewChannel) -> StoreResult<NotificationChannel> {
      self.0.create_channel(input).await
    }

    async fn get_channel(&self, id: Uuid) -> StoreResult<Option<NotificationChannel>> {
      self.0.get_channel(id).await
    }

    async fn list_channels(&self) -> StoreResult<Vec<NotificationChannel>> {
      self.0.list_channels().await
    }

    async fn update_channel(
      &self,
      id:     Uuid,
      update: ChannelUpdate,
    ) -> StoreResult<Option<NotificationChannel>> {
      self.0.update_channel(id, update).await
    }

    async fn delete_channel(&self, id: Uuid) -> StoreResult<bool> {
      self.0.delete_channel(id).await
    }

    async fn set_rule_channels(&self, rule_id: Uuid, channel_ids: Vec<Uuid>) -> StoreResult<()> {
      self.0.set_rule_channels(rule_id, channel_ids).await
    }

    async fn channels_for_rule(
      &self,
      _rule_id:      Uuid,
      _enabled_only: bool,
    ) -> StoreResult<Vec<NotificationChannel>> {
      Err(StoreError::DateParse("rule_channels row is unreadable".into()))
    }
  }

  #[tokio::test]
  async fn records_scores_and_delivers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    let (store, pipeline) = pipeline().await;
    let rule_id = Uuid::new_v4();
    let ch = store
      .create_channel(NewChannel {
        name:    "discord".into(),
        config:  ChannelConfig::Discord(DiscordConfig { webhook_url: server.uri() }),
        enabled: true,
      })
      .await
      .unwrap();
    store.set_rule_channels(rule_id, vec![ch.id]).await.unwrap();

    let policy = RulePolicy { score_penalty: 15, ..RulePolicy::default() };
    let outcome = pipeline.submit(candidate(rule_id, Some("s1")), policy).await.unwrap();

    match outcome {
      Outcome::Recorded { violation, score, delivery } => {
        assert_eq!(score.score, 85);
        assert_eq!(score.violation_count, 1);
        assert!(delivery.is_ok());
        let stored = store.get_violation(violation.id).await.unwrap();
        assert_eq!(stored.map(|v| v.rule_id), Some(rule_id));
      }
      Outcome::Suppressed => panic!("first violation must be recorded"),
    }
  }

  #[tokio::test]
  async fn duplicate_inside_window_is_suppressed() {
    let (store, pipeline) = pipeline().await;
    let rule_id = Uuid::new_v4();

    let first = pipeline.submit(candidate(rule_id, Some("s1")), RulePolicy::default()).await;
    assert!(first.unwrap().is_recorded());

    let repeat = pipeline.submit(candidate(rule_id, Some("s1")), RulePolicy::default()).await;
    assert!(matches!(repeat.unwrap(), Outcome::Suppressed));

    let other_session =
      pipeline.submit(candidate(rule_id, Some("s2")), RulePolicy::default()).await;
    assert!(other_session.unwrap().is_recorded());

    let score = store.get_trust_score("alice").await.unwrap();
    assert_eq!(score.score, 80);
    assert_eq!(score.violation_count, 2);
  }

  #[tokio::test]
  async fn delivery_failure_keeps_the_recording() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let (store, pipeline) = pipeline().await;
    let rule_id = Uuid::new_v4();
    let ch = store
      .create_channel(NewChannel {
        name:    "flaky".into(),
        config:  ChannelConfig::Discord(DiscordConfig { webhook_url: server.uri() }),
        enabled: true,
      })
      .await
      .unwrap();
    store.set_rule_channels(rule_id, vec![ch.id]).await.unwrap();

    let outcome = pipeline.submit(candidate(rule_id, None), RulePolicy::default()).await.unwrap();
    let Outcome::Recorded { delivery, .. } = outcome else {
      panic!("expected a recorded violation");
    };
    let err = delivery.unwrap_err();
    assert_eq!(err.failures[0].channel_id, ch.id);

    assert_eq!(store.get_trust_score("alice").await.unwrap().score, 90);
  }

  #[tokio::test]
  async fn rule_without_channels_still_records() {
    let (_store, pipeline) = pipeline().await;
    let outcome =
      pipeline.submit(candidate(Uuid::new_v4(), None), RulePolicy::default()).await.unwrap();
    let Outcome::Recorded { delivery, .. } = outcome else {
      panic!("expected a recorded violation");
    };
    assert!(delivery.is_ok());
  }

  #[tokio::test]
  async fn channel_lookup_failure_is_reported() {
    let store = Arc::new(BrokenChannelLookup(SqliteStore::open_in_memory().await.unwrap()));
    let notifier = Notifier::new(Duration::from_secs(5)).unwrap();
    let pipeline = AlertPipeline::new(Arc::clone(&store), notifier);

    let outcome =
      pipeline.submit(candidate(Uuid::new_v4(), None), RulePolicy::default()).await.unwrap();
    let Outcome::Recorded { violation, score, delivery } = outcome else {
      panic!("expected a recorded violation");
    };

    let err = delivery.unwrap_err();
    assert!(err.failures.is_empty());
    assert!(err.channel_lookup.as_deref().is_some_and(|r| r.contains("rule_channels")));
    assert!(err.to_string().starts_with("could not load notification channels"));

    assert_eq!(score.score, 90);
    assert!(store.get_violation(violation.id).await.unwrap().is_some());
  }
}
