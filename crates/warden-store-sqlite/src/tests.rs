//! Integration tests for `SqliteStore` against an in-memory database.

use std::{
  net::IpAddr,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use warden_core::{
  Error as CoreError,
  channel::{ChannelConfig, ChannelUpdate, DiscordConfig, NewChannel, NtfyConfig},
  geo::{GeoLocator, GeoResolver, GeoResult, LOCAL_NETWORK},
  household::{HouseholdLearner, HouseholdUpsert, SessionRecord},
  store::WardenStore,
  violation::{RuleViolation, Severity, ViolationQuery},
};

use crate::{Error, SqliteStore, encode::encode_dt};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn geo(ip: &str, city: &str) -> GeoResult {
  GeoResult {
    ip:        ip.into(),
    latitude:  48.85,
    longitude: 2.35,
    city:      city.into(),
    country:   "France".into(),
  }
}

/// Counts lookups and answers every one with Paris.
#[derive(Default)]
struct StubLocator {
  calls: AtomicUsize,
  fail:  bool,
}

impl GeoLocator for StubLocator {
  async fn lookup(&self, ip: IpAddr) -> warden_core::Result<GeoResult> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(CoreError::GeoLookup("service unavailable".into()));
    }
    Ok(geo(&ip.to_string(), "Paris"))
  }
}

// ─── Geo cache ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn geo_cache_hit_within_window() {
  let s = store().await;
  s.store_geo(geo("1.1.1.1", "Paris")).await.unwrap();

  let hit = s.resolve_geo("1.1.1.1", None).await.unwrap();
  assert_eq!(hit, Some(geo("1.1.1.1", "Paris")));

  let later = Utc::now() + Duration::days(29);
  assert!(s.resolve_geo("1.1.1.1", Some(later)).await.unwrap().is_some());
}

#[tokio::test]
async fn geo_cache_expired_entry_is_a_miss() {
  let s = store().await;
  s.store_geo(geo("1.1.1.1", "Paris")).await.unwrap();

  let later = Utc::now() + Duration::days(31);
  assert!(s.resolve_geo("1.1.1.1", Some(later)).await.unwrap().is_none());

  // The row still physically exists.
  let rows: i64 = s
    .conn
    .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM geo_cache", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(rows, 1);
}

#[tokio::test]
async fn geo_store_is_last_write_wins() {
  let s = store().await;
  s.store_geo(geo("1.1.1.1", "Paris")).await.unwrap();
  s.store_geo(geo("1.1.1.1", "Lyon")).await.unwrap();

  let hit = s.resolve_geo("1.1.1.1", None).await.unwrap().unwrap();
  assert_eq!(hit.city, "Lyon");
}

#[tokio::test]
async fn geo_batch_returns_only_fresh_subset() {
  let s = store().await;
  s.store_geo(geo("1.1.1.1", "Paris")).await.unwrap();
  s.store_geo(geo("2.2.2.2", "Lyon")).await.unwrap();

  // Backdate one entry past the freshness window.
  let stale = encode_dt(Utc::now() - Duration::days(45));
  s.conn
    .call(move |conn| {
      conn.execute(
        "UPDATE geo_cache SET cached_at = ?1 WHERE ip = '2.2.2.2'",
        rusqlite::params![stale],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let ips = vec!["1.1.1.1".to_owned(), "2.2.2.2".to_owned(), "3.3.3.3".to_owned()];
  let fresh = s.resolve_geo_batch(&ips, None).await.unwrap();
  assert_eq!(fresh.len(), 1);
  assert_eq!(fresh["1.1.1.1"].city, "Paris");
}

#[tokio::test]
async fn resolver_uses_cache_then_locator() {
  let s       = Arc::new(store().await);
  let locator = Arc::new(StubLocator::default());
  let geo     = GeoResolver::new(Arc::clone(&s), Arc::clone(&locator));

  let first = geo.resolve("8.8.8.8").await.unwrap();
  assert_eq!(first.city, "Paris");
  let second = geo.resolve("8.8.8.8").await.unwrap();
  assert_eq!(second, first);
  assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resolver_short_circuits_local_addresses() {
  let s       = Arc::new(store().await);
  let locator = Arc::new(StubLocator::default());
  let geo     = GeoResolver::new(Arc::clone(&s), Arc::clone(&locator));

  let local = geo.resolve("192.168.1.10").await.unwrap();
  assert_eq!(local.city, LOCAL_NETWORK);
  assert_eq!(locator.calls.load(Ordering::SeqCst), 0);

  assert!(matches!(geo.resolve("not-an-ip").await, Err(CoreError::InvalidIp(_))));
}

// ─── Household learning ──────────────────────────────────────────────────────

async fn add_sessions(s: &SqliteStore, user: &str, ip: &str, n: usize) {
  for _ in 0..n {
    s.record_session(SessionRecord {
      user_name:   user.into(),
      ip_address:  ip.into(),
      session_key: Some(Uuid::new_v4().to_string()),
      started_at:  Utc::now(),
    })
    .await
    .unwrap();
  }
}

#[tokio::test]
async fn household_learned_at_threshold_and_never_duplicated() {
  let s       = Arc::new(store().await);
  let learner = HouseholdLearner::new(Arc::clone(&s), Arc::new(StubLocator::default()));

  let mut created_at = Vec::new();
  for session in 1..=12 {
    add_sessions(&s, "alice", "1.1.1.1", 1).await;
    if learner.consider_session("alice", "1.1.1.1", 10).await.unwrap() {
      created_at.push(session);
    }
    if session == 10 {
      let all = learner.list_all("alice").await.unwrap();
      assert_eq!(all.len(), 1);
      assert!(all[0].auto_learned);
      assert!(!all[0].trusted);
      assert_eq!(all[0].session_count, 10);
      assert_eq!(all[0].city, "Paris");
    }
  }

  assert_eq!(created_at, vec![10]);
  let all = learner.list_all("alice").await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].session_count, 12);
  assert!(!all[0].trusted);
}

#[tokio::test]
async fn relearning_keeps_operator_trust() {
  let s       = Arc::new(store().await);
  let learner = HouseholdLearner::new(Arc::clone(&s), Arc::new(StubLocator::default()));

  add_sessions(&s, "bob", "2.2.2.2", 3).await;
  assert!(learner.consider_session("bob", "2.2.2.2", 3).await.unwrap());

  let loc = learner.list_all("bob").await.unwrap().remove(0);
  let promoted = s.set_household_trusted(loc.id, true).await.unwrap().unwrap();
  assert!(promoted.trusted);

  add_sessions(&s, "bob", "2.2.2.2", 2).await;
  assert!(!learner.consider_session("bob", "2.2.2.2", 3).await.unwrap());

  let trusted = learner.list_trusted("bob").await.unwrap();
  assert_eq!(trusted.len(), 1);
  assert_eq!(trusted[0].session_count, 5);
  assert_eq!(trusted[0].first_seen, promoted.first_seen);
}

#[tokio::test]
async fn empty_ip_and_below_threshold_are_noops() {
  let s       = Arc::new(store().await);
  let locator = Arc::new(StubLocator::default());
  let learner = HouseholdLearner::new(Arc::clone(&s), Arc::clone(&locator));

  assert!(!learner.consider_session("carol", "", 1).await.unwrap());

  add_sessions(&s, "carol", "3.3.3.3", 2).await;
  assert!(!learner.consider_session("carol", "3.3.3.3", 5).await.unwrap());
  assert!(learner.list_all("carol").await.unwrap().is_empty());
  assert_eq!(locator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn geo_failure_still_learns_location() {
  let s       = Arc::new(store().await);
  let locator = Arc::new(StubLocator { fail: true, ..Default::default() });
  let learner = HouseholdLearner::new(Arc::clone(&s), locator);

  add_sessions(&s, "dave", "4.4.4.4", 2).await;
  assert!(learner.consider_session("dave", "4.4.4.4", 2).await.unwrap());

  let loc = learner.list_all("dave").await.unwrap().remove(0);
  assert_eq!(loc.city, "");
  assert_eq!(loc.session_count, 2);
}

#[tokio::test]
async fn trusted_is_subset_of_all() {
  let s = store().await;
  for ip in ["5.5.5.5", "6.6.6.6"] {
    s.upsert_household(HouseholdUpsert {
      user_name:     "erin".into(),
      ip_address:    ip.into(),
      geo:           None,
      session_count: 10,
      seen_at:       Utc::now(),
    })
    .await
    .unwrap();
  }
  let all = s.list_households("erin", false).await.unwrap();
  s.set_household_trusted(all[0].id, true).await.unwrap();

  let trusted = s.list_households("erin", true).await.unwrap();
  assert_eq!(trusted.len(), 1);
  assert!(all.iter().any(|l| l.id == trusted[0].id));
}

#[tokio::test]
async fn session_count_never_decreases() {
  let s = store().await;
  let upsert = |count| HouseholdUpsert {
    user_name:     "frank".into(),
    ip_address:    "7.7.7.7".into(),
    geo:           None,
    session_count: count,
    seen_at:       Utc::now(),
  };
  let (_, created) = s.upsert_household(upsert(12)).await.unwrap();
  assert!(created);
  let (loc, created) = s.upsert_household(upsert(4)).await.unwrap();
  assert!(!created);
  assert_eq!(loc.session_count, 12);
}

#[tokio::test]
async fn set_trusted_unknown_id_is_none() {
  let s = store().await;
  assert!(s.set_household_trusted(Uuid::new_v4(), true).await.unwrap().is_none());
}

// ─── Trust ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unseen_user_has_virtual_default() {
  let s = store().await;
  let score = s.get_trust_score("ghost").await.unwrap();
  assert_eq!(score.score, 100);
  assert_eq!(score.violation_count, 0);
  assert!(!score.is_materialized());

  // Reading never materialises a row.
  assert!(s.list_trust_scores(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn decrements_are_additive() {
  let s = store().await;
  s.decrement_trust_score("alice", 10, Utc::now()).await.unwrap();
  let after = s.decrement_trust_score("alice", 5, Utc::now()).await.unwrap();

  assert_eq!(after.score, 85);
  assert_eq!(after.violation_count, 2);
  assert_eq!(s.get_trust_score("alice").await.unwrap(), after);
}

#[tokio::test]
async fn score_may_go_negative() {
  let s = store().await;
  s.decrement_trust_score("mallory", 80, Utc::now()).await.unwrap();
  let after = s.decrement_trust_score("mallory", 50, Utc::now()).await.unwrap();
  assert_eq!(after.score, -30);
}

#[tokio::test]
async fn concurrent_decrements_do_not_lose_updates() {
  let s = store().await;
  let mut handles = Vec::new();
  for _ in 0..20 {
    let s = s.clone();
    handles.push(tokio::spawn(async move {
      s.decrement_trust_score("busy", 1, Utc::now()).await.unwrap();
    }));
  }
  for h in handles {
    h.await.unwrap();
  }
  let score = s.get_trust_score("busy").await.unwrap();
  assert_eq!(score.score, 80);
  assert_eq!(score.violation_count, 20);
}

#[tokio::test]
async fn trust_scores_listed_worst_first() {
  let s = store().await;
  s.decrement_trust_score("a", 5, Utc::now()).await.unwrap();
  s.decrement_trust_score("b", 40, Utc::now()).await.unwrap();
  s.decrement_trust_score("c", 20, Utc::now()).await.unwrap();

  let names: Vec<_> = s
    .list_trust_scores(2)
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.user_name)
    .collect();
  assert_eq!(names, vec!["b", "c"]);
}

// ─── Violations ──────────────────────────────────────────────────────────────

fn violation(rule_id: Uuid, user: &str, session_key: Option<&str>) -> RuleViolation {
  RuleViolation {
    id:               Uuid::new_v4(),
    rule_id,
    user_name:        user.into(),
    severity:         Severity::Warning,
    message:          "concurrent streams exceeded".into(),
    details:          json!({ "streams": 3 }),
    confidence_score: 0.9,
    session_key:      session_key.map(str::to_owned),
    occurred_at:      Utc::now(),
  }
}

#[tokio::test]
async fn record_applies_violation_and_score_together() {
  let s    = store().await;
  let rule = Uuid::new_v4();
  let v    = violation(rule, "alice", Some("s1"));

  let score = s.record_violation(v.clone(), 10).await.unwrap();
  assert_eq!(score.score, 90);
  assert_eq!(score.violation_count, 1);

  let stored = s.get_violation(v.id).await.unwrap().unwrap();
  assert_eq!(stored.message, v.message);
  assert_eq!(stored.details, json!({ "streams": 3 }));
  assert_eq!(stored.session_key.as_deref(), Some("s1"));
}

#[tokio::test]
async fn failed_record_leaves_no_partial_state() {
  let s    = store().await;
  let rule = Uuid::new_v4();
  let v    = violation(rule, "alice", None);

  s.record_violation(v.clone(), 10).await.unwrap();
  // Same primary key: the insert fails, so the decrement must roll back too.
  let err = s.record_violation(v, 10).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));

  let score = s.get_trust_score("alice").await.unwrap();
  assert_eq!(score.score, 90);
  assert_eq!(score.violation_count, 1);
  let all = s.list_violations(&ViolationQuery::default()).await.unwrap();
  assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn dedup_by_session_key() {
  let s      = store().await;
  let rule   = Uuid::new_v4();
  let window = Duration::minutes(30);

  s.record_violation(violation(rule, "alice", Some("s1")), 5).await.unwrap();

  assert!(s.violation_exists_recent(rule, "alice", Some("s1"), window, None).await.unwrap());
  assert!(!s.violation_exists_recent(rule, "alice", Some("s2"), window, None).await.unwrap());
  assert!(!s.violation_exists_recent(rule, "bob", Some("s1"), window, None).await.unwrap());
  assert!(
    !s.violation_exists_recent(Uuid::new_v4(), "alice", Some("s1"), window, None)
      .await
      .unwrap()
  );

  // Once the window has elapsed the same session no longer matches.
  let later = Utc::now() + Duration::minutes(31);
  assert!(
    !s.violation_exists_recent(rule, "alice", Some("s1"), window, Some(later))
      .await
      .unwrap()
  );
}

#[tokio::test]
async fn dedup_without_session_key_is_time_only() {
  let s      = store().await;
  let rule   = Uuid::new_v4();
  let window = Duration::minutes(10);

  s.record_violation(violation(rule, "alice", Some("s1")), 5).await.unwrap();

  assert!(s.violation_exists_recent(rule, "alice", None, window, None).await.unwrap());
  assert!(s.violation_exists_recent(rule, "alice", Some(""), window, None).await.unwrap());

  let later = Utc::now() + Duration::minutes(11);
  assert!(!s.violation_exists_recent(rule, "alice", None, window, Some(later)).await.unwrap());
}

#[tokio::test]
async fn dedup_window_beyond_calendar_covers_all_history() {
  let s    = store().await;
  let rule = Uuid::new_v4();

  let mut old = violation(rule, "pat", None);
  old.occurred_at = Utc::now() - Duration::days(3650);
  s.record_violation(old, 1).await.unwrap();

  let huge = Duration::seconds(i64::MAX / 1000);
  assert!(s.violation_exists_recent(rule, "pat", None, huge, None).await.unwrap());
  assert!(s.violation_exists_recent(rule, "pat", None, Duration::MAX, None).await.unwrap());
  assert!(!s.violation_exists_recent(rule, "quinn", None, huge, None).await.unwrap());
}

#[tokio::test]
async fn negative_penalty_is_rejected_without_writing() {
  let s    = store().await;
  let rule = Uuid::new_v4();
  let v    = violation(rule, "pat", None);
  let id   = v.id;

  let err = s.record_violation(v, -50).await.unwrap_err();
  assert!(matches!(err, Error::NegativePenalty(-50)));
  assert!(s.get_violation(id).await.unwrap().is_none());

  let err = s.decrement_trust_score("pat", -1, Utc::now()).await.unwrap_err();
  assert!(matches!(err, Error::NegativePenalty(-1)));

  let score = s.get_trust_score("pat").await.unwrap();
  assert_eq!(score.score, 100);
  assert!(!score.is_materialized());
}

#[tokio::test]
async fn list_violations_filters_and_orders() {
  let s      = store().await;
  let rule_a = Uuid::new_v4();
  let rule_b = Uuid::new_v4();

  let mut old = violation(rule_a, "alice", None);
  old.occurred_at = Utc::now() - Duration::hours(2);
  s.record_violation(old, 1).await.unwrap();
  s.record_violation(violation(rule_b, "alice", None), 1).await.unwrap();
  s.record_violation(violation(rule_a, "bob", None), 1).await.unwrap();

  let alice = s
    .list_violations(&ViolationQuery { user_name: Some("alice".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(alice.len(), 2);
  assert!(alice[0].occurred_at > alice[1].occurred_at);

  let recent_a = s
    .list_violations(&ViolationQuery {
      rule_id: Some(rule_a),
      since: Some(Utc::now() - Duration::hours(1)),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(recent_a.len(), 1);
  assert_eq!(recent_a[0].user_name, "bob");
}

// ─── Channels ────────────────────────────────────────────────────────────────

fn discord(name: &str) -> NewChannel {
  NewChannel {
    name:    name.into(),
    config:  ChannelConfig::Discord(DiscordConfig {
      webhook_url: "https://discord.test/api/webhooks/1".into(),
    }),
    enabled: true,
  }
}

#[tokio::test]
async fn channel_crud() {
  let s = store().await;
  let ch = s.create_channel(discord("ops")).await.unwrap();
  assert_eq!(ch.channel_type, "discord");
  assert!(ch.decode_config().is_ok());

  let updated = s
    .update_channel(ch.id, ChannelUpdate {
      name:    Some("ops-night".into()),
      config:  Some(ChannelConfig::Ntfy(NtfyConfig {
        server_url: "https://ntfy.sh".into(),
        topic:      "warden".into(),
        token:      None,
      })),
      enabled: Some(false),
    })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.name, "ops-night");
  assert_eq!(updated.channel_type, "ntfy");
  assert!(!updated.enabled);

  assert_eq!(s.list_channels().await.unwrap().len(), 1);
  assert!(s.delete_channel(ch.id).await.unwrap());
  assert!(!s.delete_channel(ch.id).await.unwrap());
  assert!(s.get_channel(ch.id).await.unwrap().is_none());
  assert!(s.update_channel(ch.id, ChannelUpdate::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_config_is_rejected_on_create() {
  let s = store().await;
  let bad = NewChannel {
    name:    "broken".into(),
    config:  ChannelConfig::Discord(DiscordConfig { webhook_url: String::new() }),
    enabled: true,
  };
  assert!(matches!(s.create_channel(bad).await, Err(Error::Core(_))));
}

#[tokio::test]
async fn rule_links_exclude_disabled_at_read_time() {
  let s    = store().await;
  let rule = Uuid::new_v4();
  let a    = s.create_channel(discord("a")).await.unwrap();
  let b    = s.create_channel(discord("b")).await.unwrap();

  s.set_rule_channels(rule, vec![a.id, b.id]).await.unwrap();
  assert_eq!(s.channels_for_rule(rule, true).await.unwrap().len(), 2);

  s.update_channel(b.id, ChannelUpdate { enabled: Some(false), ..Default::default() })
    .await
    .unwrap();
  let enabled = s.channels_for_rule(rule, true).await.unwrap();
  assert_eq!(enabled.len(), 1);
  assert_eq!(enabled[0].id, a.id);
  assert_eq!(s.channels_for_rule(rule, false).await.unwrap().len(), 2);

  s.delete_channel(a.id).await.unwrap();
  assert!(s.channels_for_rule(rule, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn linking_unknown_channel_rolls_back() {
  let s    = store().await;
  let rule = Uuid::new_v4();
  let a    = s.create_channel(discord("a")).await.unwrap();
  s.set_rule_channels(rule, vec![a.id]).await.unwrap();

  let missing = Uuid::new_v4();
  let err = s.set_rule_channels(rule, vec![missing]).await.unwrap_err();
  assert!(matches!(err, Error::ChannelNotFound(id) if id == missing));

  // Previous link set survives.
  assert_eq!(s.channels_for_rule(rule, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_stored_config_is_still_listed() {
  let s = store().await;
  let id = Uuid::new_v4().to_string();
  let at = encode_dt(Utc::now());
  s.conn
    .call(move |conn| {
      conn.execute(
        "INSERT INTO notification_channels (id, name, channel_type, config_json, enabled, created_at)
         VALUES (?1, 'legacy', 'smoke-signal', '{}', 1, ?2)",
        rusqlite::params![id, at],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let all = s.list_channels().await.unwrap();
  assert_eq!(all.len(), 1);
  assert!(matches!(all[0].decode_config(), Err(CoreError::UnknownChannelType(_))));
}
