//! [`SqliteStore`]: the SQLite implementation of [`WardenStore`].

use std::{collections::HashMap, path::Path};

use chrono::{DateTime, Datelike as _, Duration, Utc};
use rusqlite::OptionalExtension as _;
use tracing::debug;
use uuid::Uuid;

use warden_core::{
  channel::{ChannelUpdate, NewChannel, NotificationChannel},
  geo::{GeoResult, is_fresh},
  household::{HouseholdLocation, HouseholdUpsert, SessionRecord},
  store::WardenStore,
  trust::{INITIAL_TRUST_SCORE, UserTrustScore},
  violation::{RuleViolation, ViolationQuery},
};

use crate::{
  Error, Result,
  encode::{
    RawChannel, RawGeo, RawHousehold, RawTrust, RawViolation, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Warden store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store: useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_channel(&self, id: Uuid) -> Result<Option<RawChannel>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM notification_channels WHERE id = ?1", RawChannel::COLUMNS),
            rusqlite::params![id_str],
            RawChannel::from_row,
          )
          .optional()?)
      })
      .await?;
    Ok(raw)
  }

  async fn query_household(&self, id: Uuid) -> Result<Option<RawHousehold>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM household_locations WHERE id = ?1", RawHousehold::COLUMNS),
            rusqlite::params![id_str],
            RawHousehold::from_row,
          )
          .optional()?)
      })
      .await?;
    Ok(raw)
  }
}

/// Seed-or-decrement a trust row in one statement.
///
/// Runs on whatever connection or transaction it is handed, so
/// `record_violation` can share its transaction.
fn decrement_trust_row(
  conn:      &rusqlite::Connection,
  user_name: &str,
  amount:    i64,
  at:        &str,
) -> rusqlite::Result<RawTrust> {
  conn.query_row(
    &format!(
      "INSERT INTO user_trust_scores (user_name, score, violation_count, updated_at)
       VALUES (?1, ?4 - ?2, 1, ?3)
       ON CONFLICT(user_name) DO UPDATE SET
         score           = user_trust_scores.score - ?2,
         violation_count = user_trust_scores.violation_count + 1,
         updated_at      = excluded.updated_at
       RETURNING {}",
      RawTrust::COLUMNS
    ),
    rusqlite::params![user_name, amount, at, INITIAL_TRUST_SCORE],
    RawTrust::from_row,
  )
}

// ─── WardenStore impl ────────────────────────────────────────────────────────

impl WardenStore for SqliteStore {
  type Error = Error;

  // ── Geo cache ─────────────────────────────────────────────────────────────

  async fn resolve_geo(
    &self,
    ip:    &str,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<Option<GeoResult>> {
    let ip_str = ip.to_owned();

    let raw: Option<RawGeo> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM geo_cache WHERE ip = ?1", RawGeo::COLUMNS),
            rusqlite::params![ip_str],
            RawGeo::from_row,
          )
          .optional()?)
      })
      .await?;

    let Some(raw) = raw else { return Ok(None) };
    let (geo, cached_at) = raw.into_geo()?;
    let as_of = as_of.unwrap_or_else(Utc::now);

    if is_fresh(cached_at, as_of) {
      Ok(Some(geo))
    } else {
      debug!(ip, %cached_at, "geo cache entry expired");
      Ok(None)
    }
  }

  async fn resolve_geo_batch(
    &self,
    ips:   &[String],
    as_of: Option<DateTime<Utc>>,
  ) -> Result<HashMap<String, GeoResult>> {
    let mut wanted = ips.to_vec();
    wanted.sort();
    wanted.dedup();

    let raws: Vec<RawGeo> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {} FROM geo_cache WHERE ip = ?1",
          RawGeo::COLUMNS
        ))?;
        let mut found = Vec::with_capacity(wanted.len());
        for ip in &wanted {
          if let Some(raw) = stmt
            .query_row(rusqlite::params![ip], RawGeo::from_row)
            .optional()?
          {
            found.push(raw);
          }
        }
        Ok(found)
      })
      .await?;

    let as_of = as_of.unwrap_or_else(Utc::now);
    let mut fresh = HashMap::with_capacity(raws.len());
    for raw in raws {
      let (geo, cached_at) = raw.into_geo()?;
      if is_fresh(cached_at, as_of) {
        fresh.insert(geo.ip.clone(), geo);
      }
    }
    Ok(fresh)
  }

  async fn store_geo(&self, geo: GeoResult) -> Result<()> {
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO geo_cache (ip, latitude, longitude, city, country, cached_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(ip) DO UPDATE SET
             latitude  = excluded.latitude,
             longitude = excluded.longitude,
             city      = excluded.city,
             country   = excluded.country,
             cached_at = excluded.cached_at",
          rusqlite::params![geo.ip, geo.latitude, geo.longitude, geo.city, geo.country, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Session history ───────────────────────────────────────────────────────

  async fn record_session(&self, session: SessionRecord) -> Result<()> {
    let at_str = encode_dt(session.started_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO session_history (user_name, ip_address, session_key, started_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![session.user_name, session.ip_address, session.session_key, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn count_sessions(&self, user_name: &str, ip: &str) -> Result<i64> {
    let user = user_name.to_owned();
    let ip   = ip.to_owned();

    let count = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM session_history WHERE user_name = ?1 AND ip_address = ?2",
          rusqlite::params![user, ip],
          |r| r.get::<_, i64>(0),
        )?)
      })
      .await?;
    Ok(count)
  }

  // ── Household locations ───────────────────────────────────────────────────

  async fn upsert_household(
    &self,
    upsert: HouseholdUpsert,
  ) -> Result<(HouseholdLocation, bool)> {
    let new_id  = encode_uuid(Uuid::new_v4());
    let seen_at = encode_dt(upsert.seen_at);

    let (raw, created) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
          .query_row(
            "SELECT id FROM household_locations WHERE user_name = ?1 AND ip_address = ?2",
            rusqlite::params![upsert.user_name, upsert.ip_address],
            |r| r.get(0),
          )
          .optional()?;

        let created = existing.is_none();
        let id = match existing {
          None => {
            let geo = upsert.geo.as_ref();
            tx.execute(
              "INSERT INTO household_locations (
                 id, user_name, ip_address, city, country, latitude, longitude,
                 auto_learned, trusted, session_count, first_seen, last_seen
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, ?8, ?9, ?9)",
              rusqlite::params![
                new_id,
                upsert.user_name,
                upsert.ip_address,
                geo.map(|g| g.city.as_str()).unwrap_or(""),
                geo.map(|g| g.country.as_str()).unwrap_or(""),
                geo.map(|g| g.latitude).unwrap_or(0.0),
                geo.map(|g| g.longitude).unwrap_or(0.0),
                upsert.session_count,
                seen_at,
              ],
            )?;
            new_id
          }
          Some(id) => {
            tx.execute(
              "UPDATE household_locations
                  SET session_count = MAX(session_count, ?2),
                      last_seen     = ?3
                WHERE id = ?1",
              rusqlite::params![id, upsert.session_count, seen_at],
            )?;
            if let Some(geo) = &upsert.geo {
              tx.execute(
                "UPDATE household_locations
                    SET city = ?2, country = ?3, latitude = ?4, longitude = ?5
                  WHERE id = ?1",
                rusqlite::params![id, geo.city, geo.country, geo.latitude, geo.longitude],
              )?;
            }
            id
          }
        };

        let raw = tx.query_row(
          &format!("SELECT {} FROM household_locations WHERE id = ?1", RawHousehold::COLUMNS),
          rusqlite::params![id],
          RawHousehold::from_row,
        )?;
        tx.commit()?;
        Ok((raw, created))
      })
      .await?;

    Ok((raw.into_household()?, created))
  }

  async fn get_household(&self, id: Uuid) -> Result<Option<HouseholdLocation>> {
    self.query_household(id).await?.map(RawHousehold::into_household).transpose()
  }

  async fn list_households(
    &self,
    user_name:    &str,
    trusted_only: bool,
  ) -> Result<Vec<HouseholdLocation>> {
    let user = user_name.to_owned();

    let raws: Vec<RawHousehold> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM household_locations
            WHERE user_name = ?1 AND (?2 = 0 OR trusted = 1)
            ORDER BY last_seen DESC",
          RawHousehold::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user, trusted_only], RawHousehold::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHousehold::into_household).collect()
  }

  async fn set_household_trusted(
    &self,
    id:      Uuid,
    trusted: bool,
  ) -> Result<Option<HouseholdLocation>> {
    let id_str = encode_uuid(id);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE household_locations SET trusted = ?2 WHERE id = ?1",
          rusqlite::params![id_str, trusted],
        )?)
      })
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    self.get_household(id).await
  }

  // ── Trust scores ──────────────────────────────────────────────────────────

  async fn get_trust_score(&self, user_name: &str) -> Result<UserTrustScore> {
    let user = user_name.to_owned();

    let raw: Option<RawTrust> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM user_trust_scores WHERE user_name = ?1", RawTrust::COLUMNS),
            rusqlite::params![user],
            RawTrust::from_row,
          )
          .optional()?)
      })
      .await?;

    match raw {
      Some(raw) => raw.into_score(),
      None => Ok(UserTrustScore::initial(user_name)),
    }
  }

  async fn decrement_trust_score(
    &self,
    user_name: &str,
    amount:    i64,
    at:        DateTime<Utc>,
  ) -> Result<UserTrustScore> {
    if amount < 0 {
      return Err(Error::NegativePenalty(amount));
    }
    let user   = user_name.to_owned();
    let at_str = encode_dt(at);

    let raw = self
      .conn
      .call(move |conn| Ok(decrement_trust_row(conn, &user, amount, &at_str)?))
      .await?;

    raw.into_score()
  }

  async fn list_trust_scores(&self, limit: usize) -> Result<Vec<UserTrustScore>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawTrust> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM user_trust_scores ORDER BY score ASC, user_name ASC LIMIT ?1",
          RawTrust::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], RawTrust::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTrust::into_score).collect()
  }

  // ── Violations ────────────────────────────────────────────────────────────

  async fn violation_exists_recent(
    &self,
    rule_id:     Uuid,
    user_name:   &str,
    session_key: Option<&str>,
    window:      Duration,
    as_of:       Option<DateTime<Utc>>,
  ) -> Result<bool> {
    let rule_str   = encode_uuid(rule_id);
    let user       = user_name.to_owned();
    let key        = session_key.filter(|k| !k.is_empty()).map(str::to_owned);
    // A window reaching before year 1 (or past the representable range)
    // covers all history; no lower bound is applied.
    let cutoff_str = as_of
      .unwrap_or_else(Utc::now)
      .checked_sub_signed(window)
      .filter(|cutoff| cutoff.year() >= 1)
      .map(encode_dt);

    let exists = self
      .conn
      .call(move |conn| {
        let found = match key {
          Some(key) => conn.query_row(
            "SELECT EXISTS (
               SELECT 1 FROM rule_violations
                WHERE rule_id = ?1 AND user_name = ?2 AND session_key = ?3
                  AND (?4 IS NULL OR occurred_at >= ?4)
             )",
            rusqlite::params![rule_str, user, key, cutoff_str],
            |r| r.get::<_, bool>(0),
          )?,
          None => conn.query_row(
            "SELECT EXISTS (
               SELECT 1 FROM rule_violations
                WHERE rule_id = ?1 AND user_name = ?2
                  AND (?3 IS NULL OR occurred_at >= ?3)
             )",
            rusqlite::params![rule_str, user, cutoff_str],
            |r| r.get::<_, bool>(0),
          )?,
        };
        Ok(found)
      })
      .await?;

    Ok(exists)
  }

  async fn record_violation(
    &self,
    violation:     RuleViolation,
    score_penalty: i64,
  ) -> Result<UserTrustScore> {
    if score_penalty < 0 {
      return Err(Error::NegativePenalty(score_penalty));
    }
    let id_str       = encode_uuid(violation.id);
    let rule_str     = encode_uuid(violation.rule_id);
    let severity_str = violation.severity.as_str();
    let details_str  = serde_json::to_string(&violation.details)?;
    let at_str       = encode_dt(violation.occurred_at);
    let user         = violation.user_name;
    let message      = violation.message;
    let confidence   = violation.confidence_score;
    let session_key  = violation.session_key.filter(|k| !k.is_empty());

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO rule_violations (
             id, rule_id, user_name, severity, message, details,
             confidence_score, session_key, occurred_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            rule_str,
            user,
            severity_str,
            message,
            details_str,
            confidence,
            session_key,
            at_str,
          ],
        )?;
        let raw = decrement_trust_row(&tx, &user, score_penalty, &at_str)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_score()
  }

  async fn get_violation(&self, id: Uuid) -> Result<Option<RuleViolation>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawViolation> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM rule_violations WHERE id = ?1", RawViolation::COLUMNS),
            rusqlite::params![id_str],
            RawViolation::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawViolation::into_violation).transpose()
  }

  async fn list_violations(&self, query: &ViolationQuery) -> Result<Vec<RuleViolation>> {
    let user      = query.user_name.clone();
    let rule_str  = query.rule_id.map(encode_uuid);
    let since_str = query.since.map(encode_dt);
    let limit_val = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)).unwrap_or(100);

    let raws: Vec<RawViolation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM rule_violations
            WHERE (?1 IS NULL OR user_name = ?1)
              AND (?2 IS NULL OR rule_id = ?2)
              AND (?3 IS NULL OR occurred_at >= ?3)
            ORDER BY occurred_at DESC
            LIMIT ?4",
          RawViolation::COLUMNS
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![user, rule_str, since_str, limit_val],
            RawViolation::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawViolation::into_violation).collect()
  }

  // ── Notification channels ─────────────────────────────────────────────────

  async fn create_channel(&self, input: NewChannel) -> Result<NotificationChannel> {
    input.config.validate()?;

    let channel = NotificationChannel {
      id:           Uuid::new_v4(),
      name:         input.name,
      channel_type: input.config.discriminant().to_owned(),
      config:       input.config.to_json()?,
      enabled:      input.enabled,
      created_at:   Utc::now(),
    };

    let id_str     = encode_uuid(channel.id);
    let name       = channel.name.clone();
    let type_str   = channel.channel_type.clone();
    let config_str = channel.config.to_string();
    let enabled    = channel.enabled;
    let at_str     = encode_dt(channel.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO notification_channels
             (id, name, channel_type, config_json, enabled, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, name, type_str, config_str, enabled, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(channel)
  }

  async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
    self.query_channel(id).await?.map(RawChannel::into_channel).transpose()
  }

  async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
    let raws: Vec<RawChannel> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM notification_channels ORDER BY created_at, name",
          RawChannel::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawChannel::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChannel::into_channel).collect()
  }

  async fn update_channel(
    &self,
    id:     Uuid,
    update: ChannelUpdate,
  ) -> Result<Option<NotificationChannel>> {
    let typed = match &update.config {
      Some(config) => {
        config.validate()?;
        Some((config.discriminant().to_owned(), config.to_json()?.to_string()))
      }
      None => None,
    };

    let id_str  = encode_uuid(id);
    let name    = update.name;
    let enabled = update.enabled;

    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut changed = tx.execute(
          "UPDATE notification_channels
              SET name    = COALESCE(?2, name),
                  enabled = COALESCE(?3, enabled)
            WHERE id = ?1",
          rusqlite::params![id_str, name, enabled],
        )?;
        if let Some((type_str, config_str)) = typed {
          changed = tx.execute(
            "UPDATE notification_channels SET channel_type = ?2, config_json = ?3 WHERE id = ?1",
            rusqlite::params![id_str, type_str, config_str],
          )?;
        }
        tx.commit()?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    self.get_channel(id).await
  }

  async fn delete_channel(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM rule_channels WHERE channel_id = ?1", rusqlite::params![id_str])?;
        let n = tx.execute(
          "DELETE FROM notification_channels WHERE id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok(n > 0)
      })
      .await?;

    Ok(deleted)
  }

  async fn set_rule_channels(&self, rule_id: Uuid, channel_ids: Vec<Uuid>) -> Result<()> {
    let rule_str = encode_uuid(rule_id);
    let ids: Vec<(Uuid, String)> =
      channel_ids.into_iter().map(|id| (id, encode_uuid(id))).collect();

    // The closure reports the first unknown channel instead of failing, and
    // drops the transaction (rolling back) in that case.
    let missing: Option<Uuid> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM rule_channels WHERE rule_id = ?1", rusqlite::params![rule_str])?;
        for (id, id_str) in &ids {
          let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM notification_channels WHERE id = ?1)",
            rusqlite::params![id_str],
            |r| r.get(0),
          )?;
          if !exists {
            return Ok(Some(*id));
          }
          tx.execute(
            "INSERT OR IGNORE INTO rule_channels (rule_id, channel_id) VALUES (?1, ?2)",
            rusqlite::params![rule_str, id_str],
          )?;
        }
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match missing {
      Some(id) => Err(Error::ChannelNotFound(id)),
      None => Ok(()),
    }
  }

  async fn channels_for_rule(
    &self,
    rule_id:      Uuid,
    enabled_only: bool,
  ) -> Result<Vec<NotificationChannel>> {
    let rule_str = encode_uuid(rule_id);

    let raws: Vec<RawChannel> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT c.id, c.name, c.channel_type, c.config_json, c.enabled, c.created_at
             FROM notification_channels c
             JOIN rule_channels rc ON rc.channel_id = c.id
            WHERE rc.rule_id = ?1 AND (?2 = 0 OR c.enabled = 1)
            ORDER BY c.created_at, c.name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![rule_str, enabled_only], RawChannel::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChannel::into_channel).collect()
  }
}
