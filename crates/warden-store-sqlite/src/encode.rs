//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that SQL string comparison orders them
//! chronologically. UUIDs are stored as hyphenated lowercase strings and
//! structured payloads as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use warden_core::{
  channel::NotificationChannel,
  geo::GeoResult,
  household::HouseholdLocation,
  trust::UserTrustScore,
  violation::{RuleViolation, Severity},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `geo_cache` row.
pub struct RawGeo {
  pub ip:        String,
  pub latitude:  f64,
  pub longitude: f64,
  pub city:      String,
  pub country:   String,
  pub cached_at: String,
}

impl RawGeo {
  pub const COLUMNS: &'static str = "ip, latitude, longitude, city, country, cached_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ip:        row.get(0)?,
      latitude:  row.get(1)?,
      longitude: row.get(2)?,
      city:      row.get(3)?,
      country:   row.get(4)?,
      cached_at: row.get(5)?,
    })
  }

  /// Decode, returning the result together with its cache timestamp.
  pub fn into_geo(self) -> Result<(GeoResult, DateTime<Utc>)> {
    let cached_at = decode_dt(&self.cached_at)?;
    Ok((
      GeoResult {
        ip:        self.ip,
        latitude:  self.latitude,
        longitude: self.longitude,
        city:      self.city,
        country:   self.country,
      },
      cached_at,
    ))
  }
}

/// Raw values read directly from a `household_locations` row.
pub struct RawHousehold {
  pub id:            String,
  pub user_name:     String,
  pub ip_address:    String,
  pub city:          String,
  pub country:       String,
  pub latitude:      f64,
  pub longitude:     f64,
  pub auto_learned:  bool,
  pub trusted:       bool,
  pub session_count: i64,
  pub first_seen:    String,
  pub last_seen:     String,
}

impl RawHousehold {
  pub const COLUMNS: &'static str = "id, user_name, ip_address, city, country, latitude, \
     longitude, auto_learned, trusted, session_count, first_seen, last_seen";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      user_name:     row.get(1)?,
      ip_address:    row.get(2)?,
      city:          row.get(3)?,
      country:       row.get(4)?,
      latitude:      row.get(5)?,
      longitude:     row.get(6)?,
      auto_learned:  row.get(7)?,
      trusted:       row.get(8)?,
      session_count: row.get(9)?,
      first_seen:    row.get(10)?,
      last_seen:     row.get(11)?,
    })
  }

  pub fn into_household(self) -> Result<HouseholdLocation> {
    Ok(HouseholdLocation {
      id:            decode_uuid(&self.id)?,
      user_name:     self.user_name,
      ip_address:    self.ip_address,
      city:          self.city,
      country:       self.country,
      latitude:      self.latitude,
      longitude:     self.longitude,
      auto_learned:  self.auto_learned,
      trusted:       self.trusted,
      session_count: self.session_count,
      first_seen:    decode_dt(&self.first_seen)?,
      last_seen:     decode_dt(&self.last_seen)?,
    })
  }
}

/// Raw values read directly from a `user_trust_scores` row.
pub struct RawTrust {
  pub user_name:       String,
  pub score:           i64,
  pub violation_count: i64,
  pub updated_at:      String,
}

impl RawTrust {
  pub const COLUMNS: &'static str = "user_name, score, violation_count, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_name:       row.get(0)?,
      score:           row.get(1)?,
      violation_count: row.get(2)?,
      updated_at:      row.get(3)?,
    })
  }

  pub fn into_score(self) -> Result<UserTrustScore> {
    Ok(UserTrustScore {
      user_name:       self.user_name,
      score:           self.score,
      violation_count: self.violation_count,
      updated_at:      Some(decode_dt(&self.updated_at)?),
    })
  }
}

/// Raw values read directly from a `rule_violations` row.
pub struct RawViolation {
  pub id:               String,
  pub rule_id:          String,
  pub user_name:        String,
  pub severity:         String,
  pub message:          String,
  pub details:          String,
  pub confidence_score: f64,
  pub session_key:      Option<String>,
  pub occurred_at:      String,
}

impl RawViolation {
  pub const COLUMNS: &'static str = "id, rule_id, user_name, severity, message, details, \
     confidence_score, session_key, occurred_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      rule_id:          row.get(1)?,
      user_name:        row.get(2)?,
      severity:         row.get(3)?,
      message:          row.get(4)?,
      details:          row.get(5)?,
      confidence_score: row.get(6)?,
      session_key:      row.get(7)?,
      occurred_at:      row.get(8)?,
    })
  }

  pub fn into_violation(self) -> Result<RuleViolation> {
    Ok(RuleViolation {
      id:               decode_uuid(&self.id)?,
      rule_id:          decode_uuid(&self.rule_id)?,
      user_name:        self.user_name,
      severity:         Severity::parse(&self.severity),
      message:          self.message,
      details:          serde_json::from_str(&self.details)?,
      confidence_score: self.confidence_score,
      session_key:      self.session_key,
      occurred_at:      decode_dt(&self.occurred_at)?,
    })
  }
}

/// Raw values read directly from a `notification_channels` row.
pub struct RawChannel {
  pub id:           String,
  pub name:         String,
  pub channel_type: String,
  pub config_json:  String,
  pub enabled:      bool,
  pub created_at:   String,
}

impl RawChannel {
  pub const COLUMNS: &'static str = "id, name, channel_type, config_json, enabled, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      name:         row.get(1)?,
      channel_type: row.get(2)?,
      config_json:  row.get(3)?,
      enabled:      row.get(4)?,
      created_at:   row.get(5)?,
    })
  }

  /// The config is decoded as plain JSON only; typed validation happens when
  /// the channel is used, so one bad row cannot hide the others.
  pub fn into_channel(self) -> Result<NotificationChannel> {
    let config = serde_json::from_str(&self.config_json)
      .unwrap_or(serde_json::Value::String(self.config_json));
    Ok(NotificationChannel {
      id:           decode_uuid(&self.id)?,
      name:         self.name,
      channel_type: self.channel_type,
      config,
      enabled:      self.enabled,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}
