//! SQL schema for the Warden SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Rows are overwritten on re-resolution and never deleted; freshness is
-- judged against cached_at at read time.
CREATE TABLE IF NOT EXISTS geo_cache (
    ip         TEXT PRIMARY KEY,
    latitude   REAL NOT NULL,
    longitude  REAL NOT NULL,
    city       TEXT NOT NULL,
    country    TEXT NOT NULL,
    cached_at  TEXT NOT NULL     -- ISO 8601 UTC
);

CREATE TABLE IF NOT EXISTS session_history (
    id           INTEGER PRIMARY KEY,
    user_name    TEXT NOT NULL,
    ip_address   TEXT NOT NULL,
    session_key  TEXT,
    started_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS household_locations (
    id             TEXT PRIMARY KEY,
    user_name      TEXT NOT NULL,
    ip_address     TEXT NOT NULL,
    city           TEXT NOT NULL DEFAULT '',
    country        TEXT NOT NULL DEFAULT '',
    latitude       REAL NOT NULL DEFAULT 0,
    longitude      REAL NOT NULL DEFAULT 0,
    auto_learned   INTEGER NOT NULL DEFAULT 1,
    trusted        INTEGER NOT NULL DEFAULT 0,
    session_count  INTEGER NOT NULL DEFAULT 0,
    first_seen     TEXT NOT NULL,
    last_seen      TEXT NOT NULL,
    UNIQUE (user_name, ip_address)
);

CREATE TABLE IF NOT EXISTS user_trust_scores (
    user_name        TEXT PRIMARY KEY,
    score            INTEGER NOT NULL,
    violation_count  INTEGER NOT NULL DEFAULT 0,
    updated_at       TEXT NOT NULL
);

-- Strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS rule_violations (
    id                TEXT PRIMARY KEY,
    rule_id           TEXT NOT NULL,
    user_name         TEXT NOT NULL,
    severity          TEXT NOT NULL,   -- 'info' | 'warning' | 'critical'
    message           TEXT NOT NULL,
    details           TEXT NOT NULL DEFAULT 'null',
    confidence_score  REAL NOT NULL,
    session_key       TEXT,
    occurred_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_channels (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    channel_type  TEXT NOT NULL,     -- discriminant of ChannelConfig
    config_json   TEXT NOT NULL,     -- inner config payload only
    enabled       INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_channels (
    rule_id     TEXT NOT NULL,
    channel_id  TEXT NOT NULL REFERENCES notification_channels(id) ON DELETE CASCADE,
    PRIMARY KEY (rule_id, channel_id)
);

CREATE INDEX IF NOT EXISTS session_history_user_ip_idx ON session_history(user_name, ip_address);
CREATE INDEX IF NOT EXISTS household_user_idx          ON household_locations(user_name);
CREATE INDEX IF NOT EXISTS violations_dedup_idx        ON rule_violations(rule_id, user_name, occurred_at);
CREATE INDEX IF NOT EXISTS violations_user_idx         ON rule_violations(user_name);

PRAGMA user_version = 1;
";
