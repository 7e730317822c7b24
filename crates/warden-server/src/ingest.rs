//! Ingestion endpoints fed by the session poller and the rule evaluator.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/ingest/sessions` | Records the session, then runs household learning |
//! | `POST` | `/ingest/violations` | Dedup, record, score and notify one candidate |
//! | `GET`  | `/geo/:ip` | Cache-first geo resolution |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use warden_core::{
  Error as CoreError,
  geo::{GeoLocator, GeoResult},
  household::SessionRecord,
  store::WardenStore,
  violation::{RulePolicy, ViolationCandidate},
};
use warden_notify::Outcome;

use crate::{AppState, error::Error};

// ─── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SessionBody {
  pub user_name:   String,
  pub ip_address:  String,
  #[serde(default)]
  pub session_key: Option<String>,
  /// Defaults to the time of the request.
  #[serde(default)]
  pub started_at:  Option<DateTime<Utc>>,
}

/// `POST /ingest/sessions`: returns `{"learned": bool}`.
pub async fn session<S, L>(
  State(state): State<AppState<S, L>>,
  Json(body): Json<SessionBody>,
) -> Result<Json<serde_json::Value>, Error>
where
  S: WardenStore,
  L: GeoLocator,
{
  if body.user_name.trim().is_empty() {
    return Err(Error::BadRequest("user_name is required".into()));
  }
  let ip = body.ip_address.trim().to_owned();

  if !ip.is_empty() {
    state
      .store
      .record_session(SessionRecord {
        user_name:   body.user_name.clone(),
        ip_address:  ip.clone(),
        session_key: body.session_key.filter(|k| !k.is_empty()),
        started_at:  body.started_at.unwrap_or_else(Utc::now),
      })
      .await
      .map_err(CoreError::store)?;
  }

  let learned = state
    .learner
    .consider_session(&body.user_name, &ip, state.config.household_session_threshold)
    .await?;
  Ok(Json(json!({ "learned": learned })))
}

// ─── Violations ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ViolationBody {
  #[serde(flatten)]
  pub candidate:         ViolationCandidate,
  /// Overrides the configured dedup window for this rule.
  #[serde(default)]
  pub dedup_window_secs: Option<i64>,
  /// Overrides the configured penalty for this rule.
  #[serde(default)]
  pub score_penalty:     Option<i64>,
}

/// `POST /ingest/violations`: 201 when recorded, 200 when suppressed.
///
/// Delivery failures do not fail the request; they are listed in
/// `delivery_failures`, and a failure to load the rule's channels is given
/// in `channel_lookup_error`.
pub async fn violation<S, L>(
  State(state): State<AppState<S, L>>,
  Json(body): Json<ViolationBody>,
) -> Result<impl IntoResponse, Error>
where
  S: WardenStore,
  L: GeoLocator,
{
  if body.candidate.user_name.trim().is_empty() {
    return Err(Error::BadRequest("user_name is required".into()));
  }
  let window = body.dedup_window_secs.unwrap_or(state.config.dedup_window_secs);
  if window < 0 {
    return Err(Error::BadRequest("dedup_window_secs must not be negative".into()));
  }
  let dedup_window = Duration::try_seconds(window)
    .ok_or_else(|| Error::BadRequest(format!("dedup_window_secs {window} is out of range")))?;
  let score_penalty = body.score_penalty.unwrap_or(state.config.score_penalty);
  if score_penalty < 0 {
    return Err(Error::BadRequest("score_penalty must not be negative".into()));
  }
  let policy = RulePolicy { dedup_window, score_penalty };

  let response = match state.pipeline.submit(body.candidate, policy).await? {
    Outcome::Suppressed => (StatusCode::OK, Json(json!({ "status": "suppressed" }))),
    Outcome::Recorded { violation, score, delivery } => {
      let delivery = delivery.err().unwrap_or_default();
      let failures: Vec<_> = delivery
        .failures
        .into_iter()
        .map(|f| {
          json!({
            "channel_id":   f.channel_id,
            "channel_name": f.channel_name,
            "error":        f.error,
          })
        })
        .collect();
      (
        StatusCode::CREATED,
        Json(json!({
          "status":            "recorded",
          "violation":         violation,
          "score":             score,
          "delivery_failures": failures,
          "channel_lookup_error": delivery.channel_lookup,
        })),
      )
    }
  };
  Ok(response)
}

// ─── Geo ─────────────────────────────────────────────────────────────────────

/// `GET /geo/:ip`
pub async fn geo<S, L>(
  State(state): State<AppState<S, L>>,
  Path(ip): Path<String>,
) -> Result<Json<GeoResult>, Error>
where
  S: WardenStore,
  L: GeoLocator,
{
  Ok(Json(state.learner.geo().resolve(&ip).await?))
}
