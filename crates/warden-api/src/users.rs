//! Handlers for per-user trust scores and household locations.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users/:user/trust` | Virtual default (100, no violations) for unseen users |
//! | `GET`  | `/users/:user/households` | Optional `?trusted=true` |
//! | `PUT`  | `/households/:id/trusted` | Body: `{"trusted":true}` |
//! | `GET`  | `/trust` | Lowest scores first; optional `?limit` |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use warden_core::{household::HouseholdLocation, store::WardenStore, trust::UserTrustScore};

use crate::{ApiState, error::ApiError};

const DEFAULT_TRUST_LIMIT: usize = 50;

/// `GET /users/:user/trust`
pub async fn trust<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(user): Path<String>,
) -> Result<Json<UserTrustScore>, ApiError> {
  let score = state.store.get_trust_score(&user).await.map_err(ApiError::store)?;
  Ok(Json(score))
}

#[derive(Debug, Deserialize)]
pub struct TrustListParams {
  pub limit: Option<usize>,
}

/// `GET /trust[?limit=<n>]`
pub async fn list_trust<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<TrustListParams>,
) -> Result<Json<Vec<UserTrustScore>>, ApiError> {
  let scores = state
    .store
    .list_trust_scores(params.limit.unwrap_or(DEFAULT_TRUST_LIMIT))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(scores))
}

#[derive(Debug, Deserialize)]
pub struct HouseholdParams {
  #[serde(default)]
  pub trusted: bool,
}

/// `GET /users/:user/households[?trusted=true]`
pub async fn households<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(user): Path<String>,
  Query(params): Query<HouseholdParams>,
) -> Result<Json<Vec<HouseholdLocation>>, ApiError> {
  let locations = state
    .store
    .list_households(&user, params.trusted)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(locations))
}

#[derive(Debug, Deserialize)]
pub struct TrustedBody {
  pub trusted: bool,
}

/// `PUT /households/:id/trusted`
pub async fn set_trusted<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<TrustedBody>,
) -> Result<Json<HouseholdLocation>, ApiError> {
  let location = state
    .store
    .set_household_trusted(id, body.trusted)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("household {id} not found")))?;

  info!(
    household_id = %id,
    user = location.user_name,
    trusted = location.trusted,
    "household trust changed"
  );
  Ok(Json(location))
}
