//! Handlers for `/violations` endpoints. The log is read-only here; new
//! violations arrive through [`warden_notify::AlertPipeline`].

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use warden_core::{
  store::WardenStore,
  violation::{RuleViolation, ViolationQuery},
};

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub user_name: Option<String>,
  pub rule_id:   Option<Uuid>,
  /// Only violations at or after this instant.
  pub since:     Option<DateTime<Utc>>,
  pub limit:     Option<usize>,
}

/// `GET /violations[?user_name=...][&rule_id=...][&since=...][&limit=...]`
///
/// Newest first.
pub async fn list<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<RuleViolation>>, ApiError> {
  let query = ViolationQuery {
    user_name: params.user_name,
    rule_id:   params.rule_id,
    since:     params.since,
    limit:     params.limit,
  };
  let violations = state.store.list_violations(&query).await.map_err(ApiError::store)?;
  Ok(Json(violations))
}

/// `GET /violations/:id`
pub async fn get_one<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<RuleViolation>, ApiError> {
  let violation = state
    .store
    .get_violation(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("violation {id} not found")))?;
  Ok(Json(violation))
}
