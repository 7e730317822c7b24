//! Handlers for `/rules/:rule_id/channels`.
//!
//! Rules themselves live with the external rule evaluator; Warden only keeps
//! which channels each rule id notifies.

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use uuid::Uuid;
use warden_core::{channel::NotificationChannel, store::WardenStore};

use crate::{ApiState, error::ApiError};

/// `GET /rules/:rule_id/channels`: every linked channel, enabled or not.
pub async fn list_channels<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(rule_id): Path<Uuid>,
) -> Result<Json<Vec<NotificationChannel>>, ApiError> {
  let channels = state
    .store
    .channels_for_rule(rule_id, false)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(channels))
}

#[derive(Debug, Deserialize)]
pub struct SetChannelsBody {
  pub channel_ids: Vec<Uuid>,
}

/// `PUT /rules/:rule_id/channels`: body: `{"channel_ids":[...]}`.
///
/// Replaces the whole link set. Unknown ids are a 400 and leave the
/// previous links in place.
pub async fn set_channels<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(rule_id): Path<Uuid>,
  Json(body): Json<SetChannelsBody>,
) -> Result<Json<Vec<NotificationChannel>>, ApiError> {
  for id in &body.channel_ids {
    if state.store.get_channel(*id).await.map_err(ApiError::store)?.is_none() {
      return Err(ApiError::BadRequest(format!("unknown channel id {id}")));
    }
  }

  state
    .store
    .set_rule_channels(rule_id, body.channel_ids)
    .await
    .map_err(ApiError::store)?;

  let channels = state
    .store
    .channels_for_rule(rule_id, false)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(channels))
}
