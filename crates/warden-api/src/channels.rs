//! Handlers for `/channels` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/channels` | All channels, including malformed rows |
//! | `POST`   | `/channels` | Body: [`CreateBody`]; 400 on invalid config |
//! | `GET`    | `/channels/:id` | 404 if not found |
//! | `PUT`    | `/channels/:id` | Body: [`UpdateBody`]; absent fields unchanged |
//! | `DELETE` | `/channels/:id` | 204; rule links go with it |
//! | `POST`   | `/channels/:id/test` | Sends a synthetic violation; 502 on failure |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;
use warden_core::{
  channel::{ChannelConfig, ChannelUpdate, NewChannel, NotificationChannel},
  store::WardenStore,
};

use crate::{ApiState, error::ApiError};

fn decode(channel_type: &str, config: Value) -> Result<ChannelConfig, ApiError> {
  ChannelConfig::from_parts(channel_type, config).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn find<S: WardenStore>(store: &S, id: Uuid) -> Result<NotificationChannel, ApiError> {
  store
    .get_channel(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("channel {id} not found")))
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /channels`
pub async fn list<S: WardenStore>(
  State(state): State<ApiState<S>>,
) -> Result<Json<Vec<NotificationChannel>>, ApiError> {
  let channels = state.store.list_channels().await.map_err(ApiError::store)?;
  Ok(Json(channels))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:         String,
  pub channel_type: String,
  pub config:       Value,
  #[serde(default = "default_enabled")]
  pub enabled:      bool,
}

fn default_enabled() -> bool { true }

/// `POST /channels`: returns 201 + the stored channel.
pub async fn create<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  if body.name.trim().is_empty() {
    return Err(ApiError::BadRequest("name is required".into()));
  }
  let config = decode(&body.channel_type, body.config)?;

  let channel = state
    .store
    .create_channel(NewChannel { name: body.name, config, enabled: body.enabled })
    .await
    .map_err(ApiError::store)?;

  info!(channel_id = %channel.id, channel_type = channel.channel_type, "channel created");
  Ok((StatusCode::CREATED, Json(channel)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /channels/:id`
pub async fn get_one<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<NotificationChannel>, ApiError> {
  Ok(Json(find(state.store.as_ref(), id).await?))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `PUT /channels/:id`.
///
/// A new `config` is decoded against `channel_type` when given, otherwise
/// against the channel's current type.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBody {
  pub name:         Option<String>,
  pub channel_type: Option<String>,
  pub config:       Option<Value>,
  pub enabled:      Option<bool>,
}

/// `PUT /channels/:id`
pub async fn update<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<UpdateBody>,
) -> Result<Json<NotificationChannel>, ApiError> {
  if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
    return Err(ApiError::BadRequest("name must not be empty".into()));
  }

  let config = match (body.channel_type, body.config) {
    (Some(kind), Some(config)) => Some(decode(&kind, config)?),
    (None, Some(config)) => {
      let current = find(state.store.as_ref(), id).await?;
      Some(decode(&current.channel_type, config)?)
    }
    (Some(_), None) => {
      return Err(ApiError::BadRequest("channel_type requires a config".into()));
    }
    (None, None) => None,
  };

  let update = ChannelUpdate { name: body.name, config, enabled: body.enabled };
  let channel = state
    .store
    .update_channel(id, update)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("channel {id} not found")))?;
  Ok(Json(channel))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /channels/:id`: 204, or 404 if it did not exist.
pub async fn delete<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  if state.store.delete_channel(id).await.map_err(ApiError::store)? {
    info!(channel_id = %id, "channel deleted");
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("channel {id} not found")))
  }
}

// ─── Test ─────────────────────────────────────────────────────────────────────

/// `POST /channels/:id/test`
pub async fn test<S: WardenStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
  let channel = find(state.store.as_ref(), id).await?;
  state
    .notifier
    .test_channel(&channel)
    .await
    .map_err(|e| ApiError::Delivery(e.to_string()))?;
  Ok(Json(json!({ "delivered": true })))
}
