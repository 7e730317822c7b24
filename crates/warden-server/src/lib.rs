//! HTTP server for Warden.
//!
//! Mounts the admin API and the ingestion endpoints under `/api`, behind
//! HTTP Basic auth, for any [`WardenStore`] and [`GeoLocator`].

pub mod auth;
pub mod error;
pub mod geoip;
pub mod ingest;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  middleware,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use warden_api::ApiState;
use warden_core::{geo::GeoLocator, household::HouseholdLearner, store::WardenStore};
use warden_notify::{AlertPipeline, Notifier};

use auth::{AuthConfig, require_auth};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                        String,
  pub port:                        u16,
  pub store_path:                  PathBuf,
  pub auth_username:               String,
  pub auth_password_hash:          String,
  /// Per-request timeout for notification and geo lookups.
  #[serde(default = "defaults::notify_timeout_secs")]
  pub notify_timeout_secs:         u64,
  #[serde(default = "defaults::geo_lookup_url")]
  pub geo_lookup_url:              String,
  /// Sessions from one `(user, ip)` before it becomes a household location.
  #[serde(default = "defaults::household_session_threshold")]
  pub household_session_threshold: i64,
  #[serde(default = "defaults::dedup_window_secs")]
  pub dedup_window_secs:           i64,
  #[serde(default = "defaults::score_penalty")]
  pub score_penalty:               i64,
}

mod defaults {
  pub fn notify_timeout_secs() -> u64 { 10 }
  pub fn geo_lookup_url() -> String { "http://ip-api.com".to_owned() }
  pub fn household_session_threshold() -> i64 { 10 }
  pub fn dedup_window_secs() -> i64 { 30 * 60 }
  pub fn score_penalty() -> i64 { 10 }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through the ingestion handlers.
pub struct AppState<S, L> {
  pub store:    Arc<S>,
  pub notifier: Notifier,
  pub pipeline: AlertPipeline<S>,
  pub learner:  HouseholdLearner<S, L>,
  pub config:   Arc<ServerConfig>,
  pub auth:     Arc<AuthConfig>,
}

impl<S, L> Clone for AppState<S, L> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      notifier: self.notifier.clone(),
      pipeline: self.pipeline.clone(),
      learner:  self.learner.clone(),
      config:   Arc::clone(&self.config),
      auth:     Arc::clone(&self.auth),
    }
  }
}

impl<S, L> AppState<S, L>
where
  S: WardenStore,
  L: GeoLocator,
{
  pub fn new(store: Arc<S>, locator: Arc<L>, notifier: Notifier, config: ServerConfig) -> Self {
    let auth = AuthConfig {
      username:      config.auth_username.clone(),
      password_hash: config.auth_password_hash.clone(),
    };
    Self {
      pipeline: AlertPipeline::new(Arc::clone(&store), notifier.clone()),
      learner:  HouseholdLearner::new(Arc::clone(&store), locator),
      store,
      notifier,
      config:   Arc::new(config),
      auth:     Arc::new(auth),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full application router.
pub fn router<S, L>(state: AppState<S, L>) -> Router
where
  S: WardenStore + 'static,
  L: GeoLocator + 'static,
{
  let admin = warden_api::api_router(ApiState::new(
    Arc::clone(&state.store),
    state.notifier.clone(),
  ));

  let ingest = Router::new()
    .route("/ingest/sessions", post(ingest::session::<S, L>))
    .route("/ingest/violations", post(ingest::violation::<S, L>))
    .route("/geo/{ip}", get(ingest::geo::<S, L>))
    .with_state(state.clone());

  let api = admin
    .merge(ingest)
    .layer(middleware::from_fn_with_state(Arc::clone(&state.auth), require_auth));

  Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

// ─── Integration tests ────────────────────────────────────────────────────────
