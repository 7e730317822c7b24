//! JSON admin API for Warden.
//!
//! Exposes an axum [`Router`] backed by any [`warden_core::store::WardenStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", warden_api::api_router(ApiState::new(store, notifier)))
//! ```

pub mod channels;
pub mod error;
pub mod rules;
pub mod users;
pub mod violations;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use warden_core::store::WardenStore;
use warden_notify::Notifier;

pub use error::ApiError;

/// State shared by every API handler.
pub struct ApiState<S> {
  pub store:    Arc<S>,
  pub notifier: Notifier,
}

impl<S> ApiState<S> {
  pub fn new(store: Arc<S>, notifier: Notifier) -> Self { Self { store, notifier } }
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), notifier: self.notifier.clone() }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: ApiState<S>) -> Router<()>
where
  S: WardenStore + 'static,
{
  Router::new()
    // Channels
    .route("/channels", get(channels::list::<S>).post(channels::create::<S>))
    .route(
      "/channels/{id}",
      get(channels::get_one::<S>)
        .put(channels::update::<S>)
        .delete(channels::delete::<S>),
    )
    .route("/channels/{id}/test", post(channels::test::<S>))
    // Rule links
    .route("/rules/{rule_id}/channels", get(rules::list_channels::<S>).put(rules::set_channels::<S>))
    // Users, households, trust
    .route("/users/{user}/trust", get(users::trust::<S>))
    .route("/users/{user}/households", get(users::households::<S>))
    .route("/households/{id}/trusted", put(users::set_trusted::<S>))
    .route("/trust", get(users::list_trust::<S>))
    // Violations
    .route("/violations", get(violations::list::<S>))
    .route("/violations/{id}", get(violations::get_one::<S>))
    .with_state(state)
}
