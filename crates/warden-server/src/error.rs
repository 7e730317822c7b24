//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error(transparent)]
  Core(#[from] warden_core::Error),
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"warden\""),
        );
        res
      }
      Error::BadRequest(msg) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
      }
      Error::Core(warden_core::Error::InvalidIp(ip)) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("invalid ip address: {ip}") })),
      )
        .into_response(),
      Error::Core(warden_core::Error::GeoLookup(msg)) => {
        (StatusCode::BAD_GATEWAY, Json(json!({ "error": msg }))).into_response()
      }
      Error::Core(e) => {
        tracing::error!(error = %e, "ingest request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
          .into_response()
      }
    }
  }
}
