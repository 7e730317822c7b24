//! Core types and trait definitions for Warden, the anomaly-scoring and
//! alert-delivery core of a media-server account monitor.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::WardenStore`]; geo lookups are
//! supplied through [`geo::GeoLocator`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod channel;
pub mod error;
pub mod geo;
pub mod household;
pub mod store;
pub mod trust;
pub mod violation;

pub use error::{Error, Result};
