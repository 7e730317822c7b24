//! Alert delivery for Warden.
//!
//! [`Notifier`] shapes a recorded violation into each channel's wire format
//! and delivers to every channel concurrently, collecting per-channel
//! failures instead of stopping at the first one. [`AlertPipeline`] ties the
//! dedup check, the atomic record, and the fan-out together.

mod format;

pub mod error;
pub mod notifier;
pub mod pipeline;

pub use error::{ChannelError, ChannelFailure, DispatchError};
pub use notifier::Notifier;
pub use pipeline::{AlertPipeline, Outcome};
