//! # Algorithms
//!
//! Schema negotiation and the backoff schedule.

pub mod backoff;
pub mod schema_resolution;

pub use backoff::{backoff_delay, ExponentialBackoff};
pub use schema_resolution::SchemaResolver;
