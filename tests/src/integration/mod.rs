//! Cross-crate flows over the in-memory registry and transport.

pub mod lifecycle;
pub mod observability;
pub mod pub_sub;
pub mod retry;
pub mod schema_negotiation;
