//! # Schema-Bus Test Suite
//!
//! Cross-crate flows that exercise the broker end to end over the
//! in-memory registry and transport.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── codec_benchmarks.rs   # Avro codec, prefix fallback, backoff
//! └── src/
//!     ├── fixtures.rs           # Schemas, Order payload, broker harness
//!     └── integration/
//!         ├── pub_sub.rs            # publish → listen round trips
//!         ├── schema_negotiation.rs # adopt / register decisions
//!         ├── retry.rs              # retry budget, ack vs nack
//!         ├── lifecycle.rs          # stop, cancel, disabled, consume-only
//!         └── observability.rs      # Prometheus observer under traffic
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sb-tests
//! cargo test -p sb-tests integration::retry::
//! cargo bench -p sb-tests
//! ```

pub mod fixtures;
pub mod integration;
