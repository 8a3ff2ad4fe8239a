//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! handler / exchange / pool produce:
//!     → tracing events and spans (request_id, connection_id, destination)
//!     → metrics.rs (counters, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs installs a tracing-subscriber for binaries and tests
//!     → any `metrics` recorder installed by the embedding application
//! ```
//!
//! # Design Decisions
//! - The library never installs a global subscriber or recorder on its own
//! - Request ID flows through every event of one `handle` call
//! - Metrics are cheap (no-ops without a recorder)

pub mod logging;
pub mod metrics;
