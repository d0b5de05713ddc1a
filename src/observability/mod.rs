//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All modules produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stderr (fmt subscriber, filtered by level / RUST_LOG)
//!     → /metrics on the diagnostics server (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every event carries the emitting module's name as a `module` field or label
//! - Metric updates are no-ops until the binary installs a recorder, so
//!   library users and tests pay nothing

pub mod logging;
pub mod metrics;
