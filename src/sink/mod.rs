//! Sink modules: terminal stages that deliver requests out of the pipeline.
//!
//! # Data Flow
//! ```text
//! input ──► sink.http ──► target server (responses discarded)
//! input ──► sink.file ──► JSON lines file
//! ```
//!
//! # Design Decisions
//! - Delivery outcomes are reported through logs and metrics only, never back
//!   into the stream
//! - A sink's output carries no requests; it closes once all delivery work
//!   has finished, so a caller draining it knows the sink is done

pub mod file;
pub mod http;
pub mod pool;

pub use pool::WorkerPool;

use crate::pipeline::Registry;

/// Register every sink module type.
pub fn register(registry: &mut Registry) {
    registry.register(http::NAME, http::create);
    registry.register(file::NAME, file::create);
}
