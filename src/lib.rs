//! HTTP traffic mirroring through a configurable module pipeline.
//!
//! Requests captured by a source flow through a tree of modules built from
//! configuration and are delivered to one or more sinks:
//!
//! ```text
//! source ──► control modules (seq / fanout / split_by / decouple / rate_limit / filter) ──► sinks
//! ```
//!
//! Module behaviour can depend on the request through embedded expressions
//! (see [`expr`]).

// Core
pub mod error;
pub mod expr;
pub mod pipeline;
pub mod request;

// Modules
pub mod control;
pub mod sink;
pub mod source;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::MirrorConfig;
pub use error::{ConfigError, WiringError};
pub use lifecycle::Shutdown;
pub use pipeline::{Builder, Module, ModuleContext, Registry};
pub use request::Request;
