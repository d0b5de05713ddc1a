//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON/TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MirrorConfig (validated, immutable)
//!     → build_pipeline: registry builds the module tree
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the pipeline is built once
//! - Module descriptors stay untyped JSON until their constructor parses them
//! - Validation separates syntactic (serde) from semantic checks

pub mod duration;
pub mod loader;
pub mod module;
pub mod schema;
pub mod validation;

pub use loader::load_config;
pub use schema::MirrorConfig;

use std::sync::Arc;

use serde_json::Value;

use crate::control::seq;
use crate::error::ConfigError;
use crate::pipeline::{Builder, Module, ModuleContext};

/// Name of the root module.
pub const PIPELINE_NAME: &str = "Pipeline";

/// Type shown for the root module in the topology.
pub const PIPELINE_TYPE: &str = "virtual.pipeline";

/// Build the root pipeline: a sequence of the configured top-level modules.
pub fn build_pipeline(config: &MirrorConfig, builder: &Builder) -> Result<Arc<dyn Module>, ConfigError> {
    builder.create(
        seq::NAME,
        ModuleContext::new(PIPELINE_NAME, PIPELINE_TYPE),
        &Value::Array(config.pipeline.clone()),
    )
}
