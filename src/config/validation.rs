//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every module type, nested ones included, is registered
//! - Validate addresses and the log level
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Descriptors are checked without being built. Building a module can
//!   open files or bind listeners, and a template may never be instantiated.
//! - Any object with a `type` member inside a module configuration is taken
//!   to be a nested descriptor

use std::net::SocketAddr;

use serde_json::Value;
use thiserror::Error;

use crate::config::module::ModuleDescriptor;
use crate::config::schema::MirrorConfig;
use crate::error::ConfigError;
use crate::pipeline::Registry;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listen_addr {0:?} is not a socket address")]
    ListenAddr(String),

    #[error("unknown log level {0:?}")]
    LogLevel(String),

    #[error("pipeline is empty")]
    EmptyPipeline,

    #[error("pipeline[{index}]: {message}")]
    Descriptor { index: usize, message: String },

    #[error("pipeline[{index}]: module {module_type:?} does not exist")]
    UnknownModule { index: usize, module_type: String },
}

/// Join errors for display on one line.
pub fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn validate_config(config: &MirrorConfig, registry: &Registry) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(addr) = &config.listen_addr {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::ListenAddr(addr.clone()));
        }
    }

    if let Some(level) = &config.log_level {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            errors.push(ValidationError::LogLevel(level.clone()));
        }
    }

    if config.pipeline.is_empty() {
        errors.push(ValidationError::EmptyPipeline);
    }

    for (index, value) in config.pipeline.iter().enumerate() {
        match check_descriptor(value, registry) {
            Ok(()) => {}
            Err(ConfigError::ModuleNotFound(module_type)) => {
                errors.push(ValidationError::UnknownModule { index, module_type });
            }
            Err(e) => errors.push(ValidationError::Descriptor {
                index,
                message: e.to_string(),
            }),
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Check a descriptor and every descriptor nested in its configuration
/// without constructing any module.
pub fn check_descriptor(value: &Value, registry: &Registry) -> Result<(), ConfigError> {
    let descriptor = ModuleDescriptor::from_value(value)?;
    if !registry.contains(&descriptor.module_type) {
        return Err(ConfigError::ModuleNotFound(descriptor.module_type));
    }
    check_nested(&descriptor.config, registry)
}

fn check_nested(config: &Value, registry: &Registry) -> Result<(), ConfigError> {
    match config {
        Value::Array(items) => items.iter().try_for_each(|item| check_nested(item, registry)),
        Value::Object(fields) if fields.contains_key("type") => check_descriptor(config, registry),
        Value::Object(fields) => fields.values().try_for_each(|field| check_nested(field, registry)),
        _ => Ok(()),
    }
}
