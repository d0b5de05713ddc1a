//! Error types shared by the pipeline subsystems.
//!
//! Construction problems are `ConfigError`s and propagate synchronously to
//! whoever asked the registry for a module. Wiring problems are programming
//! errors in how modules are connected. Per-request failures never use these
//! types as return values: they are logged where they happen and the request
//! is dropped.

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::expr::ExprError;

/// Errors raised while building a module tree from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("module {0:?} does not exist")]
    ModuleNotFound(String),

    #[error("error creating module {module_type:?}: {source}")]
    Create {
        module_type: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("missing required field {0:?}")]
    MissingField(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("module nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation failed: {}", crate::config::validation::join(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("wiring failed: {0}")]
    Wiring(#[from] WiringError),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors raised when connecting module streams.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WiringError {
    #[error("input of module {0:?} is already set")]
    InputAlreadySet(String),

    #[error("module {0:?} does not accept input")]
    NotAcceptingInput(String),

    #[error("output of module {0:?} was already taken")]
    OutputTaken(String),
}
