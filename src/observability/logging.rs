//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Resolve the log level from `RUST_LOG`, falling back to the configured level
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the CLI flag and config file so operators can raise
//!   verbosity for a single module without editing configuration
//! - Output goes to stderr; stdout stays free for tooling

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default directive when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_LEVEL: &str = "info";

/// Build the filter for `level`, letting `RUST_LOG` override it.
pub fn filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.unwrap_or(DEFAULT_LEVEL);
        EnvFilter::try_new(format!("{level},hyper=warn,hyper_util=warn"))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    })
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
