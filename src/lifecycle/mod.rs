//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (binary):
//!     Load config → Validate → Build pipeline → Start diagnostics → Drain output
//!
//! Shutdown (shutdown.rs):
//!     Pipeline output closed or signal received → Stop diagnostics → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Pipeline termination is driven by its sources closing; signals only stop
//!   the process around it
//! - Unrecoverable initialisation failures inside a running module exit the
//!   process through [`fatal`]

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;

use std::fmt::Display;

/// Log `message` at error level and terminate the process with status 1.
pub fn fatal(message: impl Display) -> ! {
    tracing::error!("{message}");
    std::process::exit(1)
}
