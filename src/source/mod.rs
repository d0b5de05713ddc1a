//! Source modules: roots of the pipeline.
//!
//! Sources start producing as soon as they are constructed and never accept
//! input; `set_input` fails with `WiringError::NotAcceptingInput`.

pub mod channel;
pub mod http;

pub use channel::ChannelSource;

use crate::pipeline::Registry;

/// Register every source type that can be built from configuration.
pub fn register(registry: &mut Registry) {
    registry.register(http::NAME, http::create);
}
