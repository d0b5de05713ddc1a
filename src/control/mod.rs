//! Control modules: composition and flow shaping.
//!
//! # Modules
//! - `control.seq`: chain children in order
//! - `control.fanout`: copy to every child, merge their outputs
//! - `control.split_by`: one sub-pipeline per value of a key expression
//! - `control.decouple`: bounded buffer that drops on overflow
//! - `control.rate_limit`: pace emissions to a target rate
//! - `control.filter`: keep requests matching a bool expression
//! - `control.identity`: pass-through
//!
//! # Design Decisions
//! - Composition modules build their children through the [`Builder`] they
//!   are given, so nesting depth is tracked across the whole tree
//! - Per-request failures are logged and the request dropped; the module's
//!   task keeps running
//!
//! [`Builder`]: crate::pipeline::Builder

pub mod decouple;
pub mod fanout;
pub mod filter;
pub mod identity;
pub mod rate_limit;
pub mod seq;
pub mod split_by;

use crate::pipeline::Registry;

/// Register every control module type.
pub fn register(registry: &mut Registry) {
    registry.register(seq::NAME, seq::create);
    registry.register(fanout::NAME, fanout::create);
    registry.register(split_by::NAME, split_by::create);
    registry.register(decouple::NAME, decouple::create);
    registry.register(rate_limit::NAME, rate_limit::create);
    registry.register(filter::NAME, filter::create);
    registry.register(identity::NAME, identity::create);
}
