//! Configuration schema definitions.
//!
//! The document has three members. `pipeline` is a list of module
//! descriptors, kept as raw JSON values because each module type defines its
//! own schema; they are interpreted by the registry at build time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration of the mirror.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Address of the diagnostics server (`/health`, `/metrics`, `/api/graph`).
    /// Not started when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,

    /// Log level used when neither the CLI flag nor `RUST_LOG` sets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Top-level modules, chained in order.
    pub pipeline: Vec<Value>,
}
