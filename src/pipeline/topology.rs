//! Read-only view of a module tree for diagnostics.

use std::sync::Arc;

use serde::Serialize;

use super::{Module, ModuleContext, RequestRx};
use crate::error::WiringError;

/// One module in the rendered topology.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyNode {
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: String,
    pub role: String,
    pub rps: u64,
    /// Branches of children, each an ordered chain.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Vec<TopologyNode>>,
}

impl TopologyNode {
    pub fn from_module(module: &dyn Module) -> Self {
        let ctx = module.context();
        Self {
            name: ctx.name().to_string(),
            module_type: ctx.module_type().to_string(),
            role: ctx.role().to_string(),
            rps: ctx.rps(),
            children: module
                .children()
                .iter()
                .map(|branch| branch.iter().map(|m| Self::from_module(m.as_ref())).collect())
                .collect(),
        }
    }
}

/// Label node with no processing, used to annotate topology branches.
pub struct Virtual {
    ctx: Arc<ModuleContext>,
}

impl Virtual {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ModuleContext::new(name, module_type)),
        })
    }
}

impl Module for Virtual {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, _input: RequestRx) -> Result<(), WiringError> {
        Err(WiringError::NotAcceptingInput(self.ctx.name().to_string()))
    }

    fn take_output(&self) -> Option<RequestRx> {
        None
    }
}
