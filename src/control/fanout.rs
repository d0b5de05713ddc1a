//! `control.fanout`: copies every request to each child and merges their
//! outputs.
//!
//! # Data Flow
//! ```text
//!            ┌─► child 0 ─┐
//! input ─────┼─► child 1 ─┼───► output
//!            └─► child N ─┘
//! ```
//!
//! # Design Decisions
//! - One dispatcher task writes each request to every branch in arrival
//!   order, so order is preserved within a branch. There is no ordering across
//!   branches in the merged output.
//! - One consumer task per branch forwards to the shared output. A shared
//!   counter of finished branches decides when the output closes: the
//!   consumer that brings it to N drops the only strong sender.
//! - With no children the output closes immediately and the input is drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;

use crate::error::{ConfigError, WiringError};
use crate::pipeline::{Builder, Module, ModuleContext, RequestRx, RequestTx, Slot, stream};

pub const NAME: &str = "control.fanout";

pub struct Fanout {
    ctx: Arc<ModuleContext>,
    modules: Vec<Arc<dyn Module>>,
    input_set: AtomicBool,
    /// Sender for the merged output, released once the consumers start.
    output_tx: Slot<RequestTx>,
    output: Slot<RequestRx>,
}

impl Fanout {
    pub fn new(ctx: Arc<ModuleContext>, modules: Vec<Arc<dyn Module>>) -> Arc<Self> {
        let (tx, rx) = stream();
        Arc::new(Self {
            ctx,
            modules,
            input_set: AtomicBool::new(false),
            output_tx: Slot::new(tx),
            output: Slot::new(rx),
        })
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let modules = builder.build_all(config)?;
    Ok(Fanout::new(ctx, modules))
}

impl Module for Fanout {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        if self.input_set.swap(true, Ordering::SeqCst) {
            return Err(WiringError::InputAlreadySet(self.ctx.name().to_string()));
        }
        let output = self
            .output_tx
            .take()
            .ok_or_else(|| WiringError::InputAlreadySet(self.ctx.name().to_string()))?;

        if self.modules.is_empty() {
            drop(output);
            tokio::spawn(async move { while input.recv().await.is_some() {} });
            return Ok(());
        }

        // Wire every branch before starting anything.
        let mut feeds = Vec::with_capacity(self.modules.len());
        let mut branch_outputs = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let (tx, rx) = stream();
            module.set_input(rx)?;
            let out = module
                .take_output()
                .ok_or_else(|| WiringError::OutputTaken(module.context().name().to_string()))?;
            feeds.push(tx);
            branch_outputs.push(out);
        }

        // Consumers only hold weak senders; the output closes when the last
        // branch to finish drops the master sender.
        let branches = branch_outputs.len();
        let closed = Arc::new(AtomicUsize::new(0));
        let weak = output.downgrade();
        let master = Arc::new(Slot::new(output));
        for mut branch in branch_outputs {
            let weak = weak.clone();
            let master = master.clone();
            let closed = closed.clone();
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                while let Some(req) = branch.recv().await {
                    let Some(output) = weak.upgrade() else { break };
                    if output.send(req).await.is_err() {
                        break;
                    }
                }
                if closed.fetch_add(1, Ordering::AcqRel) + 1 == branches {
                    drop(master.take());
                    tracing::debug!(module = %ctx.name(), "All fan-out branches closed");
                }
            });
        }

        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            while let Some(req) = input.recv().await {
                ctx.handled_request();
                let (last, rest) = match feeds.split_last() {
                    Some(split) => split,
                    None => break,
                };
                for feed in rest {
                    // a closed branch does not stop the others
                    let _ = feed.send(req.clone()).await;
                }
                let _ = last.send(req).await;
            }
            // dropping the feeds closes every branch input
        });

        Ok(())
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.output.take()
    }

    fn children(&self) -> Vec<Vec<Arc<dyn Module>>> {
        self.modules.iter().map(|m| vec![m.clone()]).collect()
    }
}
