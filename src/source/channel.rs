//! Programmatic source fed through an mpsc sender.
//!
//! Used to embed the pipeline in another program, and by tests. Dropping
//! every sender closes the source output.

use std::sync::Arc;

use crate::error::WiringError;
use crate::pipeline::{Module, ModuleContext, Ports, RequestRx, RequestTx, stream};

pub const NAME: &str = "source.channel";

pub struct ChannelSource {
    ctx: Arc<ModuleContext>,
    ports: Ports,
}

impl ChannelSource {
    /// Create the source and the sender that feeds it.
    pub fn new(ctx: Arc<ModuleContext>) -> Result<(Arc<Self>, RequestTx), WiringError> {
        let ports = Ports::new();
        let output = ports.claim(ctx.name())?;
        let (feed, mut input) = stream();

        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            while let Some(req) = input.recv().await {
                task_ctx.handled_request();
                if output.send(req).await.is_err() {
                    break;
                }
            }
        });

        Ok((Arc::new(Self { ctx, ports }), feed))
    }
}

impl Module for ChannelSource {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, _input: RequestRx) -> Result<(), WiringError> {
        Err(WiringError::NotAcceptingInput(self.ctx.name().to_string()))
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.ports.take_output()
    }
}
