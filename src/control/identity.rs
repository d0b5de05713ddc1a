//! `control.identity`: forwards every request unchanged.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ConfigError, WiringError};
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx};

pub const NAME: &str = "control.identity";

pub struct Identity {
    ctx: Arc<ModuleContext>,
    ports: Ports,
}

impl Identity {
    pub fn new(ctx: Arc<ModuleContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            ports: Ports::new(),
        })
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    _config: &Value,
    _builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    Ok(Identity::new(ctx))
}

impl Module for Identity {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.ctx.name())?;
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            while let Some(req) = input.recv().await {
                ctx.handled_request();
                if output.send(req).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.ports.take_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stream;
    use crate::request::{Method, Request};

    #[tokio::test]
    async fn forwards_and_closes() {
        let module = Identity::new(Arc::new(ModuleContext::new("id", NAME)));
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(Request::new(Method::Get, "/a")).await.unwrap();
        tx.send(Request::new(Method::Get, "/b")).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/a");
        assert_eq!(out.recv().await.unwrap().path, "/b");
        assert!(out.recv().await.is_none());
        assert_eq!(module.context().requests(), 2);
    }

    #[tokio::test]
    async fn second_set_input_is_rejected() {
        let module = Identity::new(Arc::new(ModuleContext::new("id", NAME)));
        module.set_input(stream().1).unwrap();
        assert_eq!(
            module.set_input(stream().1).unwrap_err(),
            WiringError::InputAlreadySet("id".into())
        );
    }
}
