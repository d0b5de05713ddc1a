//! `control.filter`: keeps the requests for which `expr` is true.
//!
//! Requests whose expression fails to evaluate are logged and dropped.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::expr::BoolExpr;
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx};

pub const NAME: &str = "control.filter";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub expr: BoolExpr,
}

pub struct Filter {
    ctx: Arc<ModuleContext>,
    expr: Arc<BoolExpr>,
    ports: Ports,
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    _builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let config: FilterConfig = parse_config(config)?;
    Ok(Arc::new(Filter {
        ctx,
        expr: Arc::new(config.expr),
        ports: Ports::new(),
    }))
}

impl Module for Filter {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.ctx.name())?;
        let ctx = self.ctx.clone();
        let expr = self.expr.clone();
        tokio::spawn(async move {
            while let Some(req) = input.recv().await {
                ctx.handled_request();
                match expr.eval(&req) {
                    Ok(true) => {
                        if output.send(req).await.is_err() {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(module = %ctx.name(), error = %e, "Filter expression failed, dropping request");
                    }
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
    use crate::pipeline::registry::Registry;
    use crate::pipeline::stream;
    use crate::request::{Method, Request};
    use serde_json::json;

    fn build(config: Value) -> Result<Arc<dyn Module>, ConfigError> {
        Builder::new(Arc::new(Registry::with_builtins())).build(&json!({
            "type": NAME,
            "config": config,
        }))
    }

    #[tokio::test]
    async fn keeps_matching_requests() {
        let module = build(json!({"expr": "{req.method == POST}"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(Request::new(Method::Get, "/read")).await.unwrap();
        tx.send(Request::new(Method::Post, "/write")).await.unwrap();
        tx.send(Request::new(Method::Post, "/update")).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/write");
        assert_eq!(out.recv().await.unwrap().path, "/update");
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn unset_flag_reads_as_false() {
        let module = build(json!({"expr": "{req.meta.sampled.bool}"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(Request::new(Method::Get, "/missing")).await.unwrap();
        tx.send(Request::new(Method::Get, "/kept").with_meta("sampled", true))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/kept");
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn evaluation_errors_drop_the_request() {
        let module = build(json!({"expr": "{req.meta.n.int * 4611686018427387904 >= 0}"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        // overflows
        tx.send(Request::new(Method::Get, "/dropped").with_meta("n", 4_i64))
            .await
            .unwrap();
        tx.send(Request::new(Method::Get, "/kept").with_meta("n", 1_i64))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/kept");
        assert!(out.recv().await.is_none());
    }

    #[test]
    fn non_bool_expression_is_a_config_error() {
        assert!(build(json!({"expr": "{req.path}"})).is_err());
        assert!(build(json!({})).is_err());
    }
}
