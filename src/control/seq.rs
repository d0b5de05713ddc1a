//! `control.seq`: chains modules so each one's output feeds the next.
//!
//! Children are wired to each other at construction. The sequence's input is
//! the first child's input and its output is the last child's output.
//!
//! An empty sequence drains its input and never produces output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::error::{ConfigError, WiringError};
use crate::pipeline::{Builder, Module, ModuleContext, RequestRx, RequestTx, Slot, connect, stream};

pub const NAME: &str = "control.seq";

pub struct Seq {
    ctx: Arc<ModuleContext>,
    modules: Vec<Arc<dyn Module>>,
    input_set: AtomicBool,
    output: Slot<RequestRx>,
    /// Keeps the output of an empty sequence open.
    _idle: Option<RequestTx>,
}

impl Seq {
    /// Chain already constructed modules.
    pub fn new(ctx: Arc<ModuleContext>, modules: Vec<Arc<dyn Module>>) -> Result<Arc<Self>, ConfigError> {
        for pair in modules.windows(2) {
            connect(pair[0].as_ref(), pair[1].as_ref())?;
        }

        let (output, idle) = match modules.last() {
            Some(last) => {
                let rx = last
                    .take_output()
                    .ok_or_else(|| WiringError::OutputTaken(last.context().name().to_string()))?;
                (rx, None)
            }
            None => {
                let (tx, rx) = stream();
                (rx, Some(tx))
            }
        };

        Ok(Arc::new(Self {
            ctx,
            modules,
            input_set: AtomicBool::new(false),
            output: Slot::new(output),
            _idle: idle,
        }))
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let modules = builder.build_all(config)?;
    Ok(Seq::new(ctx, modules)?)
}

impl Module for Seq {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        if self.input_set.swap(true, Ordering::SeqCst) {
            return Err(WiringError::InputAlreadySet(self.ctx.name().to_string()));
        }
        match self.modules.first() {
            Some(first) => first.set_input(input),
            None => {
                tracing::warn!(module = %self.ctx.name(), "Empty sequence discards its input");
                tokio::spawn(async move { while input.recv().await.is_some() {} });
                Ok(())
            }
        }
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.output.take()
    }

    fn children(&self) -> Vec<Vec<Arc<dyn Module>>> {
        if self.modules.is_empty() {
            Vec::new()
        } else {
            vec![self.modules.clone()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::registry::Registry;
    use crate::request::{Method, Request};
    use serde_json::json;
    use std::time::Duration;

    fn build(config: Value) -> Arc<dyn Module> {
        Builder::new(Arc::new(Registry::with_builtins()))
            .build(&json!({"type": NAME, "name": "seq", "config": config}))
            .unwrap()
    }

    #[tokio::test]
    async fn chains_children_in_order() {
        let module = build(json!([
            {"type": "control.identity", "name": "first"},
            {"type": "control.filter", "name": "second", "expr": "{req.path != \"/skip\"}"},
            {"type": "control.identity", "name": "third"}
        ]));
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        for path in ["/1", "/skip", "/2"] {
            tx.send(Request::new(Method::Get, path)).await.unwrap();
        }
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/1");
        assert_eq!(out.recv().await.unwrap().path, "/2");
        assert!(out.recv().await.is_none());

        let children = module.children();
        assert_eq!(children.len(), 1);
        let names: Vec<_> = children[0].iter().map(|m| m.context().name().to_string()).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(children[0][0].context().requests(), 3);
        assert_eq!(children[0][2].context().requests(), 2);
    }

    #[tokio::test]
    async fn empty_sequence_accepts_input_but_never_outputs() {
        let module = build(json!([]));
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(Request::default()).await.unwrap();
        drop(tx);

        let next = tokio::time::timeout(Duration::from_millis(50), out.recv()).await;
        assert!(next.is_err(), "empty sequence must not produce or close");
        assert!(module.children().is_empty());
    }

    #[tokio::test]
    async fn child_construction_errors_propagate() {
        let err = Builder::new(Arc::new(Registry::with_builtins()))
            .build(&json!({"type": NAME, "config": [{"type": "control.nope"}]}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("module \"control.nope\" does not exist"));
    }
}
