//! `control.split_by`: one sub-pipeline per distinct key value.
//!
//! # Responsibilities
//! - Evaluate `expr` against each request to get its key
//! - Create a sub-pipeline from the `pipeline` template on first sight of a key
//! - Merge every sub-pipeline's output into the module output
//! - Destroy sub-pipelines that have been idle longer than `idle_timeout`
//!
//! # Design Decisions
//! - The key expression is evaluated outside the lock. Lookup, creation and
//!   the activity update happen under the same mutex the reaper takes, so a
//!   key cannot be reaped between being selected and being touched.
//! - The send into the sub-pipeline happens after the lock is released, using
//!   a cloned sender. A concurrently reaped entry still receives that request
//!   before its input closes.
//! - A single reaper task per instance runs on a fixed interval, whatever the
//!   number of keys.
//! - The template is built once at construction with a validating builder, so
//!   configuration errors surface before any traffic flows while nothing in it
//!   opens files or binds listeners until its key shows up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::expr::{AnyExpr, Value as Key};
use crate::observability::metrics;
use crate::pipeline::{Builder, Module, ModuleContext, RequestRx, RequestTx, Slot, Virtual, stream};

pub const NAME: &str = "control.split_by";

const VIRTUAL_TYPE: &str = "virtual.split_by";

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitByConfig {
    /// Key expression.
    pub expr: AnyExpr,

    /// Descriptor of the sub-pipeline created for every key.
    pub pipeline: Value,

    #[serde(default = "default_idle_timeout", with = "crate::config::duration")]
    pub idle_timeout: Duration,

    #[serde(default = "default_reap_interval", with = "crate::config::duration")]
    pub reap_interval: Duration,
}

struct SubPipeline {
    input: RequestTx,
    module: Arc<dyn Module>,
    last_activity: Instant,
}

struct Inner {
    ctx: Arc<ModuleContext>,
    expr: AnyExpr,
    template: Value,
    builder: Builder,
    idle_timeout: Duration,
    reap_interval: Duration,
    entries: Mutex<HashMap<Key, SubPipeline>>,
}

pub struct SplitBy {
    inner: Arc<Inner>,
    input_set: AtomicBool,
    output_tx: Slot<RequestTx>,
    output: Slot<RequestRx>,
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let config: SplitByConfig = parse_config(config)?;
    if config.pipeline.is_null() {
        return Err(ConfigError::MissingField("pipeline"));
    }
    if config.reap_interval.is_zero() {
        return Err(ConfigError::invalid("reap_interval must be greater than zero"));
    }

    // configuration errors surface now; the instance is discarded
    builder.validating().build(&config.pipeline)?;

    let (tx, rx) = stream();
    Ok(Arc::new(SplitBy {
        inner: Arc::new(Inner {
            ctx,
            expr: config.expr,
            template: config.pipeline,
            builder: builder.clone(),
            idle_timeout: config.idle_timeout,
            reap_interval: config.reap_interval,
            entries: Mutex::new(HashMap::new()),
        }),
        input_set: AtomicBool::new(false),
        output_tx: Slot::new(tx),
        output: Slot::new(rx),
    }))
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<Key, SubPipeline>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Input of the sub-pipeline for `key`, creating it if needed.
    fn select(&self, key: Key, output: &RequestTx) -> Result<RequestTx, ConfigError> {
        let mut entries = self.entries();
        let now = Instant::now();

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_activity = now;
            return Ok(entry.input.clone());
        }

        tracing::debug!(module = %self.ctx.name(), key = %key, "Creating pipeline");
        let module = self.builder.build(&self.template)?;
        let (input, rx) = stream();
        module.set_input(rx)?;
        let mut sub_output = module
            .take_output()
            .ok_or_else(|| WiringError::OutputTaken(module.context().name().to_string()))?;

        let output = output.clone();
        tokio::spawn(async move {
            while let Some(req) = sub_output.recv().await {
                if output.send(req).await.is_err() {
                    break;
                }
            }
        });

        entries.insert(
            key,
            SubPipeline {
                input: input.clone(),
                module,
                last_activity: now,
            },
        );
        metrics::set_split_pipelines(self.ctx.name(), entries.len());
        Ok(input)
    }

    /// Drop every sub-pipeline idle for longer than the idle timeout.
    fn reap_idle(&self) {
        let mut entries = self.entries();
        let now = Instant::now();
        entries.retain(|key, entry| {
            let idle = now.duration_since(entry.last_activity);
            if idle > self.idle_timeout {
                tracing::debug!(module = %self.ctx.name(), key = %key, "Destroying inactive pipeline");
                false
            } else {
                true
            }
        });
        metrics::set_split_pipelines(self.ctx.name(), entries.len());
    }

    async fn reap_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.reap_interval, self.reap_interval);
        loop {
            ticker.tick().await;
            self.reap_idle();
        }
    }
}

impl Module for SplitBy {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.inner.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let name = self.inner.ctx.name();
        if self.input_set.swap(true, Ordering::SeqCst) {
            return Err(WiringError::InputAlreadySet(name.to_string()));
        }
        let output = self
            .output_tx
            .take()
            .ok_or_else(|| WiringError::InputAlreadySet(name.to_string()))?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let reaper = tokio::spawn(inner.clone().reap_loop());

            while let Some(req) = input.recv().await {
                inner.ctx.handled_request();

                let key = match inner.expr.eval(&req) {
                    Ok(key) => key,
                    Err(e) => {
                        tracing::error!(module = %inner.ctx.name(), error = %e, "Cannot evaluate split key, dropping request");
                        continue;
                    }
                };
                let feed = match inner.select(key, &output) {
                    Ok(feed) => feed,
                    Err(e) => {
                        tracing::error!(module = %inner.ctx.name(), error = %e, "Cannot create pipeline, dropping request");
                        continue;
                    }
                };
                if feed.send(req).await.is_err() {
                    tracing::warn!(module = %inner.ctx.name(), "Pipeline input closed, dropping request");
                }
            }

            reaper.abort();
            // closing every sub-pipeline input lets the forwarders drain and
            // release their output senders
            inner.entries().clear();
            metrics::set_split_pipelines(inner.ctx.name(), 0);
        });

        Ok(())
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.output.take()
    }

    fn children(&self) -> Vec<Vec<Arc<dyn Module>>> {
        let entries = self.inner.entries();
        let mut branches: Vec<(String, Arc<dyn Module>)> = entries
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.module.clone()))
            .collect();
        drop(entries);

        if branches.is_empty() {
            let label: Arc<dyn Module> = Virtual::new("Awaiting data", VIRTUAL_TYPE);
            return vec![vec![label]];
        }

        branches.sort_by(|a, b| a.0.cmp(&b.0));
        branches
            .into_iter()
            .map(|(key, module)| {
                let label: Arc<dyn Module> = Virtual::new(key, VIRTUAL_TYPE);
                vec![label, module]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::registry::Registry;
    use crate::request::{Method, Request};
    use serde_json::json;

    fn build(extra: Value) -> Result<Arc<dyn Module>, ConfigError> {
        let mut config = json!({
            "expr": "{req.header(\"Host\")}",
            "pipeline": {"type": "control.identity"},
        });
        if let (Some(config), Value::Object(extra)) = (config.as_object_mut(), extra) {
            config.extend(extra);
        }
        Builder::new(Arc::new(Registry::with_builtins()))
            .build(&json!({"type": NAME, "name": "split", "config": config}))
    }

    fn host(host: &str, path: &str) -> Request {
        Request::new(Method::Get, path).with_header("Host", host)
    }

    /// Names of the sub-pipeline modules, by key.
    fn instances(module: &dyn Module) -> Vec<(String, String)> {
        module
            .children()
            .into_iter()
            .filter(|branch| branch.len() == 2)
            .map(|branch| {
                (
                    branch[0].context().name().to_string(),
                    branch[1].context().name().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn same_key_same_instance() {
        let module = build(json!({})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(host("a.example", "/1")).await.unwrap();
        tx.send(host("a.example", "/2")).await.unwrap();
        assert_eq!(out.recv().await.unwrap().path, "/1");
        assert_eq!(out.recv().await.unwrap().path, "/2");
        assert_eq!(instances(module.as_ref()).len(), 1);

        tx.send(host("b.example", "/3")).await.unwrap();
        assert_eq!(out.recv().await.unwrap().path, "/3");

        let instances = instances(module.as_ref());
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].0, "a.example");
        assert_eq!(instances[1].0, "b.example");
        assert_ne!(instances[0].1, instances[1].1);
    }

    #[tokio::test]
    async fn output_closes_after_input() {
        let module = build(json!({})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(host("a.example", "/1")).await.unwrap();
        tx.send(host("b.example", "/2")).await.unwrap();
        drop(tx);

        let mut paths = Vec::new();
        while let Some(req) = out.recv().await {
            paths.push(req.path);
        }
        paths.sort();
        assert_eq!(paths, ["/1", "/2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pipelines_are_reaped_and_recreated() {
        let module = build(json!({"idle_timeout": "1s", "reap_interval": "1s"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(host("a.example", "/1")).await.unwrap();
        out.recv().await.unwrap();
        let first = instances(module.as_ref());
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let children = module.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0][0].context().name(), "Awaiting data");

        tx.send(host("a.example", "/2")).await.unwrap();
        out.recv().await.unwrap();
        let second = instances(module.as_ref());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, "a.example");
        assert_ne!(second[0].1, first[0].1, "a fresh instance is built");
    }

    #[tokio::test(start_paused = true)]
    async fn active_pipelines_survive_the_reaper() {
        let module = build(json!({"idle_timeout": "2s", "reap_interval": "1s"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(host("a.example", "/0")).await.unwrap();
        out.recv().await.unwrap();
        let first = instances(module.as_ref());
        for i in 1..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(host("a.example", &format!("/{i}"))).await.unwrap();
            out.recv().await.unwrap();
        }
        assert_eq!(instances(module.as_ref()), first);
    }

    #[tokio::test]
    async fn evaluation_errors_drop_the_request() {
        let module = build(json!({"expr": "{req.meta.tenant}"})).unwrap();
        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();

        tx.send(Request::new(Method::Get, "/untagged")).await.unwrap();
        tx.send(Request::new(Method::Get, "/tagged").with_meta("tenant", "acme"))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().path, "/tagged");
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn bad_template_fails_at_construction() {
        let err = build(json!({"pipeline": {"type": "sink.nowhere"}})).err().unwrap();
        assert!(err.to_string().contains("sink.nowhere"));
        assert!(build(json!({"pipeline": null})).is_err());
        // module settings are checked too, not just the type
        let err = build(json!({"pipeline": {"type": "sink.file", "config": {"buffer_size": 0}}}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("sink.file"));
    }

    #[tokio::test]
    async fn template_is_built_on_first_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.jsonl");
        let module = build(json!({
            "pipeline": {"type": "sink.file", "config": {"path": path.to_str().unwrap()}}
        }))
        .unwrap();
        assert!(!path.exists(), "nothing is opened before data arrives");

        let (tx, rx) = stream();
        module.set_input(rx).unwrap();
        let mut out = module.take_output().unwrap();
        tx.send(host("a.example", "/1")).await.unwrap();
        drop(tx);
        assert!(out.recv().await.is_none());

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test]
    async fn awaiting_data_before_first_request() {
        let module = build(json!({})).unwrap();
        let children = module.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0][0].context().module_type(), VIRTUAL_TYPE);
    }
}
