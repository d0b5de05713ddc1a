//! `sink.file`: appends every request to a file, one JSON document per line.
//!
//! A static `path` is opened at construction so a bad path is a configuration
//! error, unless the sink is only being validated. A request-dependent path is evaluated against the first request;
//! failing to open it exits the process. The buffer is flushed when the input
//! closes, after which the output closes.
//!
//! `file_written_bytes_total` counts bytes that have left the write buffer,
//! not bytes accepted into it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::expr::StringExpr;
use crate::lifecycle;
use crate::observability::metrics;
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx, Slot};
use crate::request::Request;

pub const NAME: &str = "sink.file";

pub const DEFAULT_BUFFER_SIZE: usize = 1024;

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSinkConfig {
    pub path: Option<StringExpr>,

    #[serde(default)]
    pub format: Format,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Bytes accepted into a buffered writer versus bytes that reached the file.
#[derive(Debug, Default)]
struct Flushed {
    accepted: usize,
    reported: usize,
}

impl Flushed {
    /// Account for `n` more accepted bytes while the writer holds `buffered`
    /// bytes, returning how many reached the file since the last call.
    fn advance(&mut self, n: usize, buffered: usize) -> usize {
        self.accepted += n;
        let written = self.accepted.saturating_sub(buffered);
        let delta = written.saturating_sub(self.reported);
        self.reported = self.reported.max(written);
        delta
    }
}

fn open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    options
}

pub struct FileSink {
    ctx: Arc<ModuleContext>,
    path: Arc<StringExpr>,
    buffer_size: usize,
    /// Opened at construction when the path is static.
    file: Slot<File>,
    ports: Ports,
}

impl FileSink {
    pub fn new(ctx: Arc<ModuleContext>, config: FileSinkConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_open(ctx, config, true)
    }

    /// Like [`FileSink::new`], but a static path is left to be opened with
    /// the first request.
    pub fn unopened(ctx: Arc<ModuleContext>, config: FileSinkConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_open(ctx, config, false)
    }

    fn with_open(ctx: Arc<ModuleContext>, config: FileSinkConfig, open: bool) -> Result<Arc<Self>, ConfigError> {
        let path = config.path.ok_or(ConfigError::MissingField("path"))?;
        if config.buffer_size == 0 {
            return Err(ConfigError::invalid("buffer_size must be greater than zero"));
        }

        let file = match path.static_value().filter(|_| open) {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing::debug!(module = %ctx.name(), path = %path, "Opened output file");
                Slot::new(File::from_std(file))
            }
            None => Slot::empty(),
        };

        Ok(Arc::new(Self {
            ctx,
            path: Arc::new(path),
            buffer_size: config.buffer_size,
            file,
            ports: Ports::new(),
        }))
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let config = parse_config(config)?;
    if builder.is_validating() {
        return Ok(FileSink::unopened(ctx, config)?);
    }
    Ok(FileSink::new(ctx, config)?)
}

/// Open the file named by evaluating `path` against `first`.
async fn open_for(ctx: &ModuleContext, path: &StringExpr, first: &Request) -> File {
    let path = match path.eval(first) {
        Ok(path) => PathBuf::from(path),
        Err(e) => lifecycle::fatal(format_args!("{}: cannot evaluate path: {e}", ctx.name())),
    };
    match open_options().open(&path).await {
        Ok(file) => {
            tracing::debug!(module = %ctx.name(), path = %path.display(), "Opened output file");
            file
        }
        Err(e) => lifecycle::fatal(format_args!(
            "{}: cannot open {}: {e}",
            ctx.name(),
            path.display()
        )),
    }
}

impl Module for FileSink {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.ctx.name())?;
        let ctx = self.ctx.clone();
        let path = self.path.clone();
        let buffer_size = self.buffer_size;
        let mut writer = self
            .file
            .take()
            .map(|file| BufWriter::with_capacity(buffer_size, file));

        tokio::spawn(async move {
            let mut flushed = Flushed::default();
            while let Some(req) = input.recv().await {
                if writer.is_none() {
                    let file = open_for(&ctx, &path, &req).await;
                    writer = Some(BufWriter::with_capacity(buffer_size, file));
                }
                let Some(out) = writer.as_mut() else { continue };

                ctx.handled_request();
                let mut line = match serde_json::to_vec(&req) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(module = %ctx.name(), error = %e, "Cannot encode request");
                        continue;
                    }
                };
                line.push(b'\n');
                match out.write_all(&line).await {
                    Ok(()) => {
                        let written = flushed.advance(line.len(), out.buffer().len());
                        if written > 0 {
                            metrics::record_file_bytes(ctx.name(), written);
                        }
                    }
                    Err(e) => tracing::error!(module = %ctx.name(), error = %e, "Write failed"),
                }
            }

            if let Some(mut out) = writer {
                match out.flush().await {
                    Ok(()) => metrics::record_file_bytes(ctx.name(), flushed.advance(0, 0)),
                    Err(e) => tracing::error!(module = %ctx.name(), error = %e, "Flush failed"),
                }
            }
            drop(output);
            tracing::debug!(module = %ctx.name(), "Sink closed");
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
    use crate::request::Method;
    use serde_json::json;

    fn build(config: Value) -> Result<Arc<dyn Module>, ConfigError> {
        Builder::new(Arc::new(Registry::with_builtins())).build(&json!({"type": NAME, "config": config}))
    }

    async fn run(sink: &Arc<dyn Module>, requests: Vec<Request>) {
        let (tx, rx) = stream();
        sink.set_input(rx).unwrap();
        let mut out = sink.take_output().unwrap();
        for req in requests {
            tx.send(req).await.unwrap();
        }
        drop(tx);
        assert!(out.recv().await.is_none());
    }

    fn read_lines(path: &std::path::Path) -> Vec<Request> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn writes_json_lines_to_static_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        // small buffer forces several flushes
        let sink = build(json!({"path": path.to_str().unwrap(), "buffer_size": 16})).unwrap();
        // opened eagerly
        assert!(path.exists());

        let requests = vec![
            Request::new(Method::Get, "/a"),
            Request::new(Method::Post, "/b").with_body("hello").with_meta("shard", 1_i64),
        ];
        run(&sink, requests.clone()).await;

        assert_eq!(read_lines(&path), requests);
        assert_eq!(sink.context().requests(), 2);
    }

    #[tokio::test]
    async fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");

        for name in ["/first", "/second"] {
            let sink = build(json!({"path": path.to_str().unwrap()})).unwrap();
            run(&sink, vec![Request::new(Method::Get, name)]).await;
        }

        let paths: Vec<_> = read_lines(&path).into_iter().map(|r| r.path).collect();
        assert_eq!(paths, ["/first", "/second"]);
    }

    #[tokio::test]
    async fn path_from_first_request() {
        let dir = tempfile::tempdir().unwrap();
        let sink = build(json!({"path": "{req.meta.dir.string}/{req.meta.name.string}.jsonl"})).unwrap();

        let dir_name = dir.path().to_str().unwrap().to_string();
        run(
            &sink,
            vec![
                Request::new(Method::Get, "/1")
                    .with_meta("dir", dir_name.clone())
                    .with_meta("name", "one"),
                // later requests go to the same file
                Request::new(Method::Get, "/2")
                    .with_meta("dir", dir_name)
                    .with_meta("name", "two"),
            ],
        )
        .await;

        let lines = read_lines(&dir.path().join("one.jsonl"));
        assert_eq!(lines.len(), 2);
        assert!(!dir.path().join("two.jsonl").exists());
    }

    #[tokio::test]
    async fn validating_build_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.jsonl");
        let descriptor = json!({"type": NAME, "config": {"path": path.to_str().unwrap()}});
        let builder = Builder::new(Arc::new(Registry::with_builtins()));

        builder.validating().build(&descriptor).unwrap();
        assert!(!path.exists());
        assert!(builder.validating().build(&json!({"type": NAME, "config": {}})).is_err());

        // an unopened sink opens its static path with the first request
        let sink: Arc<dyn Module> = FileSink::unopened(
            Arc::new(ModuleContext::new("file", NAME)),
            parse_config(&json!({"path": path.to_str().unwrap()})).unwrap(),
        )
        .unwrap();
        run(&sink, vec![Request::new(Method::Get, "/late")]).await;
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[test]
    fn bytes_count_once_they_leave_the_buffer() {
        let mut flushed = Flushed::default();
        // first line fits in the buffer
        assert_eq!(flushed.advance(10, 10), 0);
        // second line pushes the first one out
        assert_eq!(flushed.advance(10, 10), 10);
        // larger than the buffer: written straight through
        assert_eq!(flushed.advance(40, 0), 50);
        // final flush on an empty buffer reports nothing new
        assert_eq!(flushed.advance(0, 0), 0);

        let mut pending = Flushed::default();
        pending.advance(7, 7);
        assert_eq!(pending.advance(0, 0), 7);
    }

    #[test]
    fn config_errors() {
        assert!(build(json!({})).is_err());
        assert!(build(json!({"path": "/tmp/x", "format": "proto"})).is_err());
        assert!(build(json!({"path": "/nonexistent-dir/sub/out.jsonl"})).is_err());
        assert!(build(json!({"path": "/tmp/x", "buffer_size": 0})).is_err());
    }
}
