//! `source.http`: captures requests sent to a local HTTP listener.
//!
//! # Responsibilities
//! - Bind `listen_addr` at construction, so a bad address is a configuration
//!   error (a validating build only checks that it is set)
//! - Convert every received request into a [`Request`] and emit it
//! - Acknowledge with `202 Accepted` once the request is in the pipeline
//!
//! Header names arrive lower case from hyper and are stored in canonical form
//! (`X-Tenant`), so expressions can name headers the way clients write them.
//!
//! # Design Decisions
//! - The listener is bound synchronously and handed to axum; serving starts
//!   immediately, since sources are stream roots and have no input to wait for
//! - Backpressure reaches the client: the handler awaits room in the output
//! - The output closes once the server has shut down and every in-flight
//!   handler has finished

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::lifecycle::Shutdown;
use crate::pipeline::{Builder, Module, ModuleContext, RequestRx, RequestTx, Slot, Virtual, stream};
use crate::request::{HttpVersion, Method, Request, canonical_header_name};

pub const NAME: &str = "source.http";

pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSourceConfig {
    pub listen_addr: Option<String>,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Clone)]
struct CaptureState {
    ctx: Arc<ModuleContext>,
    output: RequestTx,
    max_body_size: usize,
}

pub struct HttpSource {
    ctx: Arc<ModuleContext>,
    local_addr: SocketAddr,
    shutdown: Shutdown,
    output: Slot<RequestRx>,
}

impl HttpSource {
    pub fn new(ctx: Arc<ModuleContext>, config: HttpSourceConfig) -> Result<Arc<Self>, ConfigError> {
        let listen_addr = config.listen_addr.ok_or(ConfigError::MissingField("listen_addr"))?;
        let listener = std::net::TcpListener::bind(&listen_addr)?;
        listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = stream();
        let state = CaptureState {
            ctx: ctx.clone(),
            output: tx,
            max_body_size: config.max_body_size,
        };
        let app = Router::new()
            .fallback(capture)
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        let shutdown = Shutdown::new();
        let stop = Shutdown::wait(shutdown.subscribe());
        let name = ctx.name().to_string();
        tokio::spawn(async move {
            tracing::info!(module = %name, address = %local_addr, "Capturing requests");
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
                tracing::error!(module = %name, error = %e, "Capture server failed");
            }
            tracing::info!(module = %name, "Capture server stopped");
        });

        Ok(Arc::new(Self {
            ctx,
            local_addr,
            shutdown,
            output: Slot::new(rx),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests. The output closes once in-flight ones are emitted.
    pub fn close(&self) {
        self.shutdown.trigger();
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let config: HttpSourceConfig = parse_config(config)?;
    if builder.is_validating() {
        // nothing to wire into a source, so a label stands in for the listener
        config.listen_addr.ok_or(ConfigError::MissingField("listen_addr"))?;
        return Ok(Virtual::new(ctx.name(), ctx.module_type()));
    }
    Ok(HttpSource::new(ctx, config)?)
}

async fn capture(State(state): State<CaptureState>, request: axum::extract::Request) -> StatusCode {
    let (parts, body) = request.into_parts();
    let Some(method) = Method::from_http(&parts.method) else {
        return StatusCode::METHOD_NOT_ALLOWED;
    };
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(module = %state.ctx.name(), error = %e, "Rejected request body");
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let mut req = Request::new(method, path)
        .with_version(HttpVersion::from_http(parts.version))
        .with_body(body);
    for (name, value) in &parts.headers {
        req = req.with_header(
            canonical_header_name(name.as_str()),
            String::from_utf8_lossy(value.as_bytes()),
        );
    }

    state.ctx.handled_request();
    match state.output.send(req).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl Module for HttpSource {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, _input: RequestRx) -> Result<(), WiringError> {
        Err(WiringError::NotAcceptingInput(self.ctx.name().to_string()))
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.output.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AnyExpr, Value as ExprValue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn source(max_body_size: usize) -> Arc<HttpSource> {
        let ctx = Arc::new(ModuleContext::new("capture", NAME));
        HttpSource::new(
            ctx,
            HttpSourceConfig {
                listen_addr: Some("127.0.0.1:0".into()),
                max_body_size,
            },
        )
        .unwrap()
    }

    async fn send_raw(addr: SocketAddr, raw: &str) -> String {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(raw.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn captures_requests() {
        let source = source(DEFAULT_MAX_BODY_SIZE);
        let mut out = source.take_output().unwrap();

        let response = send_raw(
            source.local_addr(),
            "PUT /items/1?v=2 HTTP/1.1\r\nHost: shop\r\nX-Trace: abc\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndata",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 202"), "{response}");

        let req = out.recv().await.unwrap();
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.path, "/items/1?v=2");
        assert_eq!(req.http_version, HttpVersion::Http11);
        assert_eq!(req.header("X-Trace"), Some("abc"));
        assert!(req.headers.contains_key("Host"));
        assert_eq!(&req.body[..], b"data");
        assert_eq!(source.context().requests(), 1);
    }

    #[tokio::test]
    async fn captured_headers_are_visible_to_expressions() {
        let source = source(DEFAULT_MAX_BODY_SIZE);
        let mut out = source.take_output().unwrap();

        send_raw(
            source.local_addr(),
            "GET / HTTP/1.1\r\nHost: shop.example\r\nX-Tenant: acme\r\nConnection: close\r\n\r\n",
        )
        .await;
        let req = out.recv().await.unwrap();

        let host = AnyExpr::parse(r#"{req.header("Host")}"#).unwrap();
        let tenant = AnyExpr::parse(r#"{req.header("X-Tenant")}"#).unwrap();
        assert_eq!(host.eval(&req).unwrap(), ExprValue::from("shop.example"));
        assert_eq!(tenant.eval(&req).unwrap(), ExprValue::from("acme"));
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let source = source(2);
        let mut out = source.take_output().unwrap();

        let response = send_raw(
            source.local_addr(),
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndata",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 413"), "{response}");

        source.close();
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn does_not_accept_input() {
        let source = source(DEFAULT_MAX_BODY_SIZE);
        assert!(matches!(
            source.set_input(stream().1),
            Err(WiringError::NotAcceptingInput(_))
        ));
    }

    #[tokio::test]
    async fn bad_address_is_a_config_error() {
        let ctx = Arc::new(ModuleContext::new("capture", NAME));
        let config = HttpSourceConfig {
            listen_addr: Some("not-an-address".into()),
            max_body_size: 1,
        };
        assert!(HttpSource::new(ctx, config).is_err());
    }

    #[tokio::test]
    async fn validating_build_binds_nothing() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let descriptor = serde_json::json!({"type": NAME, "config": {"listen_addr": addr}});
        let builder = Builder::new(Arc::new(crate::pipeline::registry::Registry::with_builtins()));

        // the port is in use, so only a build that skips binding succeeds
        assert!(builder.build(&descriptor).is_err());
        let module = builder.validating().build(&descriptor).unwrap();
        assert_eq!(module.context().module_type(), NAME);
        assert!(builder.validating().build(&serde_json::json!({"type": NAME})).is_err());
    }
}
