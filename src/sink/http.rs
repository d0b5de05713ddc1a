//! `sink.http`: replays every request against a target server.
//!
//! # Responsibilities
//! - Resolve the target origin, once for a static `target_url` or per request
//! - Replay method, path, headers and body; read and discard the response
//! - Record status codes, latency and failures as metrics
//!
//! # Data Flow
//! ```text
//! input ──► WorkerPool (≤ parallel workers) ──► hyper client ──► target
//!                                                  │
//!                                                  └──► metrics / logs
//! ```
//!
//! # Design Decisions
//! - The target's scheme and authority are used; its path is not. The
//!   replayed path is the captured one.
//! - The captured `Host` header is not replayed, so the target sees its own
//!   authority.
//! - `http` and `https` targets share one client; TLS is verified against
//!   the bundled webpki roots.
//! - A failed delivery is logged and counted, never retried.
//! - The output carries nothing and closes once every worker has exited.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{HOST, HeaderMap, HeaderName, HeaderValue};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::expr::StringExpr;
use crate::observability::metrics;
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx};
use crate::request::Request;

use super::pool::WorkerPool;

pub const NAME: &str = "sink.http";

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSinkConfig {
    pub target_url: Option<StringExpr>,

    /// Limit for one exchange, response body included.
    #[serde(default = "default_timeout", with = "crate::config::duration")]
    pub timeout: Duration,

    /// Maximum concurrent requests. Zero means one.
    #[serde(default)]
    pub parallel: usize,

    /// How long a worker waits for work before retiring.
    #[serde(default = "default_idle_timeout", with = "crate::config::duration")]
    pub idle_timeout: Duration,
}

/// `scheme://authority` of a target URL.
fn origin(target: &str) -> Result<String, String> {
    let url = Url::parse(target).map_err(|e| format!("invalid target url {target:?}: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?} in {target:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("target url {target:?} has no host"));
    }
    Ok(url.origin().ascii_serialization())
}

enum Target {
    Static(String),
    Dynamic(StringExpr),
}

impl Target {
    fn resolve(&self, req: &Request) -> Result<String, String> {
        match self {
            Target::Static(origin) => Ok(origin.clone()),
            Target::Dynamic(expr) => {
                let url = expr.eval(req).map_err(|e| e.to_string())?;
                origin(&url)
            }
        }
    }
}

/// State shared by every worker.
struct Delivery {
    ctx: Arc<ModuleContext>,
    target: Target,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

fn build_request(origin: &str, req: Request) -> Result<axum::http::Request<Body>, axum::http::Error> {
    let mut headers = HeaderMap::new();
    for (name, values) in &req.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if name == HOST {
            continue;
        }
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }

    let mut builder = axum::http::Request::builder()
        .method(req.method.to_http())
        .uri(format!("{origin}{}", req.path));
    if let Some(map) = builder.headers_mut() {
        map.extend(headers);
    }
    builder.body(Body::from(req.body))
}

impl Delivery {
    async fn deliver(&self, req: Request) {
        self.ctx.handled_request();

        let origin = match self.target.resolve(&req) {
            Ok(origin) => origin,
            Err(e) => {
                tracing::error!(module = %self.ctx.name(), error = %e, "Cannot resolve target");
                return;
            }
        };
        let request = match build_request(&origin, req) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(module = %self.ctx.name(), target = %origin, error = %e, "Cannot build request");
                return;
            }
        };

        let start = Instant::now();
        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let elapsed = start.elapsed();
            // read to the end so the connection can be reused
            let _ = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX).await;
            Ok::<_, hyper_util::client::legacy::Error>((status, elapsed))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok((status, elapsed))) => {
                metrics::record_response(self.ctx.name(), status.as_u16(), elapsed);
                tracing::trace!(module = %self.ctx.name(), target = %origin, status = %status, "Delivered");
            }
            Ok(Err(e)) => {
                metrics::record_delivery_error(self.ctx.name());
                tracing::error!(module = %self.ctx.name(), target = %origin, error = %e, "Delivery failed");
            }
            Err(_) => {
                metrics::record_delivery_error(self.ctx.name());
                tracing::error!(module = %self.ctx.name(), target = %origin, timeout = ?self.timeout, "Delivery timed out");
            }
        }
    }
}

pub struct HttpSink {
    delivery: Arc<Delivery>,
    pool: Arc<WorkerPool>,
    ports: Ports,
}

impl HttpSink {
    pub fn new(ctx: Arc<ModuleContext>, config: HttpSinkConfig) -> Result<Arc<Self>, ConfigError> {
        let target_url = config.target_url.ok_or(ConfigError::MissingField("target_url"))?;
        let target = match target_url.static_value() {
            Some(url) => Target::Static(origin(url).map_err(ConfigError::Invalid)?),
            None => Target::Dynamic(target_url),
        };

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        let pool = WorkerPool::new(ctx.name(), config.parallel, config.idle_timeout);

        Ok(Arc::new(Self {
            delivery: Arc::new(Delivery {
                ctx,
                target,
                client,
                timeout: config.timeout,
            }),
            pool: Arc::new(pool),
            ports: Ports::new(),
        }))
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    _builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    Ok(HttpSink::new(ctx, parse_config(config)?)?)
}

impl Module for HttpSink {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.delivery.ctx
    }

    fn set_input(&self, input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.delivery.ctx.name())?;
        let pool = self.pool.clone();
        let delivery = self.delivery.clone();

        tokio::spawn(async move {
            let ctx = delivery.ctx.clone();
            pool.run(input, move |req| {
                let delivery = delivery.clone();
                async move { delivery.deliver(req).await }
            })
            .await;
            drop(output);
            tracing::debug!(module = %ctx.name(), "Sink closed");
        });

        Ok(())
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.ports.take_output()
    }
}
