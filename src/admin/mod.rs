//! Diagnostics server.
//!
//! # Endpoints
//! - `GET /health`: `OK` while the process runs
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /api/graph`: the pipeline topology as JSON
//!
//! # Design Decisions
//! - Read-only: nothing here can change the running pipeline
//! - Stops on the shared [`Shutdown`] signal

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::Shutdown;
use crate::pipeline::Module;

use self::handlers::{get_graph, get_health, get_metrics};

#[derive(Clone)]
pub struct AdminState {
    pub pipeline: Arc<dyn Module>,
    /// Absent when no recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/api/graph", get(get_graph))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve diagnostics on `listener` until `shutdown` triggers.
pub async fn serve(listener: TcpListener, state: AdminState, shutdown: &Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Diagnostics server listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(Shutdown::wait(shutdown.subscribe()))
        .await?;
    tracing::info!("Diagnostics server stopped");
    Ok(())
}
