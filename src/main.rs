//! traffic-mirror
//!
//! Loads a pipeline configuration, builds the module tree and runs it until
//! its output closes or the process is signalled.
//!
//! ```text
//! config.json ──► load + validate ──► build pipeline ──► drain output
//!                                            │
//!                                            └──► diagnostics server (optional)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use traffic_mirror::admin::{self, AdminState};
use traffic_mirror::config::{self, build_pipeline};
use traffic_mirror::lifecycle::{Shutdown, signals};
use traffic_mirror::observability::{logging, metrics};
use traffic_mirror::pipeline::{Builder, registry};

#[derive(Debug, Parser)]
#[command(name = "traffic-mirror", version, about = "Mirror HTTP traffic through a module pipeline")]
struct Cli {
    /// Configuration file (.json or .toml).
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level; overrides the configuration file. `RUST_LOG` overrides both.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config, &registry::global()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(cli.log_level.as_deref());
            tracing::error!(path = %cli.config.display(), error = %e, "Cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.log_level.as_deref().or(config.log_level.as_deref()));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), path = %cli.config.display(), "traffic-mirror starting");

    let metrics = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let pipeline = match build_pipeline(&config, &Builder::global()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Cannot build pipeline");
            return ExitCode::FAILURE;
        }
    };
    let Some(mut output) = pipeline.take_output() else {
        tracing::error!("Pipeline output unavailable");
        return ExitCode::FAILURE;
    };

    let shutdown = Shutdown::new();
    signals::spawn_handler(shutdown.clone());

    let diagnostics = match &config.listen_addr {
        Some(addr) => {
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(address = %addr, error = %e, "Cannot bind diagnostics server");
                    return ExitCode::FAILURE;
                }
            };
            let state = AdminState {
                pipeline: pipeline.clone(),
                metrics,
            };
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = admin::serve(listener, state, &shutdown).await {
                    tracing::error!(error = %e, "Diagnostics server failed");
                }
            }))
        }
        None => None,
    };

    let mut stop = shutdown.subscribe();
    let mut drained: u64 = 0;
    loop {
        tokio::select! {
            next = output.recv() => match next {
                Some(_) => drained += 1,
                None => {
                    tracing::info!("Pipeline output closed");
                    break;
                }
            },
            _ = stop.recv() => break,
        }
    }
    tracing::debug!(drained, "Stopped draining pipeline");

    shutdown.trigger();
    if let Some(diagnostics) = diagnostics {
        let _ = diagnostics.await;
    }
    tracing::info!("traffic-mirror stopped");
    ExitCode::SUCCESS
}
