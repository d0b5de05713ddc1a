//! `control.decouple`: a bounded buffer that sheds load instead of blocking.
//!
//! # Responsibilities
//! - Buffer up to `queue_size` requests between two stages
//! - Drop requests when the buffer is full and count them
//! - Periodically report processed and dropped counts
//!
//! # Design Decisions
//! - The output stream itself is the buffer: enqueueing is a non-blocking
//!   `try_send`, so a slow consumer never stalls the producer.
//! - The periodic report only logs at warn level when something was dropped;
//!   quiet windows are logged at debug level.
//! - Requests still buffered when the module shuts down may be lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::observability::metrics;
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx};

pub const NAME: &str = "control.decouple";

pub const DEFAULT_QUEUE_SIZE: usize = 100;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecoupleConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Disable the periodic drop report.
    #[serde(default)]
    pub quiet: bool,
}

/// Processed and dropped counters, per report window and in total.
#[derive(Debug, Default)]
pub struct DecoupleStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    processed_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl DecoupleStats {
    fn record(&self, dropped: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processed_total.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take and reset the current window as `(dropped, processed)`.
    fn take_window(&self) -> (u64, u64) {
        (
            self.dropped.swap(0, Ordering::Relaxed),
            self.processed.swap(0, Ordering::Relaxed),
        )
    }

    pub fn processed_total(&self) -> u64 {
        self.processed_total.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

pub struct Decouple {
    ctx: Arc<ModuleContext>,
    quiet: bool,
    stats: Arc<DecoupleStats>,
    ports: Ports,
}

impl Decouple {
    pub fn new(ctx: Arc<ModuleContext>, config: DecoupleConfig) -> Result<Arc<Self>, ConfigError> {
        if config.queue_size == 0 {
            return Err(ConfigError::invalid("queue_size must be greater than zero"));
        }
        Ok(Arc::new(Self {
            ctx,
            quiet: config.quiet,
            stats: Arc::new(DecoupleStats::default()),
            ports: Ports::with_capacity(config.queue_size),
        }))
    }

    pub fn stats(&self) -> &Arc<DecoupleStats> {
        &self.stats
    }
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    _builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    Ok(Decouple::new(ctx, parse_config(config)?)?)
}

fn report(ctx: &ModuleContext, stats: &DecoupleStats) {
    let (dropped, processed) = stats.take_window();
    if dropped > 0 {
        tracing::warn!(module = %ctx.name(), dropped, processed, "Dropped requests");
    } else {
        tracing::debug!(module = %ctx.name(), dropped, processed, "Dropped requests");
    }
}

impl Module for Decouple {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.ctx.name())?;

        let reporter = (!self.quiet).then(|| {
            let ctx = self.ctx.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + REPORT_INTERVAL;
                let mut ticker = tokio::time::interval_at(start, REPORT_INTERVAL);
                loop {
                    ticker.tick().await;
                    report(&ctx, &stats);
                }
            })
        });

        let ctx = self.ctx.clone();
        let stats = self.stats.clone();
        let quiet = self.quiet;
        tokio::spawn(async move {
            while let Some(req) = input.recv().await {
                ctx.handled_request();
                match output.try_send(req) {
                    Ok(()) => stats.record(false),
                    Err(TrySendError::Full(_)) => {
                        stats.record(true);
                        metrics::record_decouple_drop(ctx.name());
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }

            if let Some(reporter) = reporter {
                reporter.abort();
            }
            if !quiet {
                report(&ctx, &stats);
            }
        });

        Ok(())
    }

    fn take_output(&self) -> Option<RequestRx> {
        self.ports.take_output()
    }
}
