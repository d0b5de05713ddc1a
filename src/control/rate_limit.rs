//! `control.rate_limit`: paces requests to at most `rps` per second.
//!
//! `rps` is either a number or an expression. A request-dependent expression
//! is evaluated once, against the first request; if that fails the process
//! exits, since the pipeline would otherwise run with an undefined rate.
//!
//! Pacing waits until one interval has passed since the previous emission,
//! so the only burst possible is the first request after an idle gap.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::module::parse_config;
use crate::error::{ConfigError, WiringError};
use crate::expr::NumberExpr;
use crate::lifecycle;
use crate::pipeline::{Builder, Module, ModuleContext, Ports, RequestRx};

pub const NAME: &str = "control.rate_limit";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub rps: NumberExpr,
}

pub struct RateLimit {
    ctx: Arc<ModuleContext>,
    rps: Arc<NumberExpr>,
    /// Known up front when `rps` does not depend on the request.
    interval: Option<Duration>,
    ports: Ports,
}

/// Interval between two emissions at `rps` requests per second.
fn interval_for(rps: f64) -> Result<Duration, String> {
    if !rps.is_finite() || rps <= 0.0 {
        return Err(format!("rps must be a positive number, got {rps}"));
    }
    Duration::try_from_secs_f64(1.0 / rps).map_err(|e| e.to_string())
}

pub fn create(
    ctx: Arc<ModuleContext>,
    config: &Value,
    _builder: &Builder,
) -> Result<Arc<dyn Module>, ConfigError> {
    let config: RateLimitConfig = parse_config(config)?;
    let interval = match config.rps.static_value() {
        Some(rps) => Some(interval_for(rps).map_err(ConfigError::Invalid)?),
        None => None,
    };
    Ok(Arc::new(RateLimit {
        ctx,
        rps: Arc::new(config.rps),
        interval,
        ports: Ports::new(),
    }))
}

impl Module for RateLimit {
    fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    fn set_input(&self, mut input: RequestRx) -> Result<(), WiringError> {
        let output = self.ports.claim(self.ctx.name())?;
        let ctx = self.ctx.clone();
        let rps = self.rps.clone();
        let mut interval = self.interval;

        tokio::spawn(async move {
            let mut last: Option<Instant> = None;
            while let Some(req) = input.recv().await {
                let pace = match interval {
                    Some(pace) => pace,
                    None => {
                        let pace = rps
                            .eval_float(&req)
                            .map_err(|e| e.to_string())
                            .and_then(interval_for)
                            .unwrap_or_else(|e| {
                                lifecycle::fatal(format_args!("{}: cannot evaluate rps: {e}", ctx.name()))
                            });
                        tracing::debug!(module = %ctx.name(), interval = ?pace, "Rate initialised");
                        interval = Some(pace);
                        pace
                    }
                };

                if let Some(last) = last {
                    tokio::time::sleep_until(last + pace).await;
                }
                last = Some(Instant::now());

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
