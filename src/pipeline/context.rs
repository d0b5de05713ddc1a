//! Per-module identity and throughput accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Name, type and live counters of one module instance.
#[derive(Debug)]
pub struct ModuleContext {
    name: String,
    module_type: String,
    requests: AtomicU64,
    born: Instant,
    window: Mutex<RateWindow>,
}

/// Request counts of the current and the previous whole second.
#[derive(Debug, Default)]
struct RateWindow {
    second: u64,
    current: u64,
    previous: u64,
}

impl RateWindow {
    fn roll(&mut self, second: u64) {
        if second <= self.second {
            return;
        }
        self.previous = if second == self.second + 1 { self.current } else { 0 };
        self.current = 0;
        self.second = second;
    }
}

impl ModuleContext {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
            requests: AtomicU64::new(0),
            born: Instant::now(),
            window: Mutex::new(RateWindow::default()),
        }
    }

    fn window(&self) -> MutexGuard<'_, RateWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn second(&self) -> u64 {
        self.born.elapsed().as_secs()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    /// `source`, `sink`, `control` or `virtual`: the type prefix before the dot.
    pub fn role(&self) -> &str {
        self.module_type
            .split_once('.')
            .map_or(self.module_type.as_str(), |(role, _)| role)
    }

    /// Count one request passing through this module.
    pub fn handled_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.count_at(self.second());
        crate::observability::metrics::record_request(&self.name);
    }

    fn count_at(&self, second: u64) {
        let mut window = self.window();
        window.roll(second);
        window.current += 1;
    }

    /// Total requests handled since construction.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests handled during the last completed second.
    ///
    /// Reading does not reset anything; concurrent readers see the same value.
    pub fn rps(&self) -> u64 {
        self.rps_at(self.second())
    }

    fn rps_at(&self, second: u64) -> u64 {
        let mut window = self.window();
        window.roll(second);
        window.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_type_prefix() {
        assert_eq!(ModuleContext::new("a", "sink.http").role(), "sink");
        assert_eq!(ModuleContext::new("b", "virtual.pipeline").role(), "virtual");
        assert_eq!(ModuleContext::new("c", "bare").role(), "bare");
    }

    #[test]
    fn counts_handled_requests() {
        let ctx = ModuleContext::new("identity.0", "control.identity");
        for _ in 0..5 {
            ctx.handled_request();
        }
        assert_eq!(ctx.requests(), 5);
        // first second has not completed yet
        assert_eq!(ctx.rps(), 0);
    }

    #[test]
    fn rps_is_the_last_whole_second() {
        let ctx = ModuleContext::new("identity.0", "control.identity");
        for _ in 0..5 {
            ctx.count_at(0);
        }
        assert_eq!(ctx.rps_at(0), 0);
        assert_eq!(ctx.rps_at(1), 5);
        // repeated reads within the same second agree
        assert_eq!(ctx.rps_at(1), 5);

        for _ in 0..3 {
            ctx.count_at(1);
        }
        assert_eq!(ctx.rps_at(2), 3);
        // an idle second in between
        assert_eq!(ctx.rps_at(4), 0);
    }
}
