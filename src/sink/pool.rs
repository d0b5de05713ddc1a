//! Adaptive worker pool for delivery sinks.
//!
//! # Responsibilities
//! - Run deliveries on up to `max_workers` concurrent workers
//! - Start workers on demand and retire them after `idle_timeout` without work
//! - Return from `run` only once every worker has exited
//!
//! # Data Flow
//! ```text
//! input ──► dispatcher ──┬─► idle worker (handoff)
//!                        ├─► new worker seeded with the request (below max)
//!                        └─► wait for a worker to go idle or retire (at max)
//! ```
//!
//! # Design Decisions
//! - Handoff is a rendezvous: an idle worker parks a oneshot sender in the
//!   shared state and the dispatcher pops it. There is no queue between the
//!   dispatcher and the workers, so a request is never buffered where shutdown
//!   could strand it.
//! - Worker count and the idle list live behind one mutex. Every change to
//!   either happens while holding it.
//! - A retiring worker closes its handoff slot before giving up, so a request
//!   sent at the same moment is either received or returned to the dispatcher.
//! - A worker gives its slot back from a drop guard, so a panicking delivery
//!   still frees it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinSet;

use crate::observability::metrics;
use crate::pipeline::RequestRx;
use crate::request::Request;

#[derive(Default)]
struct PoolState {
    workers: usize,
    idle: Vec<oneshot::Sender<Request>>,
    closed: bool,
}

struct Shared {
    name: String,
    state: Mutex<PoolState>,
    /// Signalled when a worker goes idle or retires.
    worker_freed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self) {
        let mut state = self.lock();
        state.workers -= 1;
        state.idle.retain(|slot| !slot.is_closed());
        metrics::set_pool_workers(&self.name, state.workers);
        drop(state);
        self.worker_freed.notify_one();
        tracing::trace!(module = %self.name, "Worker retired");
    }
}

/// Live-worker slot, released on drop.
struct WorkerGuard(Arc<Shared>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.retire();
    }
}

enum Dispatch {
    Handed,
    Spawn(Request),
    Wait(Request),
}

pub struct WorkerPool {
    max_workers: usize,
    idle_timeout: Duration,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max_workers: usize, idle_timeout: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            idle_timeout,
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(PoolState::default()),
                worker_freed: Notify::new(),
            }),
        }
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.lock().workers
    }

    fn try_dispatch(&self, mut req: Request) -> Dispatch {
        let mut state = self.shared.lock();
        while let Some(slot) = state.idle.pop() {
            match slot.send(req) {
                Ok(()) => return Dispatch::Handed,
                // that worker is retiring
                Err(back) => req = back,
            }
        }
        if state.workers < self.max_workers {
            state.workers += 1;
            metrics::set_pool_workers(&self.shared.name, state.workers);
            return Dispatch::Spawn(req);
        }
        Dispatch::Wait(req)
    }

    /// Deliver every request of `input`, returning once the input has ended
    /// and all workers have exited.
    pub async fn run<F, Fut>(&self, mut input: RequestRx, deliver: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deliver = Arc::new(deliver);
        let mut workers = JoinSet::new();

        while let Some(req) = input.recv().await {
            while let Some(joined) = workers.try_join_next() {
                self.log_panic(joined);
            }

            let mut pending = req;
            loop {
                match self.try_dispatch(pending) {
                    Dispatch::Handed => break,
                    Dispatch::Spawn(req) => {
                        workers.spawn(worker(
                            self.shared.clone(),
                            deliver.clone(),
                            self.idle_timeout,
                            req,
                        ));
                        break;
                    }
                    Dispatch::Wait(req) => {
                        pending = req;
                        self.shared.worker_freed.notified().await;
                    }
                }
            }
        }

        {
            let mut state = self.shared.lock();
            state.closed = true;
            // idle workers see their slot dropped and exit
            state.idle.clear();
        }
        while let Some(joined) = workers.join_next().await {
            self.log_panic(joined);
        }
        tracing::debug!(module = %self.shared.name, "All workers exited");
    }

    fn log_panic(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            tracing::error!(module = %self.shared.name, error = %e, "Worker panicked");
        }
    }
}

async fn worker<F, Fut>(shared: Arc<Shared>, deliver: Arc<F>, idle_timeout: Duration, first: Request)
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let _slot = WorkerGuard(shared.clone());
    let mut next = first;
    loop {
        deliver(next).await;

        let (slot, mut handoff) = oneshot::channel();
        {
            let mut state = shared.lock();
            if state.closed {
                drop(state);
                return;
            }
            state.idle.push(slot);
        }
        shared.worker_freed.notify_one();

        next = match tokio::time::timeout(idle_timeout, &mut handoff).await {
            Ok(Ok(req)) => req,
            // pool shutting down
            Ok(Err(_)) => return,
            Err(_) => {
                handoff.close();
                match handoff.try_recv() {
                    Ok(req) => req,
                    Err(_) => return,
                }
            }
        };
    }
}
