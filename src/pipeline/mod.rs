//! Pipeline core: the module contract, streams and module construction.
//!
//! # Data Flow
//! ```text
//! config descriptor ──► Builder::build ──► Registry constructor ──► Arc<dyn Module>
//!
//! upstream output ──► set_input(rx) ──► module task(s) ──► take_output() ──► downstream
//! ```
//!
//! # Design Decisions
//! - Streams are bounded tokio channels; a full downstream suspends the
//!   sender, so backpressure flows upstream unless a decouple stage sheds load.
//! - Closing a stream (dropping every sender) is the only termination signal.
//!   Each module closes its output once its input has ended and its own work
//!   has drained.
//! - A receiver has a single owner, so a module hands out its output once.

pub mod context;
pub mod registry;
pub mod topology;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::error::WiringError;
use crate::request::Request;

pub use context::ModuleContext;
pub use registry::{Builder, Constructor, Registry};
pub use topology::{TopologyNode, Virtual};

/// Capacity of the stream between two modules.
pub const STREAM_CAPACITY: usize = 64;

pub type RequestTx = mpsc::Sender<Request>;
pub type RequestRx = mpsc::Receiver<Request>;

/// Create a bounded request stream.
pub fn stream() -> (RequestTx, RequestRx) {
    mpsc::channel(STREAM_CAPACITY)
}

/// A pipeline stage.
///
/// Constructing a module never waits for input. `set_input` starts the
/// module's processing and may be called at most once.
pub trait Module: Send + Sync {
    fn context(&self) -> &Arc<ModuleContext>;

    fn set_input(&self, input: RequestRx) -> Result<(), WiringError>;

    /// Hand out the output stream. Returns `None` once taken.
    fn take_output(&self) -> Option<RequestRx>;

    /// Child modules grouped by branch, for topology display.
    fn children(&self) -> Vec<Vec<Arc<dyn Module>>> {
        Vec::new()
    }
}

/// Value that is handed out at most once.
pub(crate) struct Slot<T>(Mutex<Option<T>>);

impl<T> Slot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(Mutex::new(Some(value)))
    }

    pub(crate) fn empty() -> Self {
        Self(Mutex::new(None))
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }

    pub(crate) fn put(&self, value: T) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(value);
        }
    }
}

/// Input and output ends of a module driven by a single task.
///
/// The output sender is held until `claim` is called from `set_input`, which
/// also enforces the at-most-once wiring rule.
pub(crate) struct Ports {
    input_set: AtomicBool,
    tx: Slot<RequestTx>,
    rx: Slot<RequestRx>,
}

impl Ports {
    pub(crate) fn new() -> Self {
        Self::with_capacity(STREAM_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            input_set: AtomicBool::new(false),
            tx: Slot::new(tx),
            rx: Slot::new(rx),
        }
    }

    /// Mark the input as wired and take the output sender.
    pub(crate) fn claim(&self, module: &str) -> Result<RequestTx, WiringError> {
        if self.input_set.swap(true, Ordering::SeqCst) {
            return Err(WiringError::InputAlreadySet(module.to_string()));
        }
        self.tx
            .take()
            .ok_or_else(|| WiringError::InputAlreadySet(module.to_string()))
    }

    pub(crate) fn take_output(&self) -> Option<RequestRx> {
        self.rx.take()
    }
}

/// Connect `upstream`'s output to `downstream`'s input.
pub fn connect(upstream: &dyn Module, downstream: &dyn Module) -> Result<(), WiringError> {
    let rx = upstream
        .take_output()
        .ok_or_else(|| WiringError::OutputTaken(upstream.context().name().to_string()))?;
    downstream.set_input(rx)
}
