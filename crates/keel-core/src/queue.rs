//! The work queue and the single-consumer dispatch loop.
//!
//! Producers hold a cheap [`WorkQueue`] handle, enqueue [`Policy::Manual`]
//! promises and block on them. Exactly one thread drives the [`Dispatcher`],
//! which pops promises in FIFO order and runs them one at a time. Work that
//! goes through the queue therefore never runs concurrently with other queued
//! work, without the work itself taking any lock.
//!
//! ```rust
//! use std::sync::Arc;
//! use keel_core::{Dispatcher, Policy, Promise};
//!
//! let dispatcher = Arc::new(Dispatcher::new());
//! let queue = dispatcher.queue();
//! let driver = {
//!     let dispatcher = Arc::clone(&dispatcher);
//!     std::thread::spawn(move || dispatcher.run())
//! };
//!
//! let answer = Promise::wrap(Policy::Manual, || 6 * 7);
//! queue.enqueue(&answer).unwrap();
//! assert!(answer.wait());
//! assert_eq!(answer.value(), Some(42));
//!
//! dispatcher.stop();
//! driver.join().unwrap();
//! ```
//!
//! [`Policy::Manual`]: crate::Policy::Manual

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{DispatchError, DispatchResult, PromiseError, PromiseResult, Rejection};
use crate::promise::{Promise, PromiseState};

// =============================================================================
// Runnable
// =============================================================================

/// Type-erased view of a promise, as the dispatch loop sees it.
pub trait Runnable: Send + Sync {
    /// Executes the work function if still pending.
    fn run(&self) -> PromiseResult<()>;

    /// Current state of the underlying promise.
    fn state(&self) -> PromiseState;

    /// Rejects the promise without running it. Returns `false` if it had
    /// already settled.
    fn abandon(&self, error: Rejection) -> bool;
}

impl<T: Send + 'static> Runnable for Promise<T> {
    fn run(&self) -> PromiseResult<()> {
        Promise::run(self)
    }

    fn state(&self) -> PromiseState {
        Promise::state(self)
    }

    fn abandon(&self, error: Rejection) -> bool {
        Promise::abandon(self, error)
    }
}

enum Item {
    Work(Arc<dyn Runnable>),
    Stop,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters maintained by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Items the loop has taken off the queue and executed.
    pub processed: u64,
    /// Items whose execution failed at the loop level.
    pub failed: u64,
    /// Items enqueued but not yet executed.
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    pending: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// WorkQueue
// =============================================================================

/// Producer handle onto the dispatch queue.
///
/// Clones share the same queue and stop flag.
#[derive(Clone)]
pub struct WorkQueue {
    tx: UnboundedSender<Item>,
    stopped: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkQueue {
    /// Hands a promise to the dispatch loop.
    ///
    /// The promise should be [`Policy::Manual`](crate::Policy::Manual);
    /// the caller then blocks on it with [`Promise::wait`]. Fails with
    /// [`DispatchError::Stopped`] once the loop has shut down.
    pub fn enqueue<T: Send + 'static>(&self, promise: &Promise<T>) -> DispatchResult<()> {
        let item: Arc<dyn Runnable> = Arc::new(promise.clone());
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Item::Work(item)).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            debug!("Rejected enqueue: dispatch loop is stopped");
            return Err(DispatchError::Stopped);
        }
        trace!(policy = ?promise.policy(), "Enqueued promise");
        Ok(())
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Asks the dispatch loop to stop.
    ///
    /// Items already queued are still handled before the loop exits.
    pub fn request_stop(&self) {
        if self.stopped.is_cancelled() {
            return;
        }
        self.stopped.cancel();
        // The receiver may already be gone, in which case there is nothing to wake.
        let _ = self.tx.send(Item::Stop);
    }

    /// Token cancelled when a stop is requested.
    pub fn stop_token(&self) -> CancellationToken {
        self.stopped.clone()
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owner of the queue's receiving end: the dispatch loop.
///
/// `Dispatcher` is `Send + Sync`; share it in an `Arc` between the thread
/// that drives [`run`](Self::run) and whoever calls [`stop`](Self::stop).
pub struct Dispatcher {
    queue: WorkQueue,
    rx: Mutex<UnboundedReceiver<Item>>,
    // Set when `run_once` takes the stop marker off the queue.
    stop_seen: AtomicBool,
    drain_on_stop: bool,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            queue: WorkQueue {
                tx,
                stopped: CancellationToken::new(),
                counters: Arc::new(Counters::default()),
            },
            rx: Mutex::new(rx),
            stop_seen: AtomicBool::new(false),
            drain_on_stop: true,
        }
    }

    /// Whether items still queued at stop time are run (`true`, the default)
    /// or rejected with [`DispatchError::Stopped`].
    pub fn drain_on_stop(mut self, drain: bool) -> Self {
        self.drain_on_stop = drain;
        self
    }

    /// A producer handle onto this dispatcher's queue.
    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Runs the dispatch loop on the current thread until stopped.
    ///
    /// Blocks while the queue is empty. When a stop is requested the queue is
    /// closed to new work, every remaining item is drained, and the loop
    /// returns the number of drained items. Must not be called from within an
    /// async runtime.
    pub fn run(&self) -> usize {
        let mut rx = self.rx.lock();
        info!("Dispatch loop started");
        while !self.stop_seen.load(Ordering::Acquire) {
            match rx.blocking_recv() {
                Some(Item::Work(item)) => self.execute(&*item),
                Some(Item::Stop) | None => break,
            }
        }
        let drained = self.drain(&mut rx);
        info!(drained, stats = ?self.stats(), "Dispatch loop stopped");
        drained
    }

    /// Runs at most one queued item without blocking.
    ///
    /// Returns `true` if an item was executed. Once it reaches the stop
    /// marker, a later [`run`](Self::run) drains and returns without blocking.
    pub fn run_once(&self) -> bool {
        match self.rx.lock().try_recv() {
            Ok(Item::Work(item)) => {
                self.execute(&*item);
                true
            }
            Ok(Item::Stop) => {
                self.stop_seen.store(true, Ordering::Release);
                false
            }
            Err(_) => false,
        }
    }

    /// Requests the loop to stop. Does not wait for it.
    pub fn stop(&self) {
        self.queue.request_stop();
    }

    /// Stops the loop and drains whatever is left on the calling thread.
    ///
    /// If [`run`](Self::run) is active on another thread this waits for it to
    /// finish draining first. Returns the number of items drained here.
    pub fn shutdown(&self) -> usize {
        self.stop();
        let mut rx = self.rx.lock();
        let drained = self.drain(&mut rx);
        if drained > 0 {
            info!(drained, "Drained queue on shutdown");
        }
        drained
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> DispatchStats {
        self.queue.stats()
    }

    fn drain(&self, rx: &mut UnboundedReceiver<Item>) -> usize {
        rx.close();
        let mut drained = 0;
        loop {
            match rx.try_recv() {
                Ok(Item::Work(item)) => {
                    drained += 1;
                    if self.drain_on_stop {
                        self.execute(&*item);
                    } else {
                        self.discard(&*item);
                    }
                }
                Ok(Item::Stop) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    fn execute(&self, item: &dyn Runnable) {
        let counters = &self.queue.counters;
        trace!(state = %item.state(), "Running queued promise");

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| item.run())) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(PromiseError::from_panic(&*payload)),
        };
        if let Some(e) = failure {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "Queued promise failed");
        }

        counters.processed.fetch_add(1, Ordering::Relaxed);
        counters.pending.fetch_sub(1, Ordering::Relaxed);
    }

    fn discard(&self, item: &dyn Runnable) {
        if item.abandon(Rejection::new(DispatchError::Stopped)) {
            warn!("Discarded queued promise on stop");
        }
        self.queue.counters.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}
