//! Single-assignment promises with selectable execution policies.
//!
//! A [`Promise`] wraps a work function that eventually settles it by calling
//! [`Settle::resolve`] or [`Settle::reject`]. The [`Policy`] it was created
//! with decides *when* that work function runs:
//!
//! | Policy                | Work runs...                                        |
//! |-----------------------|-----------------------------------------------------|
//! | [`Policy::Immediate`] | synchronously, inside the constructor               |
//! | [`Policy::Lazy`]      | on the first blocking [`wait`](Promise::wait)       |
//! | [`Policy::Spawned`]   | on a dedicated thread started by the constructor    |
//! | [`Policy::Manual`]    | only when someone calls [`run`](Promise::run)       |
//!
//! Manual promises are what the [`Dispatcher`](crate::Dispatcher) executes:
//! producers enqueue them and block in `wait()`, the dispatch loop runs them
//! one at a time.
//!
//! # Chaining
//!
//! [`then`](Promise::then), [`catch`](Promise::catch) and friends build a child
//! promise whose work waits on the parent, applies a continuation and settles
//! with the result. A continuation returns a [`Next`], which may itself carry
//! another promise; the child then waits on it and adopts its outcome.
//!
//! ```rust
//! use keel_core::{Next, Promise};
//!
//! let doubled = Promise::resolved(21).then(|v| Next::Value(v * 2));
//! assert!(doubled.wait());
//! assert_eq!(doubled.result().unwrap().unwrap(), 42);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{PromiseError, PromiseResult, Rejection};

/// Lifecycle state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    /// The promise has not settled yet.
    Pending,
    /// The promise settled with a value.
    Resolved,
    /// The promise settled with a [`Rejection`].
    Rejected,
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// When a promise's work function is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Policy {
    /// Run synchronously at construction time.
    Immediate,
    /// Run on the first blocking wait.
    #[default]
    Lazy,
    /// Run on a dedicated thread started at construction time.
    Spawned,
    /// Never run implicitly; an external driver must call `run()`.
    Manual,
}

type Work<T> = Box<dyn FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static>;

enum Slot<T> {
    /// Not settled. The work function is `None` once `run()` has taken it.
    Pending(Option<Work<T>>),
    Resolved(T),
    Rejected(Rejection),
}

impl<T> Slot<T> {
    fn state(&self) -> PromiseState {
        match self {
            Self::Pending(_) => PromiseState::Pending,
            Self::Resolved(_) => PromiseState::Resolved,
            Self::Rejected(_) => PromiseState::Rejected,
        }
    }
}

struct Shared<T> {
    policy: Policy,
    timeout: Option<Duration>,
    slot: Mutex<Slot<T>>,
    settled: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Shared<T> {
    fn settle(&self, next: Slot<T>, op: &'static str) -> PromiseResult<()> {
        let mut slot = self.slot.lock();
        if let state @ (PromiseState::Resolved | PromiseState::Rejected) = slot.state() {
            return Err(PromiseError::NotPending { op, state });
        }
        *slot = next;
        self.settled.notify_all();
        Ok(())
    }
}

/// Handle passed to a work function to settle its promise.
///
/// It only lives for the duration of the work function, so a promise is
/// always settled by whoever runs it.
pub struct Settle<'a, T> {
    shared: &'a Shared<T>,
}

impl<T> Settle<'_, T> {
    /// Settles the promise with a value.
    ///
    /// Fails with [`PromiseError::NotPending`] if it already settled.
    pub fn resolve(&self, value: T) -> PromiseResult<()> {
        self.shared.settle(Slot::Resolved(value), "resolve")
    }

    /// Settles the promise with an error.
    ///
    /// Fails with [`PromiseError::NotPending`] if it already settled.
    pub fn reject(&self, error: impl Into<Rejection>) -> PromiseResult<()> {
        self.shared.settle(Slot::Rejected(error.into()), "reject")
    }

    /// Settles the promise from a `Result`.
    pub fn complete(&self, result: Result<T, Rejection>) -> PromiseResult<()> {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }
}

/// What a continuation hands back to the chained promise.
pub enum Next<T> {
    /// Resolve the chained promise with this value.
    Value(T),
    /// Wait on this promise and adopt its outcome.
    Defer(Promise<T>),
    /// Reject the chained promise.
    Fail(Rejection),
}

impl<T> Next<T> {
    /// Rejects the chained promise with `error`.
    pub fn fail(error: impl Into<Rejection>) -> Self {
        Self::Fail(error.into())
    }
}

impl<T> From<Promise<T>> for Next<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Defer(promise)
    }
}

impl<T, E> From<Result<T, E>> for Next<T>
where
    E: Into<Rejection>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Fail(error.into()),
        }
    }
}

/// Options for building a chained promise.
///
/// By default the child is [`Policy::Immediate`] when its parent is, and
/// [`Policy::Lazy`] otherwise; it inherits the parent's timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOptions {
    policy: Option<Policy>,
    timeout: Option<Option<Duration>>,
}

impl ChainOptions {
    /// Creates options that inherit everything from the parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the child's execution policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Overrides the child's default wait timeout (`None` waits forever).
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A single-assignment cell for a value produced by a work function.
///
/// Cloning a `Promise` yields another handle to the same cell.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a promise with the given policy and no default timeout.
    pub fn new<F>(policy: Policy, work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        Self::with_timeout(policy, None, work)
    }

    /// Creates a promise with the given policy and default wait timeout.
    ///
    /// `timeout` is what [`wait`](Self::wait) uses, and what chained
    /// promises use when waiting on this one.
    pub fn with_timeout<F>(policy: Policy, timeout: Option<Duration>, work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        let promise = Self::from_slot(policy, timeout, Slot::Pending(Some(Box::new(work))));
        match policy {
            Policy::Immediate => promise.run_logged(),
            Policy::Spawned => promise.spawn_worker(),
            Policy::Lazy | Policy::Manual => {}
        }
        promise
    }

    /// Runs synchronously at construction time.
    pub fn immediate<F>(work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        Self::new(Policy::Immediate, work)
    }

    /// Runs on the first blocking wait.
    pub fn lazy<F>(work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        Self::new(Policy::Lazy, work)
    }

    /// Runs on a dedicated thread; joined by the first successful wait.
    pub fn spawned<F>(work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        Self::new(Policy::Spawned, work)
    }

    /// Runs only when driven by an explicit [`run`](Self::run).
    pub fn manual<F>(work: F) -> Self
    where
        F: FnOnce(&Settle<'_, T>) -> Result<(), Rejection> + Send + 'static,
    {
        Self::new(Policy::Manual, work)
    }

    /// A promise that is already resolved.
    ///
    /// It reports [`Policy::Lazy`], so promises chained from it stay lazy.
    pub fn resolved(value: T) -> Self {
        Self::from_slot(Policy::Lazy, None, Slot::Resolved(value))
    }

    /// A promise that is already rejected.
    pub fn rejected(error: impl Into<Rejection>) -> Self {
        Self::from_slot(Policy::Lazy, None, Slot::Rejected(error.into()))
    }

    /// Wraps a plain function: resolves with its return value.
    ///
    /// A panic inside `func` rejects the promise.
    pub fn wrap<F>(policy: Policy, func: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::new(policy, move |settle| Ok(settle.resolve(func())?))
    }

    /// Wraps a fallible function: resolves with `Ok`, rejects with `Err`.
    pub fn try_wrap<F, E>(policy: Policy, func: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<Rejection>,
    {
        Self::new(policy, move |settle| {
            Ok(settle.complete(func().map_err(Into::into))?)
        })
    }

    fn from_slot(policy: Policy, timeout: Option<Duration>, slot: Slot<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                timeout,
                slot: Mutex::new(slot),
                settled: Condvar::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    fn spawn_worker(&self) {
        // The worker owns the work from here on, so `run()` can never
        // execute it on another thread.
        let Some(work) = self.take_work() else {
            return;
        };
        let runner = self.clone();
        let spawned = thread::Builder::new()
            .name("keel-promise".into())
            .spawn(move || {
                if let Err(e) = runner.execute(work) {
                    warn!(error = %e, "Promise work failed after settling");
                }
            });
        match spawned {
            Ok(handle) => *self.shared.worker.lock() = Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn promise worker, rejecting");
                let _ = self.shared.settle(Slot::Rejected(Rejection::new(e)), "reject");
            }
        }
    }

    fn run_logged(&self) {
        if let Err(e) = self.run() {
            warn!(error = %e, "Promise work failed after settling");
        }
    }

    /// Executes the work function if the promise is still pending.
    ///
    /// At most one call ever executes the work function; every other call is
    /// a no-op. An `Err` returned by the work function, or a panic, rejects
    /// the promise. A work function that returns `Ok` without settling
    /// rejects it with [`PromiseError::StateNotSet`].
    ///
    /// The only error returned is [`PromiseError::NotPending`], when the work
    /// function settled the promise and then failed anyway.
    ///
    /// A [`Policy::Spawned`] promise hands its work to its worker thread at
    /// construction, so calling `run` on it never does anything.
    pub fn run(&self) -> PromiseResult<()> {
        match self.take_work() {
            Some(work) => self.execute(work),
            None => Ok(()),
        }
    }

    fn take_work(&self) -> Option<Work<T>> {
        match &mut *self.shared.slot.lock() {
            Slot::Pending(work) => work.take(),
            _ => None,
        }
    }

    fn execute(&self, work: Work<T>) -> PromiseResult<()> {
        let settle = Settle {
            shared: &self.shared,
        };
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| work(&settle))) {
            Ok(Ok(())) if self.is_pending() => Some(PromiseError::StateNotSet.into()),
            Ok(Ok(())) => None,
            Ok(Err(rejection)) => Some(rejection),
            Err(payload) => Some(PromiseError::from_panic(&*payload).into()),
        };

        match failure {
            Some(rejection) => settle.reject(rejection),
            None => Ok(()),
        }
    }

    /// Blocks until settled, using this promise's default timeout.
    ///
    /// Returns `true` once settled, `false` if the timeout elapsed first.
    pub fn wait(&self) -> bool {
        self.wait_for(self.shared.timeout)
    }

    /// Blocks until settled or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_for(Some(timeout))
    }

    /// Blocks until settled; `None` waits forever.
    ///
    /// A lazy promise runs its work first, on the calling thread. A spawned
    /// promise has its worker thread joined once it settles. Timing out is
    /// not an error: the work may still settle the promise later.
    pub fn wait_for(&self, timeout: Option<Duration>) -> bool {
        if self.is_settled() {
            return true;
        }
        if self.shared.policy == Policy::Lazy {
            self.run_logged();
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let settled = {
            let mut slot = self.shared.slot.lock();
            while matches!(*slot, Slot::Pending(_)) {
                match deadline {
                    Some(deadline) => {
                        if self.shared.settled.wait_until(&mut slot, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.shared.settled.wait(&mut slot),
                }
            }
            !matches!(*slot, Slot::Pending(_))
        };

        if settled {
            self.join_worker();
        } else {
            trace!(policy = ?self.shared.policy, "Promise wait timed out");
        }
        settled
    }

    /// Rejects a still-pending promise without running its work function.
    ///
    /// Returns `false` if the promise had already settled.
    pub(crate) fn abandon(&self, error: Rejection) -> bool {
        self.shared.settle(Slot::Rejected(error), "reject").is_ok()
    }

    fn join_worker(&self) {
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Promise worker thread panicked");
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> PromiseState {
        self.shared.slot.lock().state()
    }

    /// Returns `true` while the promise has not settled.
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Returns `true` once resolved or rejected.
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// The policy this promise was created with.
    pub fn policy(&self) -> Policy {
        self.shared.policy
    }

    /// The default wait timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.timeout
    }

    /// The rejection, if the promise was rejected.
    pub fn rejection(&self) -> Option<Rejection> {
        match &*self.shared.slot.lock() {
            Slot::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// The settled outcome, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, Rejection>> {
        match &*self.shared.slot.lock() {
            Slot::Pending(_) => None,
            Slot::Resolved(value) => Some(Ok(value.clone())),
            Slot::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// The resolved value, if any.
    pub fn value(&self) -> Option<T> {
        match &*self.shared.slot.lock() {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Builds a chained promise from a continuation over the parent's outcome.
    ///
    /// This is the primitive the other combinators are built on. The child's
    /// work waits on `self` (rejecting with [`PromiseError::Timeout`] if that
    /// wait gives up), feeds the outcome to `step`, and settles according to
    /// the returned [`Next`].
    pub fn chain<U, F>(&self, options: ChainOptions, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Rejection>) -> Next<U> + Send + 'static,
    {
        let policy = options.policy.unwrap_or(match self.shared.policy {
            Policy::Immediate => Policy::Immediate,
            _ => Policy::Lazy,
        });
        let timeout = options.timeout.unwrap_or(self.shared.timeout);
        let parent = self.clone();

        Promise::with_timeout(policy, timeout, move |settle| {
            let outcome = parent.settled_outcome()?;
            match step(outcome) {
                Next::Value(value) => settle.resolve(value)?,
                Next::Fail(error) => settle.reject(error)?,
                Next::Defer(nested) => settle.complete(nested.settled_outcome()?)?,
            }
            Ok(())
        })
    }

    fn settled_outcome(&self) -> Result<Result<T, Rejection>, PromiseError> {
        if !self.wait() {
            return Err(PromiseError::Timeout);
        }
        self.result().ok_or(PromiseError::Timeout)
    }

    /// Continues with `on_resolve`; a rejection passes through unchanged.
    pub fn then<U, F>(&self, on_resolve: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Next<U> + Send + 'static,
    {
        self.chain(ChainOptions::new(), move |outcome| match outcome {
            Ok(value) => on_resolve(value),
            Err(error) => Next::Fail(error),
        })
    }

    /// Continues with `on_resolve` or `on_reject`.
    ///
    /// Whatever `on_reject` returns settles the child, so a plain value turns
    /// the rejection into a resolution.
    pub fn then_or<U, F, G>(&self, on_resolve: F, on_reject: G) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Next<U> + Send + 'static,
        G: FnOnce(Rejection) -> Next<U> + Send + 'static,
    {
        self.chain(ChainOptions::new(), move |outcome| match outcome {
            Ok(value) => on_resolve(value),
            Err(error) => on_reject(error),
        })
    }

    /// Transforms a resolved value; a rejection passes through unchanged.
    pub fn map<U, F>(&self, func: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Next::Value(func(value)))
    }

    /// Recovers from a rejection; a resolved value passes through unchanged.
    pub fn catch<G>(&self, on_reject: G) -> Promise<T>
    where
        G: FnOnce(Rejection) -> Next<T> + Send + 'static,
    {
        self.chain(ChainOptions::new(), move |outcome| match outcome {
            Ok(value) => Next::Value(value),
            Err(error) => on_reject(error),
        })
    }

    /// Resolves with the parent's outcome, whichever way it settled.
    ///
    /// This is `catch` with the identity recovery: used to observe a result
    /// without propagating its error.
    pub fn settled(&self) -> Promise<Result<T, Rejection>> {
        self.chain(ChainOptions::new(), Next::Value)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.shared.slot.lock().state())
            .field("policy", &self.shared.policy)
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}
