//! # Keel Core
//!
//! The execution primitives of the keel bot framework.
//!
//! ## Promises
//!
//! A [`Promise`] is a single-assignment cell settled by a work function. Its
//! [`Policy`] decides when that function runs: immediately, lazily on first
//! wait, on a dedicated thread, or only when driven externally. Promises chain
//! with [`Promise::then`], [`Promise::catch`] and [`Promise::chain`]; a
//! continuation may return another promise, which the chained promise waits on
//! and adopts.
//!
//! Failures are carried as a [`Rejection`], a cheaply clonable wrapper around
//! any `std::error::Error` that keeps the concrete type for downcasting.
//!
//! ## Work queue
//!
//! Manual promises are handed to a [`WorkQueue`] and executed one at a time by
//! the [`Dispatcher`] loop:
//!
//! ```text
//! ┌──────────┐ enqueue  ┌───────────┐  run()  ┌────────────┐
//! │ worker 1 │────────▶│           │───────▶│            │
//! │ worker 2 │────────▶│ WorkQueue │        │ Dispatcher │
//! │ worker 3 │────────▶│  (FIFO)   │        │  (1 thread)│
//! └──────────┘  wait()  └───────────┘        └────────────┘
//! ```
//!
//! Workers block in [`Promise::wait`] until the dispatcher has run their
//! promise, so side effects routed through the queue never overlap.

pub mod error;
pub mod promise;
pub mod queue;

pub use error::{DispatchError, DispatchResult, PromiseError, PromiseResult, Rejection};
pub use promise::{ChainOptions, Next, Policy, Promise, PromiseState, Settle};
pub use queue::{DispatchStats, Dispatcher, Runnable, WorkQueue};
