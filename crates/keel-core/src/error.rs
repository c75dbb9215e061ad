//! Error types shared by promises and the work queue.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::promise::PromiseState;

// =============================================================================
// Promise Errors
// =============================================================================

/// Errors raised by the promise machinery itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromiseError {
    /// `resolve`/`reject` was called on a promise that already settled.
    #[error("{op}: not pending ({state})")]
    NotPending {
        /// The operation that was attempted.
        op: &'static str,
        /// The state the promise was in.
        state: PromiseState,
    },

    /// The work function returned without resolving or rejecting.
    #[error("work function returned without settling the promise")]
    StateNotSet,

    /// Waiting on a promise this one depends on exceeded its deadline.
    #[error("promise timed out")]
    Timeout,

    /// The work function (or a continuation) panicked.
    #[error("work function panicked: {0}")]
    Panicked(String),
}

impl PromiseError {
    /// Builds a [`PromiseError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Result type for promise state transitions.
pub type PromiseResult<T> = Result<T, PromiseError>;

// =============================================================================
// Rejection
// =============================================================================

/// The value a promise is rejected with.
///
/// Any `std::error::Error + Send + Sync + 'static` converts into a `Rejection`
/// and keeps its concrete type, so downstream code can inspect it with
/// [`downcast_ref`](Self::downcast_ref). Cloning is cheap: the error is shared.
///
/// `Rejection` intentionally does not implement `Error` itself, which keeps the
/// blanket `From<E: Error>` conversion coherent (the same trade-off `anyhow`
/// makes).
#[derive(Clone)]
pub struct Rejection {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl Rejection {
    /// Wraps an error value.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Creates a rejection carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Returns the underlying error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Returns `true` if the underlying error is of type `E`.
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.inner.is::<E>()
    }

    /// Returns the underlying [`PromiseError`], if this rejection came from
    /// the promise machinery.
    pub fn as_promise_error(&self) -> Option<&PromiseError> {
        self.downcast_ref::<PromiseError>()
    }

    /// Returns `true` if this rejection is a [`PromiseError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self.as_promise_error(), Some(PromiseError::Timeout))
    }

    /// Returns `true` if both rejections share the same error allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<E> From<E> for Rejection
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl AsRef<dyn StdError + Send + Sync + 'static> for Rejection {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

/// Plain-message error backing [`Rejection::msg`].
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors that can occur when handing work to the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The dispatch loop has shut down and no longer accepts work.
    #[error("dispatch loop is stopped")]
    Stopped,
}

/// Result type for work-queue operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
