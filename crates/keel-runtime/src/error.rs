//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The dispatch loop thread could not be spawned.
    #[error("Failed to spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// `start` was called while the runtime is running.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// `stop` was called on a runtime that is not running.
    #[error("Runtime is not running")]
    NotRunning,

    /// The runtime already ran and stopped; its queue is closed.
    #[error("Runtime has finished")]
    Finished,

    /// Listening for shutdown signals failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
