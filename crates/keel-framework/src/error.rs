//! Error types for the keel framework.

use thiserror::Error;

/// A user-facing command failure.
///
/// Its message is shown verbatim in the reply, unlike other rejections which
/// are rendered through their `Debug` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    /// Creates a command error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message shown to the user.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Result type for command handlers.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors reported by an [`Inbound`](crate::Inbound) when delivering a reply.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The message could not be delivered.
    #[error("failed to send reply: {0}")]
    Send(String),

    /// The reply needs something the inbound message cannot provide, such as
    /// editing a message that did not come from a button.
    #[error("unsupported reply: {0}")]
    Unsupported(&'static str),
}

/// Result type for reply delivery.
pub type RenderResult<T> = Result<T, RenderError>;
