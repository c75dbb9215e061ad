//! keel runtime: lifecycle, configuration and logging.
//!
//! This crate provides:
//! - [`KeelRuntime`]: spawns the dispatch loop thread, hands out
//!   [`BotContext`](keel_framework::BotContext)s, stops on Ctrl+C/SIGTERM
//!   with a drain of the queue and shutdown hooks
//! - Layered configuration ([`KeelConfig`], [`ConfigLoader`]) from files,
//!   `KEEL_*` environment variables and code
//! - Logging setup ([`LoggingBuilder`])
//!
//! ```rust,ignore
//! use keel_runtime::KeelRuntime;
//!
//! fn main() -> anyhow::Result<()> {
//!     let runtime = KeelRuntime::new();
//!     let ctx = runtime.bot_context();
//!     runtime.on_shutdown(|| save_state());
//!
//!     start_updater(ctx);
//!     runtime.run_until_signal()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, KeelConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{KeelRuntime, RuntimeBuilder, RuntimeStats};

// Re-export tracing for use by bot crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and the `instrument` attribute.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
