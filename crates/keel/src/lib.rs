//! # keel
//!
//! A bot framework in which every side effect (database access, state
//! changes, API calls a handler wants ordered) runs on one dispatch thread,
//! while updates are handled concurrently on worker threads.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   enqueue    ┌────────────┐   run one   ┌────────────┐
//! │ Updater  │──▶│ worker      │─────────────▶│ WorkQueue  │────────────▶│ dispatch   │
//! │ (SDK)    │──▶│ threads     │◀─────────────│ (FIFO)     │  at a time  │ loop       │
//! └──────────┘   └─────────────┘  wait/render └────────────┘             └────────────┘
//! ```
//!
//! - **Promise**: a unit of work with one-shot settlement, chainable with
//!   `then`/`catch`
//! - **Dispatcher**: drains the queue in FIFO order on its own thread
//! - **Command**: runs a handler on the worker thread, enqueues its result and
//!   renders the reply once settled
//! - **Runtime**: owns the dispatch thread, config and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel::prelude::*;
//!
//! let runtime = KeelRuntime::new();
//! let ctx = runtime.bot_context();
//! let router = Router::new().command(Command::new("echo", ReplyKind::Text, |_ctx, inbound| {
//!     Ok(Outcome::value(command_args(inbound.text().unwrap_or_default())))
//! }));
//!
//! // For each update, on its own thread:
//! router.dispatch(&ctx, update);
//!
//! runtime.run_until_signal()?;
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): `keel.toml` configuration files
//! - `yaml-config`: `keel.yaml` configuration files
//! - `json-log`: JSON log output

pub use keel_core as core;
pub use keel_framework as framework;
pub use keel_runtime as runtime;

/// Commonly used types for building a bot:
///
/// ```rust,ignore
/// use keel::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use keel_runtime::{KeelConfig, KeelRuntime, RuntimeError};

    // Promises and the queue
    pub use keel_core::{Next, Policy, Promise, PromiseError, PromiseState, Rejection, WorkQueue};

    // Commands and replies
    pub use keel_framework::{
        BotContext, Button, Command, CommandError, Dispatched, Inbound, Keyboard, Outcome,
        ParseMode, Permission, PermissionStore, RenderResult, Reply, ReplyKind, Router,
        SendOptions, command_args,
    };

    // Logging macros
    pub use keel_runtime::prelude::*;
}
