//! # Keel Framework
//!
//! Command handling on top of the keel work queue.
//!
//! This layer provides:
//! - The command envelope ([`Command`], [`Outcome`]): every command's result
//!   goes through the work queue and is rendered once it settles
//! - Reply rendering strategies selected by [`ReplyKind`]
//! - Permission checks ([`Permission`], [`PermissionStore`])
//! - The [`Inbound`] trait a messaging SDK implements
//! - Routing of updates to commands ([`Router`])

pub mod command;
pub mod context;
pub mod error;
pub mod inbound;
pub mod permission;
pub mod render;
pub mod reply;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{Command, Dispatched, Outcome, PERMISSION_DENIED, Work};
pub use context::{BotContext, UpdateLogger};
pub use error::{CommandError, CommandResult, RenderError, RenderResult};
pub use inbound::{Button, Inbound, Keyboard, ParseMode, SendOptions};
pub use permission::{MemoryPermissions, Permission, PermissionStore, Verdict, check_permission};
pub use render::{MAX_PAGE_BUTTONS, RenderStrategy, ReplyKind, error_text, page_buttons};
pub use reply::Reply;
pub use router::{Router, command_args, command_name, match_command_user};
