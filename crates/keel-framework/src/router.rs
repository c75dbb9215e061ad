//! Routing updates to commands.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::command::{Command, Dispatched};
use crate::context::BotContext;
use crate::inbound::Inbound;

/// The command name of `/name@bot args`, without slash or bot name.
///
/// Returns `None` if `text` is not a command.
pub fn command_name(text: &str) -> Option<&str> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    (!name.is_empty()).then_some(name)
}

/// The text after the command word, trimmed.
///
/// Text that is not a command is returned trimmed.
pub fn command_args(text: &str) -> &str {
    match text.strip_prefix('/') {
        Some(rest) => rest
            .find(char::is_whitespace)
            .map_or("", |end| rest[end..].trim()),
        None => text.trim(),
    }
}

/// Returns `false` if `text` is a `/command@name` addressed to a bot other
/// than `username`.
///
/// Commands without a bot name match every bot. The comparison is
/// case-sensitive.
pub fn match_command_user(text: &str, username: Option<&str>) -> bool {
    let Some(rest) = text.strip_prefix('/') else {
        return true;
    };
    let word = rest.split_whitespace().next().unwrap_or_default();
    match word.split_once('@') {
        Some((name, target)) if !name.is_empty() && !target.is_empty() => {
            username == Some(target)
        }
        _ => true,
    }
}

/// Maps updates to the commands that handle them.
///
/// Messages starting with `/name` go to the command registered as `name`.
/// Button presses go to the callback command, other messages to the
/// fallback.
#[derive(Debug, Clone, Default)]
pub struct Router {
    commands: HashMap<String, Command>,
    callback: Option<Command>,
    fallback: Option<Command>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command under its name.
    pub fn command(mut self, command: Command) -> Self {
        self.commands.insert(command.name().to_string(), command);
        self
    }

    /// Sets the command handling button presses.
    pub fn callback(mut self, command: Command) -> Self {
        self.callback = Some(command);
        self
    }

    /// Sets the command handling messages that are not commands.
    pub fn fallback(mut self, command: Command) -> Self {
        self.fallback = Some(command);
        self
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no command is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The command an update would be routed to.
    pub fn route(&self, inbound: &dyn Inbound) -> Option<&Command> {
        if inbound.is_callback() {
            return self.callback.as_ref();
        }
        let text = inbound.text()?;
        match command_name(text) {
            Some(name) => self.commands.get(name),
            None => self.fallback.as_ref(),
        }
    }

    /// Handles one update on the calling thread.
    ///
    /// Returns `None` if no command matches.
    pub fn dispatch(&self, ctx: &BotContext, inbound: Arc<dyn Inbound>) -> Option<Dispatched> {
        let Some(command) = self.route(&*inbound) else {
            debug!(text = ?inbound.text(), "No route for update");
            return None;
        };
        Some(ctx.handle(command, inbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Outcome;
    use crate::render::ReplyKind;
    use crate::testing::{RecordingInbound, Sent};
    use keel_core::{Dispatcher, PromiseState};
    use std::thread;

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("/echo hello"), Some("echo"));
        assert_eq!(command_name("/echo@keelbot hello"), Some("echo"));
        assert_eq!(command_name("/echo"), Some("echo"));
        assert_eq!(command_name("echo"), None);
        assert_eq!(command_name("/"), None);
        assert_eq!(command_name("/@keelbot"), None);
    }

    #[test]
    fn test_command_args() {
        assert_eq!(command_args("/echo  hello world "), "hello world");
        assert_eq!(command_args("/echo@keelbot hi"), "hi");
        assert_eq!(command_args("/echo"), "");
        assert_eq!(command_args(" plain text "), "plain text");
    }

    #[test]
    fn test_match_command_user() {
        let cases = [
            ("/cmd", Some("keelbot"), true),
            ("/cmd args", None, true),
            ("/cmd@keelbot", Some("keelbot"), true),
            ("/cmd@keelbot args", Some("keelbot"), true),
            ("/cmd@KeelBot", Some("keelbot"), false),
            ("/cmd@otherbot args", Some("keelbot"), false),
            ("/cmd@keelbot", None, false),
            ("hello @keelbot", Some("keelbot"), true),
        ];
        for (text, username, expected) in cases {
            assert_eq!(match_command_user(text, username), expected, "{text}");
        }
    }

    #[test]
    fn test_router_dispatch() {
        let dispatcher = std::sync::Arc::new(Dispatcher::new());
        let driver = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run())
        };
        let ctx = BotContext::new(dispatcher.queue());

        let reply = |name: &'static str| {
            Command::new(name, ReplyKind::Text, move |_ctx, _inbound| {
                Ok(Outcome::value(name))
            })
        };
        let router = Router::new()
            .command(reply("ping"))
            .callback(Command::new("pick", ReplyKind::SetOption, |_ctx, inbound| {
                Ok(Outcome::value(format!("picked {}", inbound.text().unwrap_or_default())))
            }))
            .fallback(reply("chat"));
        assert_eq!(router.len(), 1);

        let run = |inbound: RecordingInbound| {
            let inbound = Arc::new(inbound);
            let dispatched = router.dispatch(&ctx, inbound.clone());
            (dispatched, inbound.sent())
        };

        let (dispatched, sent) = run(RecordingInbound::message("/ping"));
        assert_eq!(dispatched, Some(Dispatched::Completed(PromiseState::Resolved)));
        assert_eq!(sent, vec![Sent::text("ping", true)]);

        let (_, sent) = run(RecordingInbound::message("hello"));
        assert_eq!(sent, vec![Sent::text("chat", true)]);

        let (_, sent) = run(RecordingInbound::callback("b"));
        assert_eq!(sent, vec![Sent::edit("picked b")]);

        let (dispatched, sent) = run(RecordingInbound::message("/unknown"));
        assert_eq!(dispatched, None);
        assert!(sent.is_empty());

        dispatcher.stop();
        driver.join().unwrap();
    }
}
