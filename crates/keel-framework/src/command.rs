//! The command envelope.
//!
//! A [`Command`] wraps a handler so that whatever it produces goes through the
//! work queue before being rendered:
//!
//! 1. `/cmd@otherbot` updates are skipped.
//! 2. The sender's permission is checked (through the queue).
//! 3. The handler runs on the calling worker thread and returns an
//!    [`Outcome`]: nothing, a ready [`Reply`], work to run on the dispatch
//!    loop, or a promise already in flight.
//! 4. The outcome becomes a promise, is enqueued, and the worker blocks until
//!    it settles.
//! 5. The command's [`ReplyKind`] renders the value or the rejection.
//!
//! ```rust,ignore
//! use keel_framework::{Command, Outcome, Reply, ReplyKind};
//!
//! let echo = Command::new("echo", ReplyKind::Text, |_ctx, inbound| {
//!     let args = keel_framework::command_args(inbound.text().unwrap_or_default());
//!     Ok(Outcome::value(args))
//! });
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use keel_core::{ChainOptions, Next, Policy, Promise, PromiseError, PromiseState, Rejection};
use tracing::{error, info, warn};

use crate::context::BotContext;
use crate::error::CommandResult;
use crate::inbound::{Inbound, SendOptions};
use crate::permission::{Permission, check_permission};
use crate::render::{ReplyKind, error_text};
use crate::reply::Reply;
use crate::router::match_command_user;

/// Reply sent to users who lack the required permission.
pub const PERMISSION_DENIED: &str = "permission denied";

/// Deferred work producing a reply.
pub type Work = Box<dyn FnOnce() -> Result<Reply, Rejection> + Send + 'static>;

/// What a handler hands back to the envelope.
pub enum Outcome {
    /// No reply at all.
    Nothing,
    /// A reply that is ready now.
    Value(Reply),
    /// Work to run on the dispatch loop, producing the reply.
    Work(Work),
    /// A promise already in flight.
    Deferred(Promise<Reply>),
}

impl Outcome {
    /// A ready reply.
    pub fn value(reply: impl Into<Reply>) -> Self {
        Self::Value(reply.into())
    }

    /// Work to run on the dispatch loop.
    pub fn work<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<Reply, Rejection> + Send + 'static,
    {
        Self::Work(Box::new(work))
    }

    fn into_promise(self, ctx: &BotContext) -> Option<Promise<Reply>> {
        let timeout = ctx.default_timeout();
        match self {
            Self::Nothing => None,
            Self::Value(reply) => Some(Promise::with_timeout(
                Policy::Manual,
                timeout,
                move |settle| Ok(settle.resolve(reply)?),
            )),
            Self::Work(work) => Some(Promise::with_timeout(
                Policy::Manual,
                timeout,
                move |settle| Ok(settle.complete(work())?),
            )),
            Self::Deferred(promise) => Some(promise),
        }
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Self::Value(reply)
    }
}

impl From<Promise<Reply>> for Outcome {
    fn from(promise: Promise<Reply>) -> Self {
        Self::Deferred(promise)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("Nothing"),
            Self::Value(reply) => f.debug_tuple("Value").field(reply).finish(),
            Self::Work(_) => f.write_str("Work(..)"),
            Self::Deferred(promise) => f.debug_tuple("Deferred").field(promise).finish(),
        }
    }
}

/// How an update went through the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Addressed to another bot.
    Skipped,
    /// The bot is stopping; nothing was done.
    Stopped,
    /// The sender lacks permission.
    Denied,
    /// The handler returned an error or panicked; its message was replied.
    HandlerFailed,
    /// The handler produced nothing.
    Empty,
    /// The outcome settled in the given state and was rendered.
    Completed(PromiseState),
    /// The outcome did not settle in time; a timeout error was rendered.
    TimedOut,
}

type Handler = dyn Fn(&BotContext, &Arc<dyn Inbound>) -> CommandResult<Outcome> + Send + Sync;

/// A named handler with its reply kind and required permission.
#[derive(Clone)]
pub struct Command {
    name: Arc<str>,
    kind: ReplyKind,
    permission: Option<Permission>,
    handler: Arc<Handler>,
}

impl Command {
    /// Creates a command open to everyone.
    pub fn new<F>(name: impl Into<Arc<str>>, kind: ReplyKind, handler: F) -> Self
    where
        F: Fn(&BotContext, &Arc<dyn Inbound>) -> CommandResult<Outcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            permission: None,
            handler: Arc::new(handler),
        }
    }

    /// Requires at least `permission` to run.
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    /// The command name, without the leading slash.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reply kind.
    pub fn kind(&self) -> ReplyKind {
        self.kind
    }

    /// The required permission, if any.
    pub fn required_permission(&self) -> Option<Permission> {
        self.permission
    }

    /// Runs the command for one update on the calling thread.
    ///
    /// Blocks until the outcome has been run by the dispatch loop and
    /// rendered.
    pub fn invoke(&self, ctx: &BotContext, inbound: &Arc<dyn Inbound>) -> Dispatched {
        info!(command = %self.name, "Command");
        let target = &**inbound;

        if !target.is_callback() {
            if let Some(text) = target.text() {
                if !match_command_user(text, ctx.bot_username()) {
                    info!(command = %self.name, text, "Addressed to another bot");
                    return Dispatched::Skipped;
                }
            }

            let verdict = check_permission(
                ctx.queue(),
                ctx.permission_store(),
                target.sender(),
                self.permission,
                ctx.default_timeout(),
            );
            if !verdict.allowed {
                warn!(command = %self.name, sender = ?target.sender(), "Permission denied");
                if verdict.reply {
                    self.send_error(target, PERMISSION_DENIED);
                }
                return Dispatched::Denied;
            }
        }

        let handled = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(ctx, inbound)));
        let outcome = match handled {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.send_error(target, e.message());
                return Dispatched::HandlerFailed;
            }
            Err(payload) => {
                let e = Rejection::from(PromiseError::from_panic(&*payload));
                error!(command = %self.name, error = %e, "Command handler panicked");
                self.send_error(target, &error_text(&e));
                return Dispatched::HandlerFailed;
            }
        };

        let Some(promise) = outcome.into_promise(ctx) else {
            info!(command = %self.name, "No command");
            return Dispatched::Empty;
        };
        if let Err(e) = ctx.queue().enqueue(&promise) {
            warn!(command = %self.name, error = %e, "Command not queued");
            self.render(target, &Err(e.into()));
            return Dispatched::Stopped;
        }

        let kind = self.kind;
        let name = Arc::clone(&self.name);
        let render_target = Arc::clone(inbound);
        let rendered = promise.chain(ChainOptions::new(), move |outcome| {
            let state = match &outcome {
                Ok(_) => PromiseState::Resolved,
                Err(e) => {
                    warn!(command = %name, error = %e, "Command rejected");
                    PromiseState::Rejected
                }
            };
            if let Err(e) = kind.render(&*render_target, &outcome) {
                error!(command = %name, error = %e, "Failed to render reply");
            }
            Next::Value(state)
        });

        rendered.wait();
        match rendered.result() {
            Some(Ok(state)) => Dispatched::Completed(state),
            Some(Err(e)) if e.is_timeout() => {
                warn!(command = %self.name, "Command timed out");
                self.render(target, &Err(e));
                Dispatched::TimedOut
            }
            Some(Err(e)) => {
                error!(command = %self.name, error = %e, "Rendering failed");
                Dispatched::Completed(PromiseState::Rejected)
            }
            None => Dispatched::TimedOut,
        }
    }

    fn render(&self, target: &dyn Inbound, outcome: &Result<Reply, Rejection>) {
        if let Err(e) = self.kind.render(target, outcome) {
            error!(command = %self.name, error = %e, "Failed to render reply");
        }
    }

    fn send_error(&self, target: &dyn Inbound, message: &str) {
        if let Err(e) = target.reply_text(message, &SendOptions::quoted(true)) {
            error!(command = %self.name, error = %e, "Failed to send error reply");
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("permission", &self.permission)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UpdateLogger;
    use crate::error::CommandError;
    use crate::permission::MemoryPermissions;
    use crate::testing::{RecordingInbound, Sent};
    use keel_core::Dispatcher;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        driver: Option<thread::JoinHandle<usize>>,
        ctx: BotContext,
    }

    impl Harness {
        fn new() -> Self {
            let dispatcher = Arc::new(Dispatcher::new());
            let driver = {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || dispatcher.run())
            };
            let ctx = BotContext::new(dispatcher.queue()).username("keelbot");
            Self {
                dispatcher,
                driver: Some(driver),
                ctx,
            }
        }

        fn run(&self, command: &Command, inbound: RecordingInbound) -> (Dispatched, Vec<Sent>) {
            let inbound = Arc::new(inbound);
            let dyn_inbound: Arc<dyn Inbound> = inbound.clone();
            let dispatched = self.ctx.handle(command, dyn_inbound);
            (dispatched, inbound.sent())
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.dispatcher.stop();
            if let Some(driver) = self.driver.take() {
                let _ = driver.join();
            }
        }
    }

    fn echo() -> Command {
        Command::new("echo", ReplyKind::Text, |_ctx, inbound| {
            let text = inbound.text().unwrap_or_default();
            Ok(Outcome::value(crate::router::command_args(text)))
        })
    }

    #[test]
    fn test_value_outcome_is_rendered() {
        let harness = Harness::new();
        let (dispatched, sent) = harness.run(&echo(), RecordingInbound::message("/echo hello"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
        assert_eq!(sent, vec![Sent::text("hello", true)]);
        assert_eq!(harness.dispatcher.stats().processed, 1);
    }

    #[test]
    fn test_other_bot_is_skipped() {
        let harness = Harness::new();
        let (dispatched, sent) =
            harness.run(&echo(), RecordingInbound::message("/echo@otherbot hi"));
        assert_eq!(dispatched, Dispatched::Skipped);
        assert!(sent.is_empty());

        let (dispatched, _) = harness.run(&echo(), RecordingInbound::message("/echo@keelbot hi"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
    }

    #[test]
    fn test_work_runs_on_dispatch_thread() {
        let harness = Harness::new();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        let command = Command::new("where", ReplyKind::Text, move |_ctx, _inbound| {
            let slot = Arc::clone(&slot);
            Ok(Outcome::work(move || {
                *slot.lock() = Some(thread::current().id());
                Ok(Reply::new("done"))
            }))
        });

        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/where"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
        assert_eq!(sent, vec![Sent::text("done", true)]);
        let worker = *ran_on.lock();
        assert_ne!(worker.expect("work did not run"), caller);
    }

    #[test]
    fn test_rejected_work_renders_error() {
        let harness = Harness::new();
        let command = Command::new("fail", ReplyKind::Text, |_ctx, _inbound| {
            Ok(Outcome::work(|| Err(CommandError::new("no such page").into())))
        });
        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/fail"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Rejected));
        assert_eq!(sent, vec![Sent::text("no such page", true)]);
    }

    #[test]
    fn test_handler_error_is_replied_without_queueing() {
        let harness = Harness::new();
        let command = Command::new("bad", ReplyKind::Text, |_ctx, _inbound| {
            Err(CommandError::new("missing command argument"))
        });
        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/bad"));
        assert_eq!(dispatched, Dispatched::HandlerFailed);
        assert_eq!(sent, vec![Sent::text("missing command argument", true)]);
        assert_eq!(harness.dispatcher.stats().processed, 0);
    }

    #[test]
    fn test_handler_panic_is_replied() {
        let harness = Harness::new();
        let command = Command::new("boom", ReplyKind::Text, |_ctx, _inbound| panic!("boom"));
        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/boom"));
        assert_eq!(dispatched, Dispatched::HandlerFailed);
        assert_eq!(
            sent,
            vec![Sent::text(
                &format!("{:?}", PromiseError::Panicked("boom".into())),
                true
            )]
        );
    }

    #[test]
    fn test_nothing_is_not_queued() {
        let harness = Harness::new();
        let command = Command::new("noop", ReplyKind::Text, |_ctx, _inbound| Ok(Outcome::Nothing));
        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/noop"));
        assert_eq!(dispatched, Dispatched::Empty);
        assert!(sent.is_empty());
        assert_eq!(harness.dispatcher.stats().processed, 0);
    }

    #[test]
    fn test_deferred_promise() {
        let harness = Harness::new();
        let loop_thread = harness.driver.as_ref().unwrap().thread().id();
        for _ in 0..10 {
            let ran_on = Arc::new(Mutex::new(None));
            let slot = Arc::clone(&ran_on);
            let command = Command::new("slow", ReplyKind::Text, move |_ctx, _inbound| {
                let slot = Arc::clone(&slot);
                Ok(Promise::spawned(move |settle| {
                    *slot.lock() = Some(thread::current().id());
                    thread::sleep(Duration::from_millis(20));
                    Ok(settle.resolve(Reply::new("finally"))?)
                })
                .into())
            });
            let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/slow"));
            assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
            assert_eq!(sent, vec![Sent::text("finally", true)]);

            let worker = ran_on.lock().expect("work ran");
            assert_ne!(worker, loop_thread);
            assert_ne!(worker, thread::current().id());
        }
    }

    #[test]
    fn test_timeout_renders_error() {
        let harness = Harness::new();
        let command = Command::new("never", ReplyKind::Text, |_ctx, _inbound| {
            Ok(Promise::<Reply>::with_timeout(
                Policy::Spawned,
                Some(Duration::from_millis(10)),
                |settle| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(settle.resolve(Reply::new("too late"))?)
                },
            )
            .into())
        });
        let (dispatched, sent) = harness.run(&command, RecordingInbound::message("/never"));
        assert_eq!(dispatched, Dispatched::TimedOut);
        assert_eq!(sent, vec![Sent::text("timed out", true)]);
    }

    #[test]
    fn test_permission_denied() {
        let mut harness = Harness::new();
        let store = MemoryPermissions::new(Permission::User)
            .with(1, Permission::Admin)
            .with(2, Permission::Banned)
            .with(3, Permission::Ignored);
        harness.ctx = harness.ctx.clone().permissions(Arc::new(store));
        let admin_only = echo().permission(Permission::Admin);

        let (dispatched, sent) =
            harness.run(&admin_only, RecordingInbound::message("/echo hi").from_user(Some(1)));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
        assert_eq!(sent, vec![Sent::text("hi", true)]);

        let (dispatched, sent) =
            harness.run(&admin_only, RecordingInbound::message("/echo hi").from_user(Some(2)));
        assert_eq!(dispatched, Dispatched::Denied);
        assert_eq!(sent, vec![Sent::text(PERMISSION_DENIED, true)]);

        let (dispatched, sent) =
            harness.run(&admin_only, RecordingInbound::message("/echo hi").from_user(Some(3)));
        assert_eq!(dispatched, Dispatched::Denied);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_update_logger_and_stop() {
        struct Learn(Mutex<Vec<String>>);

        impl UpdateLogger for Learn {
            fn log_update(&self, inbound: &dyn Inbound) -> Result<(), Rejection> {
                let text = inbound.text().unwrap_or_default().to_string();
                if text.contains("unlearnable") {
                    return Err(Rejection::msg("cannot learn"));
                }
                self.0.lock().push(text);
                Ok(())
            }
        }

        let mut harness = Harness::new();
        let learn = Arc::new(Learn(Mutex::new(Vec::new())));
        harness.ctx = harness.ctx.clone().update_logger(learn.clone());

        let (dispatched, _) = harness.run(&echo(), RecordingInbound::message("/echo a"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
        let (dispatched, _) = harness.run(&echo(), RecordingInbound::message("/echo unlearnable"));
        assert_eq!(dispatched, Dispatched::Completed(PromiseState::Resolved));
        assert_eq!(*learn.0.lock(), vec!["/echo a".to_string()]);

        harness.dispatcher.stop();
        if let Some(driver) = harness.driver.take() {
            driver.join().unwrap();
        }
        let (dispatched, sent) = harness.run(&echo(), RecordingInbound::message("/echo b"));
        assert_eq!(dispatched, Dispatched::Stopped);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_concurrent_commands_are_serialized() {
        let harness = Harness::new();
        let counter = Arc::new(Mutex::new(0_u32));
        let shared = Arc::clone(&counter);
        let command = Command::new("count", ReplyKind::Text, move |_ctx, _inbound| {
            let shared = Arc::clone(&shared);
            Ok(Outcome::work(move || {
                let current = *shared.lock();
                thread::sleep(Duration::from_millis(2));
                *shared.lock() = current + 1;
                Ok(Reply::new((current + 1).to_string()))
            }))
        });

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let ctx = harness.ctx.clone();
                let command = command.clone();
                thread::spawn(move || {
                    let inbound: Arc<dyn Inbound> = Arc::new(RecordingInbound::message("/count"));
                    ctx.handle(&command, inbound)
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(
                worker.join().unwrap(),
                Dispatched::Completed(PromiseState::Resolved)
            );
        }
        assert_eq!(*counter.lock(), 8);
    }
}
