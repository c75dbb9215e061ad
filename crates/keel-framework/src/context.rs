//! Shared state handed to every command invocation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{Next, Policy, Promise, Rejection, WorkQueue};
use tracing::{debug, error, info};

use crate::command::{Command, Dispatched};
use crate::inbound::Inbound;
use crate::permission::PermissionStore;

/// Records every update before it is handled (for example to learn from it).
///
/// Runs on the dispatch loop thread, one update at a time.
pub trait UpdateLogger: Send + Sync {
    /// Records one update.
    fn log_update(&self, inbound: &dyn Inbound) -> Result<(), Rejection>;
}

/// Everything a command needs besides the update itself.
///
/// Cheap to clone; every worker thread gets its own copy.
#[derive(Clone)]
pub struct BotContext {
    queue: WorkQueue,
    username: Option<Arc<str>>,
    timeout: Option<Duration>,
    permissions: Option<Arc<dyn PermissionStore>>,
    update_logger: Option<Arc<dyn UpdateLogger>>,
}

impl BotContext {
    /// Creates a context producing work onto `queue`.
    pub fn new(queue: WorkQueue) -> Self {
        Self {
            queue,
            username: None,
            timeout: None,
            permissions: None,
            update_logger: None,
        }
    }

    /// Sets the bot's username, used to match `/command@username`.
    pub fn username(mut self, username: impl Into<Arc<str>>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the default timeout of the promises commands enqueue.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the store permission checks consult.
    pub fn permissions(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permissions = Some(store);
        self
    }

    /// Sets the hook run on every update before it is handled.
    pub fn update_logger(mut self, logger: Arc<dyn UpdateLogger>) -> Self {
        self.update_logger = Some(logger);
        self
    }

    /// The work queue commands enqueue onto.
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// The bot's username, if known.
    pub fn bot_username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Default timeout of enqueued promises.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The permission store, if any.
    pub fn permission_store(&self) -> Option<&Arc<dyn PermissionStore>> {
        self.permissions.as_ref()
    }

    /// Returns `true` once the bot is stopping.
    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }

    /// Creates a manual promise with this context's default timeout and
    /// enqueues it.
    ///
    /// This is how handler code routes a side effect through the dispatch
    /// loop. The returned promise is already queued; wait on it or return it
    /// from the handler.
    pub fn enqueue<T, F>(&self, work: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, Rejection> + Send + 'static,
    {
        let promise = Promise::with_timeout(Policy::Manual, self.timeout, move |settle| {
            Ok(settle.complete(work())?)
        });
        if let Err(e) = self.queue.enqueue(&promise) {
            debug!(error = %e, "Work not queued");
            return Promise::rejected(e);
        }
        promise
    }

    /// Handles one update with `command`.
    ///
    /// The update is first passed to the update logger through the queue.
    /// Nothing is handled once the bot is stopping.
    pub fn handle(&self, command: &Command, inbound: Arc<dyn Inbound>) -> Dispatched {
        debug!(
            command = command.name(),
            sender = ?inbound.sender(),
            text = ?inbound.text(),
            callback = inbound.is_callback(),
            "Update"
        );
        self.log_update(&inbound);
        if self.is_stopped() {
            info!("Not handling updates: stopped");
            return Dispatched::Stopped;
        }
        command.invoke(self, &inbound)
    }

    fn log_update(&self, inbound: &Arc<dyn Inbound>) {
        let Some(logger) = &self.update_logger else {
            return;
        };
        let logger = Arc::clone(logger);
        let update = Arc::clone(inbound);
        let sender = inbound.sender();
        self.enqueue(move || logger.log_update(&*update))
            .catch(move |e| {
                error!(sender = ?sender, error = %e, "Failed to log update");
                Next::Value(())
            })
            .wait();
    }
}

impl fmt::Debug for BotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotContext")
            .field("queue", &self.queue)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("permissions", &self.permissions.is_some())
            .field("update_logger", &self.update_logger.is_some())
            .finish()
    }
}
