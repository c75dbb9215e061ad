//! Bot lifecycle: the dispatch loop thread, shutdown signals and hooks.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use keel_runtime::KeelRuntime;
//!
//! // Loads keel.toml from the current directory, or defaults
//! let runtime = KeelRuntime::new();
//! let ctx = runtime.bot_context();
//!
//! // Hand `ctx` to whatever receives updates, then
//! runtime.run_until_signal()?;
//! ```
//!
//! A runtime runs once: after [`KeelRuntime::stop`] its queue is closed and
//! every [`BotContext`] it produced rejects new work.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use keel_core::{DispatchStats, Dispatcher, PromiseError};
use keel_framework::BotContext;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, KeelConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

type ShutdownHook = Box<dyn FnOnce() + Send>;

enum State {
    Idle,
    Running(JoinHandle<usize>),
    Finished,
}

/// Counters of the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Items the loop ran.
    pub processed: u64,
    /// Items whose run failed at the loop level.
    pub failed: u64,
    /// Items queued and not yet run.
    pub pending: usize,
}

impl From<DispatchStats> for RuntimeStats {
    fn from(stats: DispatchStats) -> Self {
        Self {
            processed: stats.processed,
            failed: stats.failed,
            pending: stats.pending,
        }
    }
}

/// Owns the dispatch loop of one bot.
///
/// Worker threads get a [`BotContext`] from [`context`](Self::context) and
/// push their side effects onto the queue; the loop thread started by
/// [`start`](Self::start) runs them one at a time.
pub struct KeelRuntime {
    config: KeelConfig,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<State>,
    hooks: Mutex<Vec<ShutdownHook>>,
}

impl KeelRuntime {
    /// Creates a runtime from `keel.toml` in the current directory, falling
    /// back to defaults if it cannot be loaded.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                KeelConfig::default()
            });

        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from `config` and initializes logging.
    pub fn from_config(config: &KeelConfig) -> Self {
        logging::init_from_config(&config.logging);

        let dispatcher = Dispatcher::new().drain_on_stop(config.dispatch.drain_on_stop);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            username = ?config.bot.username,
            default_timeout_ms = ?config.dispatch.default_timeout_ms,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            dispatcher: Arc::new(dispatcher),
            state: Mutex::new(State::Idle),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// A context for producers, with the configured default timeout and the
    /// given bot username.
    pub fn context(&self, username: impl Into<Arc<str>>) -> BotContext {
        self.base_context().username(username)
    }

    /// A context for producers, with the username from `bot.username`.
    pub fn bot_context(&self) -> BotContext {
        match &self.config.bot.username {
            Some(username) => self.context(username.as_str()),
            None => self.base_context(),
        }
    }

    fn base_context(&self) -> BotContext {
        BotContext::new(self.dispatcher.queue()).timeout(self.config.dispatch.default_timeout())
    }

    /// Registers a hook run by [`stop`](Self::stop) after the queue drained.
    ///
    /// Hooks run in registration order on the thread calling `stop`. A
    /// panicking hook is logged and the remaining hooks still run.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.lock().push(Box::new(hook));
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    /// Returns `true` once a stop was requested, by [`stop`](Self::stop) or
    /// by a producer through its context's queue.
    pub fn is_stopped(&self) -> bool {
        self.dispatcher.is_stopped()
    }

    /// Snapshot of the dispatch loop counters.
    pub fn stats(&self) -> RuntimeStats {
        self.dispatcher.stats().into()
    }

    /// Spawns the dispatch loop thread.
    pub fn start(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        match *state {
            State::Running(_) => return Err(RuntimeError::AlreadyRunning),
            State::Finished => return Err(RuntimeError::Finished),
            State::Idle => {}
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = thread::Builder::new()
            .name(self.config.dispatch.thread_name.clone())
            .spawn(move || dispatcher.run())
            .map_err(RuntimeError::Spawn)?;
        *state = State::Running(handle);

        info!(thread = %self.config.dispatch.thread_name, "Runtime started");
        Ok(())
    }

    /// Stops the dispatch loop, waits for it to drain, then runs the
    /// shutdown hooks.
    pub fn stop(&self) -> RuntimeResult<()> {
        let handle = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Finished) {
                State::Running(handle) => handle,
                other => {
                    *state = other;
                    return Err(RuntimeError::NotRunning);
                }
            }
        };

        info!("Stopping keel runtime");
        self.dispatcher.stop();
        match handle.join() {
            Ok(drained) => debug!(drained, "Dispatch loop joined"),
            Err(payload) => {
                let e = PromiseError::from_panic(&*payload);
                error!(error = %e, "Dispatch loop panicked");
                // Whatever the loop left behind still gets settled.
                self.dispatcher.shutdown();
            }
        }

        self.run_shutdown_hooks();
        info!(stats = ?self.stats(), "Runtime stopped");
        Ok(())
    }

    fn run_shutdown_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        debug!(count = hooks.len(), "Running shutdown hooks");
        for hook in hooks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                let e = PromiseError::from_panic(&*payload);
                error!(error = %e, "Shutdown hook panicked");
            }
        }
    }

    /// Starts, blocks until Ctrl+C, SIGTERM or a stop requested through the
    /// queue, then stops.
    ///
    /// Must not be called from within an async runtime.
    pub fn run_until_signal(&self) -> RuntimeResult<()> {
        let signals = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RuntimeError::Signal)?;

        self.start()?;
        info!("keel runtime is now running. Press Ctrl+C to stop.");

        let waited = signals.block_on(self.wait_for_shutdown());
        let stopped = self.stop();
        waited?;
        stopped
    }

    /// Starts, runs `shutdown` on the calling thread, then stops.
    ///
    /// `shutdown` should block for as long as the bot is meant to run.
    pub fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: FnOnce(),
    {
        self.start()?;
        shutdown();
        self.stop()
    }

    async fn wait_for_shutdown(&self) -> RuntimeResult<()> {
        let stop_requested = self.dispatcher.queue().stop_token();

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .map_err(RuntimeError::Signal)?;

            tokio::select! {
                result = signal::ctrl_c() => {
                    result.map_err(RuntimeError::Signal)?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
                _ = stop_requested.cancelled() => {
                    info!("Stop requested, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result.map_err(RuntimeError::Signal)?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = stop_requested.cancelled() => {
                    info!("Stop requested, shutting down");
                }
            }
        }

        Ok(())
    }
}

impl Default for KeelRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeelRuntime {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Runtime dropped while running, stopping");
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for KeelRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeelRuntime")
            .field("running", &self.is_running())
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .field("hooks", &self.hooks.lock().len())
            .finish()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`KeelRuntime`] with custom configuration sources.
///
/// ```rust,ignore
/// let runtime = KeelRuntime::builder()
///     .config_file("config/keel.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables `KEEL_*` environment variables (default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables `KEEL_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a programmatic configuration over the defaults.
    pub fn merge(mut self, config: KeelConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and creates the runtime.
    pub fn build(self) -> ConfigResult<KeelRuntime> {
        let config = self.config_loader.load()?;
        Ok(KeelRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{PromiseState, Rejection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runtime() -> KeelRuntime {
        let mut config = KeelConfig::default();
        config.bot.username = Some("keelbot".to_string());
        config.dispatch.thread_name = "keel-test-dispatch".to_string();
        KeelRuntime::from_config(&config)
    }

    #[test]
    fn test_start_stop() {
        let runtime = runtime();
        assert!(!runtime.is_running());
        assert!(matches!(runtime.stop(), Err(RuntimeError::NotRunning)));

        runtime.start().unwrap();
        assert!(runtime.is_running());
        assert!(matches!(runtime.start(), Err(RuntimeError::AlreadyRunning)));

        runtime.stop().unwrap();
        assert!(!runtime.is_running());
        assert!(runtime.is_stopped());
        assert!(matches!(runtime.start(), Err(RuntimeError::Finished)));
        assert!(matches!(runtime.stop(), Err(RuntimeError::NotRunning)));
    }

    #[test]
    fn test_work_runs_on_dispatch_thread() {
        let runtime = runtime();
        runtime.start().unwrap();

        let ctx = runtime.bot_context();
        assert_eq!(ctx.bot_username(), Some("keelbot"));
        let name = ctx.enqueue(|| Ok(thread::current().name().map(str::to_string)));
        assert!(name.wait());
        assert_eq!(
            name.value().flatten().as_deref(),
            Some("keel-test-dispatch")
        );

        runtime.stop().unwrap();
        assert_eq!(runtime.stats().processed, 1);
    }

    #[test]
    fn test_stop_runs_queued_work_then_hooks() {
        let runtime = runtime();
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            runtime.on_shutdown(move || order.lock().push("save"));
        }
        runtime.on_shutdown(|| panic!("hook failed"));
        {
            let order = Arc::clone(&order);
            runtime.on_shutdown(move || order.lock().push("updaters"));
        }

        let ctx = runtime.bot_context();
        let queued: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                ctx.enqueue(move || {
                    order.lock().push("work");
                    Ok(i)
                })
            })
            .collect();

        runtime.run_until(|| {}).unwrap();

        assert!(queued.iter().all(|p| p.state() == PromiseState::Resolved));
        assert_eq!(
            *order.lock(),
            vec!["work", "work", "work", "save", "updaters"]
        );
        assert_eq!(runtime.stats(), RuntimeStats {
            processed: 3,
            failed: 0,
            pending: 0,
        });
    }

    #[test]
    fn test_stopped_runtime_rejects_work() {
        let runtime = runtime();
        let ctx = runtime.bot_context();
        runtime.run_until(|| {}).unwrap();

        assert!(ctx.is_stopped());
        let late = ctx.enqueue(|| Ok(()));
        assert_eq!(late.state(), PromiseState::Rejected);
        assert!(
            late.rejection()
                .is_some_and(|e| e.is::<keel_core::DispatchError>())
        );
    }

    #[test]
    fn test_producer_threads_share_the_loop() {
        let runtime = runtime();
        runtime.start().unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let ctx = runtime.context(format!("bot{i}"));
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    let done = ctx.enqueue(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Rejection>(())
                    });
                    done.wait()
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(count.load(Ordering::SeqCst), 4);

        runtime.stop().unwrap();
    }

    #[test]
    fn test_default_timeout_from_config() {
        let mut config = KeelConfig::default();
        config.dispatch.default_timeout_ms = Some(20);
        let runtime = KeelRuntime::from_config(&config);

        // The loop never starts, so the promise can only time out.
        let ctx = runtime.bot_context();
        assert_eq!(ctx.bot_username(), None);
        assert_eq!(ctx.default_timeout(), Some(Duration::from_millis(20)));
        let stuck = ctx.enqueue(|| Ok(()));
        assert!(!stuck.wait());
        assert_eq!(runtime.stats().pending, 1);
    }

    #[test]
    fn test_builder_loads_explicit_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "bot.toml",
                "[bot]\nusername = \"filebot\"\n\n[dispatch]\nthread_name = \"file-dispatch\"\n",
            )?;
            let runtime = KeelRuntime::builder()
                .config_file("bot.toml")
                .without_env()
                .build()
                .unwrap();
            assert_eq!(runtime.bot_context().bot_username(), Some("filebot"));
            assert_eq!(runtime.config().dispatch.thread_name, "file-dispatch");

            let missing = KeelRuntime::builder().config_file("nope.toml").build();
            assert!(missing.is_err());
            Ok(())
        });
    }
}
