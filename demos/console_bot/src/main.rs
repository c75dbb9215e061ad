//! Console Bot Example
//!
//! Every line typed on stdin is one update, handled on its own thread the
//! way a chat SDK's worker pool would. Side effects (the counter, the update
//! log, permission lookups) all run on the runtime's dispatch thread.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --username keelbot --timeout-ms 3000
//! ```
//!
//! Then type `/help`.

mod console;

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use keel::framework::{MemoryPermissions, UpdateLogger};
use keel::prelude::*;
use keel::runtime::ConfigLoader;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::console::ConsoleInbound;

const HELP: &str = "\
/echo <text>     echo text back
/count           bump a counter on the dispatch thread
/slow [secs]     reply after a delay, from its own thread
/page [n]        page n of 20 (turn with !<n>)
/pick            choose a color (answer with !red, !green or !blue)
/sticker         send a sticker
/fail            fail with a user-facing error
/admin           admins only (try `#7 /admin`)
/stats           updates seen and queue counters
/quit            stop the bot";

#[derive(Debug, Parser)]
#[command(about = "A keel bot driven from the terminal")]
struct Args {
    /// Configuration file (default: keel.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,

    /// Bot username, for `/command@username`
    #[arg(short, long)]
    username: Option<String>,

    /// Default command timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,
}

// ============================================================================
// Update log
// ============================================================================

/// Counts updates per sender. Runs on the dispatch thread.
#[derive(Debug, Default)]
struct LearnedUpdates {
    per_sender: Mutex<HashMap<i64, u64>>,
}

impl LearnedUpdates {
    fn total(&self) -> u64 {
        self.per_sender.lock().values().sum()
    }
}

impl UpdateLogger for LearnedUpdates {
    fn log_update(&self, inbound: &dyn Inbound) -> Result<(), Rejection> {
        let Some(sender) = inbound.sender() else {
            return Ok(());
        };
        *self.per_sender.lock().entry(sender).or_default() += 1;
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

fn args_of(inbound: &Arc<dyn Inbound>) -> String {
    command_args(inbound.text().unwrap_or_default()).to_string()
}

const PAGES: usize = 20;

fn page_reply(page: usize) -> Reply {
    let page = page.clamp(1, PAGES);
    Reply::new(format!("This is page {page}")).page(page, PAGES)
}

fn router(learned: Arc<LearnedUpdates>) -> Router {
    let counter = Arc::new(AtomicU64::new(0));

    Router::new()
        .command(Command::new("help", ReplyKind::Text, |_ctx, _inbound| {
            Ok(Outcome::value(HELP))
        }))
        .command(Command::new("echo", ReplyKind::Text, |_ctx, inbound| {
            Ok(Outcome::value(args_of(inbound)))
        }))
        .command(Command::new("count", ReplyKind::Text, move |_ctx, _inbound| {
            let counter = Arc::clone(&counter);
            Ok(Outcome::work(move || {
                let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(Reply::new(format!("count = {count}")))
            }))
        }))
        .command(Command::new("slow", ReplyKind::Text, |_ctx, inbound| {
            let args = args_of(inbound);
            let secs: u64 = if args.is_empty() {
                2
            } else {
                args.parse()
                    .map_err(|_| CommandError::new(format!("not a number of seconds: {args}")))?
            };
            Ok(Outcome::Deferred(Promise::spawned(move |settle| {
                thread::sleep(Duration::from_secs(secs));
                Ok(settle.resolve(Reply::new(format!("done after {secs}s")))?)
            })))
        }))
        .command(Command::new("page", ReplyKind::Paginated, |_ctx, inbound| {
            let page = args_of(inbound).parse::<usize>().unwrap_or(1);
            Ok(Outcome::value(page_reply(page)))
        }))
        .command(Command::new("pick", ReplyKind::Options, |_ctx, _inbound| {
            Ok(Outcome::value(
                Reply::new("Pick a color").options(["red", "green", "blue"]),
            ))
        }))
        .callback(Command::new("picked", ReplyKind::SetOption, |_ctx, inbound| {
            let choice = inbound.text().unwrap_or_default();
            Ok(Outcome::value(format!("You picked {choice}")))
        }))
        .command(Command::new("sticker", ReplyKind::Sticker, |_ctx, _inbound| {
            Ok(Outcome::value("CAACAgIAAxkBAAEKeel"))
        }))
        .command(Command::new("fail", ReplyKind::Text, |_ctx, _inbound| {
            Err(CommandError::new("nothing to see here"))
        }))
        .command(
            Command::new("admin", ReplyKind::Text, |_ctx, inbound| {
                Ok(Outcome::value(format!(
                    "welcome, admin {}",
                    inbound.sender().unwrap_or_default()
                )))
            })
            .permission(Permission::Admin),
        )
        .command(Command::new("stats", ReplyKind::Text, move |ctx, _inbound| {
            let learned = Arc::clone(&learned);
            let queue = ctx.queue().clone();
            Ok(Outcome::work(move || {
                let stats = queue.stats();
                Ok(Reply::new(format!(
                    "updates seen: {}, processed: {}, failed: {}",
                    learned.total(),
                    stats.processed,
                    stats.failed
                )))
            }))
        }))
        .command(Command::new("quit", ReplyKind::Silent, |ctx, _inbound| {
            info!("Quit requested");
            ctx.queue().request_stop();
            Ok(Outcome::Nothing)
        }))
}

/// Page buttons carry the page number as their data.
fn turn_page() -> Command {
    Command::new("turn_page", ReplyKind::Paginated, |_ctx, inbound| {
        let page = inbound.text().and_then(|d| d.parse().ok()).unwrap_or(1);
        Ok(Outcome::value(page_reply(page)))
    })
}

fn is_page_turn(inbound: &dyn Inbound) -> bool {
    inbound.is_callback() && inbound.text().is_some_and(|d| d.parse::<usize>().is_ok())
}

/// The router plus the page-turn handler, which the router's single
/// callback slot cannot tell apart from option picks.
struct Bot {
    router: Router,
    turn_page: Command,
}

impl Bot {
    fn new(learned: Arc<LearnedUpdates>) -> Self {
        Self {
            router: router(learned),
            turn_page: turn_page(),
        }
    }

    fn route(&self, inbound: &dyn Inbound) -> Option<&Command> {
        if is_page_turn(inbound) {
            Some(&self.turn_page)
        } else {
            self.router.route(inbound)
        }
    }

    fn dispatch(&self, ctx: &BotContext, inbound: Arc<dyn Inbound>) -> Option<Dispatched> {
        let command = self.route(&*inbound)?;
        Some(ctx.handle(command, inbound))
    }
}

fn permissions() -> MemoryPermissions {
    MemoryPermissions::new(Permission::User)
        .with(1, Permission::Root)
        .with(2, Permission::Banned)
        .with(3, Permission::Ignored)
}

// ============================================================================
// Main
// ============================================================================

/// Feeds stdin lines to the bot, one thread per line.
fn read_stdin(bot: Arc<Bot>, ctx: BotContext) {
    let stdin = std::io::stdin();
    for (id, line) in (1..).zip(stdin.lock().lines()) {
        let Ok(line) = line else { break };
        if ctx.is_stopped() {
            break;
        }
        let Some(inbound) = ConsoleInbound::parse(id, &line) else {
            continue;
        };

        let bot = Arc::clone(&bot);
        let ctx = ctx.clone();
        thread::spawn(move || {
            let inbound: Arc<dyn Inbound> = Arc::new(inbound);
            match bot.dispatch(&ctx, Arc::clone(&inbound)) {
                Some(dispatched) => debug!(id, ?dispatched, "Update handled"),
                None => {
                    let options = SendOptions::quoted(true);
                    if let Err(e) = inbound.reply_text("unknown command, try /help", &options) {
                        warn!(id, error = %e, "Failed to reply to unknown command");
                    }
                }
            }
        });
    }
    info!("Input closed");
    ctx.queue().request_stop();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_current_dir();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let mut config = loader.load()?;
    if let Some(username) = args.username {
        config.bot.username = Some(username);
    }
    if let Some(ms) = args.timeout_ms {
        config.dispatch.default_timeout_ms = Some(ms);
    }

    let runtime = KeelRuntime::from_config(&config);
    let learned = Arc::new(LearnedUpdates::default());
    let ctx = runtime
        .bot_context()
        .permissions(Arc::new(permissions()))
        .update_logger(learned.clone());

    runtime.on_shutdown({
        let learned = Arc::clone(&learned);
        move || info!(updates = learned.total(), "Updates seen this session")
    });

    let bot = Arc::new(Bot::new(learned));
    // Not joined: a blocked stdin read must not hold up shutdown.
    thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || read_stdin(bot, ctx))?;

    println!("keel console bot. Type /help, Ctrl+D or /quit to stop.");
    runtime.run_until_signal()?;

    Ok(())
}
