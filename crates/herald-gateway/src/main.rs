//! Herald gateway: loads config, wires the engine, and runs the Telegram
//! dispatcher until ctrl-c, then drains in-flight work before exit.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use teloxide::prelude::*;
use tracing::{error, info, warn};

use herald_agents::{AdapterRegistry, SubprocessExecutor};
use herald_core::config::{HeraldConfig, Tuning};
use herald_core::paths::StateDir;
use herald_core::persist::JsonFile;
use herald_engine::{AgentRunner, RunnerConfig, SettingsStore, TaskManager, ThreadStore, WorkQueue};
use herald_memory::{MemoryService, MemoryStore};
use herald_scheduler::{CronScheduler, CronStore};
use herald_telegram::adapter::{TelegramAdapter, TelegramDelivery};
use herald_telegram::typing::BotTyping;
use herald_telegram::App;
use herald_usage::{AlertSink, UsageTracker};

/// How long shutdown waits for pending work before force-exiting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);
/// How long finished background tasks stay visible in /status.
const TASK_RETAIN: Duration = Duration::from_secs(30 * 60);

#[derive(Parser)]
#[command(name = "herald-gateway", about = "Chat-driven dispatcher for CLI AI agents")]
struct Args {
    /// Path to herald.toml (defaults to the state directory).
    #[arg(long)]
    config: Option<String>,
}

/// Budget threshold alerts go to the configured cron chat.
struct BudgetAlerts {
    bot: Bot,
    settings: Arc<SettingsStore>,
}

impl AlertSink for BudgetAlerts {
    fn budget_alert(&self, threshold: u8, used_pct: f64) {
        let Some(chat) = self.settings.cron_chat() else {
            warn!(threshold, "budget alert with no cron chat configured");
            return;
        };
        let bot = self.bot.clone();
        tokio::spawn(async move {
            let text =
                format!("⚠️ Token budget at {used_pct:.0}% (crossed the {threshold}% mark).");
            if let Err(e) = bot.send_message(ChatId(chat), text).await {
                warn!("budget alert delivery failed: {e}");
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = HeraldConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        HeraldConfig::default()
    });
    let tuning = Tuning::from_env();

    if config.telegram.bot_token.is_empty() {
        error!("no Telegram bot token configured (telegram.bot_token in herald.toml)");
        std::process::exit(1);
    }

    let state = StateDir::resolve();
    state.ensure()?;
    info!(dir = %state.root().display(), "state directory ready");

    let bot = Bot::new(&config.telegram.bot_token);

    // Stores.
    let threads = Arc::new(ThreadStore::open(JsonFile::new(state.threads_file())));
    let settings = Arc::new(SettingsStore::open(
        JsonFile::new(state.settings_file()),
        JsonFile::new(state.overrides_file()),
    ));
    let memory_store = Arc::new(MemoryStore::open(state.clone()));
    let memory = Arc::new(MemoryService::new(
        memory_store,
        state.clone(),
        tuning.memory_capture_max_chars,
        tuning.memory_curate_every,
    ));
    let usage = Arc::new(
        UsageTracker::open(JsonFile::new(state.usage_file()), tuning.token_budget_daily)
            .with_alert_sink(Arc::new(BudgetAlerts {
                bot: bot.clone(),
                settings: Arc::clone(&settings),
            })),
    );

    // The engine.
    let runner = Arc::new(AgentRunner::new(
        AdapterRegistry::with_defaults(),
        Arc::new(SubprocessExecutor),
        threads,
        settings,
        memory,
        usage,
        RunnerConfig {
            default_agent: config.agent.default.clone(),
            timeout_ms: tuning.agent_timeout_ms,
            max_buffer: tuning.agent_max_buffer,
            rotation_turns: tuning.thread_rotation_turns,
            max_context_chars: tuning.thread_max_context_chars,
            file_instructions_every: tuning.file_instructions_every,
            retrieval_limit: tuning.memory_retrieval_limit,
        },
    ));

    let tasks = Arc::new(TaskManager::new(
        Arc::clone(&runner),
        Arc::new(BotTyping::new(bot.clone())),
        TASK_RETAIN,
    ));

    // Cron scheduler with its own shutdown signal.
    let scheduler = CronScheduler::new(
        Arc::clone(&runner),
        CronStore::new(JsonFile::new(state.cron_file())),
        Arc::new(TelegramDelivery::new(bot.clone(), state.attachments_dir())),
        tuning.cron_budget_gate_pct,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    // Attachment reaper.
    herald_telegram::attach::spawn_reaper(
        state.attachments_dir(),
        tuning.attachment_ttl_hours,
        tuning.attachment_cleanup_interval_ms,
    );

    let queue = WorkQueue::new();
    let app = Arc::new(App {
        runner,
        tasks: Arc::clone(&tasks),
        scheduler,
        queue: queue.clone(),
        allow_users: config.telegram.allow_users.clone(),
        state,
        tuning,
    });

    // Long-poll until ctrl-c stops ingress.
    TelegramAdapter::new(bot, app).run().await;

    // Shutdown: ingress has stopped; silence cron, then race the drain
    // against a timeout.
    info!("ingress stopped, draining pending work");
    let _ = shutdown_tx.send(true);
    let queue_drained = queue.drain(DRAIN_TIMEOUT).await;
    let tasks_drained = tasks.drain(DRAIN_TIMEOUT).await;
    if queue_drained && tasks_drained {
        info!("drained cleanly, bye");
    } else {
        warn!("drain timeout, forcing exit");
    }
    Ok(())
}
