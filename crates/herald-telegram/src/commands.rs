//! Slash commands — intercepted before the agent pipeline.

use std::sync::Arc;

use tracing::info;

use herald_core::types::{AgentId, ChatId, ThreadKey, TopicId, TopicKey};

use crate::App;

/// Handle a slash command. Returns `Some(response)` when the message was a
/// recognized command, `None` when it should go to the agent pipeline.
pub async fn handle(text: &str, app: &Arc<App>, chat: ChatId, topic: &TopicId) -> Option<String> {
    let trimmed = text.trim();
    let (command, args) = match trimmed.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (trimmed, ""),
    };
    // Group-chat commands may arrive as /cmd@botname.
    let command = command.split('@').next().unwrap_or(command).to_lowercase();

    match command.as_str() {
        "/start" | "/help" => Some(start_text(app)),
        "/agent" => Some(agent_command(app, chat, topic, args)),
        "/model" => Some(model_command(app, chat, topic, args)),
        "/thinking" => Some(thinking_command(app, args)),
        "/reset" => {
            let agent = app.runner.reset(chat, topic);
            Some(format!(
                "Session cleared for `{agent}`. The next message starts a fresh conversation."
            ))
        }
        "/memory" => Some(memory_command(app)),
        "/usage" => Some(app.runner.usage().stats(Some(chat))),
        "/status" => Some(status_command(app, chat, topic)),
        "/cron" => Some(cron_command(app, chat, topic, args).await),
        _ => None,
    }
}

fn start_text(app: &Arc<App>) -> String {
    let agents = app.runner.registry().ids().join("`, `");
    format!(
        "Herald routes your messages to command-line AI agents.\n\
         \n\
         Available agents: `{agents}`\n\
         - `/agent <name|default>` — pick the agent for this topic\n\
         - `/model <id|reset>` — override the agent's model\n\
         - `/thinking <level|off>` — set the reasoning effort\n\
         - `/reset` — start a fresh conversation\n\
         - `/memory` — long-term memory status\n\
         - `/usage` — today's token usage\n\
         - `/status` — thread and task status\n\
         - `/cron list|show|assign|unassign|run|logs|reload|chatid`"
    )
}

fn agent_command(app: &Arc<App>, chat: ChatId, topic: &TopicId, args: &str) -> String {
    let topic_key = TopicKey::new(chat, topic.clone());
    if args.is_empty() {
        let current = app.runner.effective_agent(None, &topic_key);
        let available = app.runner.registry().ids().join("`, `");
        return format!("Current agent: `{current}`\nAvailable: `{available}`");
    }
    if args.eq_ignore_ascii_case("default") {
        app.runner.settings().set_override(&topic_key, None);
        let current = app.runner.effective_agent(None, &topic_key);
        return format!("Agent override cleared; back to `{current}`.");
    }
    if app.runner.registry().get(args).is_none() {
        let available = app.runner.registry().ids().join("`, `");
        return format!("Unknown agent `{args}`. Available: `{available}`");
    }
    app.runner
        .settings()
        .set_override(&topic_key, Some(args.to_string()));
    info!(agent = %args, topic = %topic_key, "agent override set");
    format!("This topic now talks to `{args}`.")
}

fn model_command(app: &Arc<App>, chat: ChatId, topic: &TopicId, args: &str) -> String {
    let topic_key = TopicKey::new(chat, topic.clone());
    let agent = app.runner.effective_agent(None, &topic_key);
    if args.is_empty() {
        return match app.runner.settings().model_for(&agent) {
            Some(model) => format!("Model for `{agent}`: `{model}`"),
            None => format!("`{agent}` uses its default model. Set one with `/model <id>`."),
        };
    }
    if args.eq_ignore_ascii_case("reset") {
        app.runner.settings().set_model(&agent, None);
        return format!("Model for `{agent}` reset to its default.");
    }
    app.runner
        .settings()
        .set_model(&agent, Some(args.to_string()));
    format!("Model for `{agent}` set to `{args}`.")
}

fn thinking_command(app: &Arc<App>, args: &str) -> String {
    if args.is_empty() {
        return match app.runner.settings().thinking() {
            Some(level) => format!("Thinking level: `{level}`"),
            None => "Thinking level is not set. Use `/thinking low|medium|high`.".to_string(),
        };
    }
    if args.eq_ignore_ascii_case("off") {
        app.runner.settings().set_thinking(None);
        return "Thinking level cleared.".to_string();
    }
    app.runner
        .settings()
        .set_thinking(Some(args.to_lowercase()));
    format!("Thinking level set to `{}`.", args.to_lowercase())
}

fn memory_command(app: &Arc<App>) -> String {
    let state = app.runner.memory().store().curation_state();
    let digest = app.runner.memory().store().digest();
    let last = state
        .last_curated_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "Memory digest: {} bytes auto-curated from {} recent events (last pass: {last}).\n\
         Full digest size: {} bytes. Manual notes in `memory.md` survive curation.",
        state.bytes,
        state.events_processed,
        digest.len()
    )
}

fn status_command(app: &Arc<App>, chat: ChatId, topic: &TopicId) -> String {
    let topic_key = TopicKey::new(chat, topic.clone());
    let agent = app.runner.effective_agent(None, &topic_key);
    let key = ThreadKey::new(chat, topic.clone(), AgentId::new(&agent));
    let resolved = app
        .runner
        .threads()
        .resolve(chat, topic.clone(), AgentId::new(&agent));

    let mut out = format!(
        "Agent: `{agent}`\nSession: {}\nTurns: {}\nContext: ~{} chars\n",
        resolved
            .session_id
            .map(|s| format!("`{s}`"))
            .unwrap_or_else(|| "none (fresh thread)".to_string()),
        app.runner.turn_count(&key),
        app.runner.context_chars(&key),
    );

    let pct = app.runner.usage().budget_pct();
    if pct > 0.0 {
        out.push_str(&format!("Budget: {pct:.0}% used today\n"));
    }

    let tasks = app.tasks.entries();
    if tasks.is_empty() {
        out.push_str("No background tasks.");
    } else {
        out.push_str("Tasks:\n");
        for task in tasks.iter().take(10) {
            out.push_str(&format!(
                "- `{}` [{}] {}{}\n",
                task.id,
                task.status,
                task.prompt_head,
                task.error
                    .as_deref()
                    .map(|e| format!(" — {e}"))
                    .unwrap_or_default()
            ));
        }
    }
    out.trim_end().to_string()
}

async fn cron_command(app: &Arc<App>, chat: ChatId, topic: &TopicId, args: &str) -> String {
    let (sub, rest) = match args.split_once(char::is_whitespace) {
        Some((s, r)) => (s, r.trim()),
        None => (args, ""),
    };

    match sub {
        "list" | "" => {
            let views = app.scheduler.views();
            if views.is_empty() {
                return "No cron jobs. Edit `cron.json` and `/cron reload`.".to_string();
            }
            let mut out = String::from("Cron jobs:\n");
            for view in views {
                out.push_str(&format!(
                    "- `{}` [{}] `{}` {} → {}\n",
                    view.job.id,
                    view.phase,
                    view.job.cron,
                    view.job.prompt.chars().take(40).collect::<String>(),
                    view.next_run
                        .map(|t| t.format("%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| "unscheduled".to_string()),
                ));
            }
            out.trim_end().to_string()
        }
        "show" => match app.scheduler.views().into_iter().find(|v| v.job.id == rest) {
            Some(view) => format!(
                "Job `{}`\ncron: `{}` ({})\nprompt: {}\nagent: {}\nchat: {}\nphase: {}\nlast run: {}{}",
                view.job.id,
                view.job.cron,
                view.job.timezone,
                view.job.prompt,
                view.job.agent.as_deref().unwrap_or("(default)"),
                view.job
                    .chat_id
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(cron chat)".to_string()),
                view.phase,
                view.last_run
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string()),
                view.last_error
                    .as_deref()
                    .map(|e| format!("\nlast error: {e}"))
                    .unwrap_or_default(),
            ),
            None => format!("No job `{rest}`."),
        },
        "assign" => match app.scheduler.assign(rest, chat, topic) {
            Ok(()) => format!("Job `{rest}` now reports to this chat."),
            Err(e) => e.to_string(),
        },
        "unassign" => match app.scheduler.unassign(rest) {
            Ok(()) => format!("Job `{rest}` detached; it will use the cron chat."),
            Err(e) => e.to_string(),
        },
        "run" => {
            let scheduler = Arc::clone(&app.scheduler);
            let id = rest.to_string();
            match scheduler.job(&id) {
                Some(_) => {
                    tokio::spawn(async move {
                        let _ = scheduler.run_now(&id).await;
                    });
                    format!("Job `{rest}` fired.")
                }
                None => format!("No job `{rest}`."),
            }
        }
        "logs" => app
            .scheduler
            .logs(rest)
            .map(|logs| {
                let tail: String = logs.chars().rev().take(3000).collect::<String>()
                    .chars().rev().collect();
                format!("Logs for `{rest}`:\n```\n{tail}\n```")
            })
            .unwrap_or_else(|| format!("No job `{rest}`.")),
        "reload" => {
            let count = app.scheduler.reload();
            format!("Reloaded {count} cron jobs from `cron.json`.")
        }
        "chatid" => {
            app.runner.settings().set_cron_chat(chat.0);
            format!(
                "This chat ({}) is now the default cron target. Topic: {}",
                chat.0,
                topic.as_str()
            )
        }
        other => format!(
            "Unknown `/cron {other}`. Use list, show, assign, unassign, run, logs, reload, chatid."
        ),
    }
}
