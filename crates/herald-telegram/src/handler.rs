//! Ingress handler registered in the teloxide Dispatcher.
//!
//! Runs for every incoming message: bot filter, allow-list, command
//! interception, media download, then the per-topic queue (capture happens
//! inside the queue so memory order equals arrival order) and finally the
//! background task manager, which chains runs per thread and keeps the
//! typing indicator alive.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use herald_core::types::{AgentId, ChatId as HChatId, EventKind, Role, ThreadKey, TopicId, TopicKey};
use herald_engine::{Attachment, ChatRun, EngineError};

use crate::commands;
use crate::send;
use crate::typing::thread_id;
use crate::{attach, App};

pub async fn handle_message(bot: Bot, msg: Message, app: Arc<App>) -> ResponseResult<()> {
    // Ignore other bots.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    // Allow-list: an empty list permits everyone.
    let username = from.username.as_deref().unwrap_or("");
    let user_id = from.id.0.to_string();
    if !crate::allow::is_allowed(&app.allow_users, username, &user_id) {
        warn!(user = %user_id, "ingress dropped: user not in allow list");
        return Ok(());
    }

    let chat = HChatId(msg.chat.id.0);
    let topic = TopicId::from_thread(msg.thread_id.map(|t| t.0 .0 as i64));
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    // Slash commands answer immediately, outside the queue.
    if text.starts_with('/') {
        if let Some(response) = commands::handle(&text, &app, chat, &topic).await {
            let agent = app.runner.effective_agent(None, &TopicKey::new(chat, topic.clone()));
            let key = ThreadKey::new(chat, topic.clone(), AgentId::new(&agent));
            app.runner
                .memory()
                .capture(&key, Role::User, EventKind::Command, &text);
            send::send_response(
                &bot,
                msg.chat.id,
                thread_id(&topic),
                &response,
                &app.state.attachments_dir(),
            )
            .await;
            return Ok(());
        }
    }

    // Media lands in the attachments directory and rides along as a path.
    let media = attach::extract_media(&bot, &msg, &app.state.attachments_dir()).await;
    if text.is_empty() && media.is_none() {
        return Ok(());
    }

    let kind = media.as_ref().map(|(k, _)| *k).unwrap_or(EventKind::Text);
    let prompt = if text.is_empty() {
        "[User sent an attachment]".to_string()
    } else {
        text.clone()
    };
    let attachments: Vec<Attachment> = media
        .map(|(kind, path)| {
            vec![Attachment {
                kind,
                path: path.to_string_lossy().into_owned(),
            }]
        })
        .unwrap_or_default();

    let topic_key = TopicKey::new(chat, topic.clone());
    let lane = topic_key.to_string();
    let app2 = Arc::clone(&app);
    let bot2 = bot.clone();
    let tg_chat = msg.chat.id;

    // Capture inside the topic lane (conversational order), then hand the
    // run to the task manager (per-thread chaining, typing indicator).
    app.queue.enqueue(&lane, async move {
        let agent = app2.runner.effective_agent(None, &topic_key);
        let key = ThreadKey::new(chat, topic.clone(), AgentId::new(&agent));
        app2.runner.memory().capture(&key, Role::User, kind, &prompt);

        let run = ChatRun {
            attachments,
            ..ChatRun::new(chat, topic.clone(), prompt.clone())
        };

        let app3 = Arc::clone(&app2);
        let topic3 = topic.clone();
        app2.tasks.spawn(
            run,
            Box::new(move |result| {
                tokio::spawn(async move {
                    let attachments_dir = app3.state.attachments_dir();
                    match result {
                        Ok(outcome) => {
                            let key = ThreadKey::new(chat, topic3.clone(), outcome.agent.clone());
                            app3.runner.memory().capture(
                                &key,
                                Role::Assistant,
                                EventKind::Text,
                                &outcome.text,
                            );
                            send::send_response(
                                &bot2,
                                tg_chat,
                                thread_id(&topic3),
                                &outcome.text,
                                &attachments_dir,
                            )
                            .await;
                        }
                        Err(EngineError::BudgetExhausted) => {
                            send::send_response(
                                &bot2,
                                tg_chat,
                                thread_id(&topic3),
                                "Daily token budget exhausted — try again tomorrow.",
                                &attachments_dir,
                            )
                            .await;
                        }
                        Err(e) => {
                            warn!(chat = chat.0, "pipeline failed: {e}");
                            send::send_response(
                                &bot2,
                                tg_chat,
                                thread_id(&topic3),
                                &format!("⚠️ Error: {e}"),
                                &attachments_dir,
                            )
                            .await;
                        }
                    }
                });
            }),
        );
    });

    Ok(())
}
