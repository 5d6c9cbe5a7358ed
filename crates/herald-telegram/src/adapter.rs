//! Telegram channel adapter: wraps a teloxide `Bot` + `Dispatcher` and
//! drives long polling until shutdown. No public URL required.

use std::path::PathBuf;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use herald_core::types::{ChatId as HChatId, TopicId};
use herald_scheduler::CronDelivery;

use crate::handler::handle_message;
use crate::send;
use crate::typing::thread_id;
use crate::App;

pub struct TelegramAdapter {
    bot: Bot,
    app: Arc<App>,
}

impl TelegramAdapter {
    pub fn new(bot: Bot, app: Arc<App>) -> Self {
        Self { bot, app }
    }

    /// Drive the long-polling loop. Returns after ctrl-c stops ingress; the
    /// caller then drains queues and stops the scheduler.
    pub async fn run(self) {
        info!("telegram: starting long-polling dispatcher");
        let handler = Update::filter_message().endpoint(handle_message);
        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.app])
            .default_handler(|_upd| async {})
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

/// Cron output egress through the same send path as chat replies.
pub struct TelegramDelivery {
    bot: Bot,
    attachments_dir: PathBuf,
}

impl TelegramDelivery {
    pub fn new(bot: Bot, attachments_dir: PathBuf) -> Self {
        Self {
            bot,
            attachments_dir,
        }
    }
}

impl CronDelivery for TelegramDelivery {
    fn deliver(&self, chat: HChatId, topic: TopicId, text: String) {
        let bot = self.bot.clone();
        let dir = self.attachments_dir.clone();
        tokio::spawn(async move {
            send::send_response(&bot, ChatId(chat.0), thread_id(&topic), &text, &dir).await;
        });
    }
}
