//! Typing indicator. Telegram expires the status after ~5 seconds, so the
//! background task manager refreshes it every 4.

use teloxide::prelude::*;
use teloxide::types::{MessageId, ThreadId};
use tracing::debug;

use herald_core::types::{ChatId as HeraldChatId, TopicId};
use herald_engine::TypingNotifier;

/// Fire-and-forget typing refresher handed to the task manager.
pub struct BotTyping {
    bot: Bot,
}

impl BotTyping {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl TypingNotifier for BotTyping {
    fn typing(&self, chat: HeraldChatId, topic: &TopicId) {
        let bot = self.bot.clone();
        let chat = ChatId(chat.0);
        let thread = thread_id(topic);
        tokio::spawn(async move {
            let mut req = bot.send_chat_action(chat, teloxide::types::ChatAction::Typing);
            req.message_thread_id = thread;
            if let Err(e) = req.await {
                debug!("typing indicator failed: {e}");
            }
        });
    }
}

/// Map a Herald topic to a Telegram thread id (`root` has none).
pub fn thread_id(topic: &TopicId) -> Option<ThreadId> {
    if topic.as_str() == herald_core::types::ROOT_TOPIC {
        return None;
    }
    topic
        .as_str()
        .parse::<i32>()
        .ok()
        .map(|id| ThreadId(MessageId(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_topic_has_no_thread() {
        assert!(thread_id(&TopicId::root()).is_none());
    }

    #[test]
    fn numeric_topics_map_to_thread_ids() {
        assert_eq!(thread_id(&TopicId::from("7")), Some(ThreadId(MessageId(7))));
        assert!(thread_id(&TopicId::from("not-a-number")).is_none());
    }
}
