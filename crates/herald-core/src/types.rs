use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HeraldError;

/// Canonical topic sentinel for chats without forum topics.
pub const ROOT_TOPIC: &str = "root";

/// Telegram chat identifier (negative for groups/supergroups).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Forum topic identifier. Chats without topics use [`ROOT_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId(pub String);

impl TopicId {
    pub fn root() -> Self {
        Self(ROOT_TOPIC.to_string())
    }

    /// Map an optional numeric thread id to a topic id, defaulting to root.
    pub fn from_thread(thread_id: Option<i64>) -> Self {
        match thread_id {
            Some(id) => Self(id.to_string()),
            None => Self::root(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TopicId {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::root()
        } else {
            Self(s.to_string())
        }
    }
}

/// Identifies which CLI agent handles a thread (e.g. "claude", "codex").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Serialization scope: `{chat}:{topic}`.
///
/// One topic key = one FIFO lane in the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey {
    pub chat: ChatId,
    pub topic: TopicId,
}

impl TopicKey {
    pub fn new(chat: ChatId, topic: TopicId) -> Self {
        Self { chat, topic }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat, self.topic)
    }
}

/// Session and memory scope: `{chat}:{topic}:{agent}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub chat: ChatId,
    pub topic: TopicId,
    pub agent: AgentId,
}

impl ThreadKey {
    pub fn new(chat: ChatId, topic: TopicId, agent: AgentId) -> Self {
        Self { chat, topic, agent }
    }

    pub fn topic_key(&self) -> TopicKey {
        TopicKey::new(self.chat, self.topic.clone())
    }

    /// Parse the canonical three-segment form.
    ///
    /// Legacy two-segment keys (`{chat}:{agent}`, written before forum topics
    /// existed) are accepted with the root topic inserted; the second tuple
    /// field reports whether such a migration happened.
    pub fn parse(s: &str) -> std::result::Result<(Self, bool), HeraldError> {
        let parts: Vec<&str> = s.split(':').collect();
        let bad = || HeraldError::InvalidKey(s.to_string());
        match parts.as_slice() {
            [chat, topic, agent] => {
                let chat: i64 = chat.parse().map_err(|_| bad())?;
                Ok((
                    Self::new(ChatId(chat), TopicId::from(*topic), AgentId::new(agent)),
                    false,
                ))
            }
            [chat, agent] => {
                let chat: i64 = chat.parse().map_err(|_| bad())?;
                Ok((
                    Self::new(ChatId(chat), TopicId::root(), AgentId::new(agent)),
                    true,
                ))
            }
            _ => Err(bad()),
        }
    }

    /// Filesystem-safe form for per-thread JSONL file names.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.chat, self.topic, self.agent).replace(['/', '\\'], "_")
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chat, self.topic, self.agent)
    }
}

/// Who produced a memory event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// What kind of ingress produced a memory event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Command,
    Audio,
    Image,
    Document,
    Cron,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Command => "command",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Document => "document",
            Self::Cron => "cron",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_round_trip() {
        let key = ThreadKey::new(ChatId(12345), TopicId::root(), AgentId::new("claude"));
        let (parsed, migrated) = ThreadKey::parse(&key.to_string()).unwrap();
        assert_eq!(parsed, key);
        assert!(!migrated);
    }

    #[test]
    fn legacy_two_segment_key_migrates_to_root_topic() {
        let (parsed, migrated) = ThreadKey::parse("12345:claude").unwrap();
        assert!(migrated);
        assert_eq!(parsed.topic.as_str(), ROOT_TOPIC);
        assert_eq!(parsed.agent.as_str(), "claude");
        assert_eq!(parsed.chat.0, 12345);
    }

    #[test]
    fn negative_group_chat_ids_parse() {
        let (parsed, _) = ThreadKey::parse("-100123456:7:codex").unwrap();
        assert_eq!(parsed.chat.0, -100123456);
        assert_eq!(parsed.topic.as_str(), "7");
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!(ThreadKey::parse("claude").is_err());
        assert!(ThreadKey::parse("a:b:c:d").is_err());
        assert!(ThreadKey::parse("notanumber:root:claude").is_err());
    }

    #[test]
    fn missing_topic_maps_to_root() {
        assert_eq!(TopicId::from_thread(None).as_str(), ROOT_TOPIC);
        assert_eq!(TopicId::from_thread(Some(42)).as_str(), "42");
    }
}
