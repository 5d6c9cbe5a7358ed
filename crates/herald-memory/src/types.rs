use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use herald_core::types::{ChatId, EventKind, Role, ThreadKey, TopicId};

/// One immutable memory record. Events are append-only and never deleted;
/// curation produces a separate digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub thread_key: String,
    pub chat_id: i64,
    pub topic_id: String,
    pub agent_id: String,
    pub role: Role,
    pub kind: EventKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEvent {
    pub fn new(key: &ThreadKey, role: Role, kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            thread_key: key.to_string(),
            chat_id: key.chat.0,
            topic_id: key.topic.as_str().to_string(),
            agent_id: key.agent.as_str().to_string(),
            role,
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bookkeeping for the last digest rebuild, persisted in `memory/state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurationState {
    pub events_processed: u64,
    pub bytes: usize,
    pub last_curated_at: Option<DateTime<Utc>>,
}

/// Inputs for scoped retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub chat: ChatId,
    pub topic: TopicId,
    pub agent: herald_core::types::AgentId,
    pub limit: usize,
}

impl RetrievalRequest {
    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::new(self.chat, self.topic.clone(), self.agent.clone())
    }
}
