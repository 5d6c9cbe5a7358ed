//! Thread store: the `{chat}:{topic}:{agent} → session id` mapping behind
//! session continuity, persisted as `threads.json`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use herald_core::persist::JsonFile;
use herald_core::types::{AgentId, ChatId, ThreadKey, TopicId};

#[derive(Debug, Clone)]
pub struct ResolvedThread {
    pub key: ThreadKey,
    pub session_id: Option<String>,
    /// True when this entry was rewritten from a legacy two-field key.
    pub migrated: bool,
}

pub struct ThreadStore {
    map: Mutex<HashMap<String, String>>,
    /// Keys that were rewritten from the legacy format on load.
    migrated_keys: Mutex<std::collections::HashSet<String>>,
    file: Arc<JsonFile<HashMap<String, String>>>,
}

impl ThreadStore {
    /// Load `threads.json`, migrating any legacy `{chat}:{agent}` keys to
    /// the three-field form. The migrated mapping is persisted on the next
    /// mutation; until then the in-memory view is authoritative.
    pub fn open(file: JsonFile<HashMap<String, String>>) -> Self {
        let raw = file.load();
        let mut map = HashMap::with_capacity(raw.len());
        let mut migrated_keys = std::collections::HashSet::new();

        for (key, session) in raw {
            match ThreadKey::parse(&key) {
                Ok((parsed, migrated)) => {
                    let canonical = parsed.to_string();
                    if migrated {
                        info!(from = %key, to = %canonical, "migrated legacy thread key");
                        migrated_keys.insert(canonical.clone());
                    }
                    map.insert(canonical, session);
                }
                Err(_) => {
                    warn!(key = %key, "dropping unparseable thread key");
                }
            }
        }

        Self {
            map: Mutex::new(map),
            migrated_keys: Mutex::new(migrated_keys),
            file: Arc::new(file),
        }
    }

    pub fn resolve(&self, chat: ChatId, topic: TopicId, agent: AgentId) -> ResolvedThread {
        let key = ThreadKey::new(chat, topic, agent);
        let key_str = key.to_string();
        let session_id = self.map.lock().unwrap().get(&key_str).cloned();
        let migrated = self.migrated_keys.lock().unwrap().contains(&key_str);
        ResolvedThread {
            key,
            session_id,
            migrated,
        }
    }

    /// Overwrite the session id for a thread and persist asynchronously.
    pub fn set(&self, key: &ThreadKey, session_id: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), session_id.to_string());
        self.persist();
    }

    /// Remove one thread's session and persist asynchronously.
    pub fn clear(&self, key: &ThreadKey) {
        let removed = self.map.lock().unwrap().remove(&key.to_string());
        if removed.is_some() {
            self.persist();
        }
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.lock().unwrap().clone()
    }

    /// Write the current mapping out (callers use this to persist a legacy
    /// migration without waiting for the next mutation).
    pub fn flush(&self) {
        self.persist();
    }

    fn persist(&self) {
        let snapshot = self.map.lock().unwrap().clone();
        self.file.spawn_save(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(content: &serde_json::Value) -> (ThreadStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.json");
        std::fs::write(&path, serde_json::to_string(content).unwrap()).unwrap();
        (ThreadStore::open(JsonFile::new(path)), dir)
    }

    #[tokio::test]
    async fn resolve_returns_stored_session() {
        let (store, _dir) = store_with(&serde_json::json!({
            "12345:root:claude": "t-1",
        }));
        let resolved = store.resolve(ChatId(12345), TopicId::root(), AgentId::new("claude"));
        assert_eq!(resolved.session_id.as_deref(), Some("t-1"));
        assert!(!resolved.migrated);
    }

    #[tokio::test]
    async fn legacy_keys_migrate_on_load() {
        let (store, _dir) = store_with(&serde_json::json!({
            "12345:claude": "old-session",
        }));
        let resolved = store.resolve(ChatId(12345), TopicId::root(), AgentId::new("claude"));
        assert_eq!(resolved.session_id.as_deref(), Some("old-session"));
        assert!(resolved.migrated);
    }

    #[tokio::test]
    async fn set_then_clear_round_trips() {
        let (store, _dir) = store_with(&serde_json::json!({}));
        let key = ThreadKey::new(ChatId(1), TopicId::root(), AgentId::new("codex"));
        store.set(&key, "s-9");
        assert_eq!(
            store
                .resolve(ChatId(1), TopicId::root(), AgentId::new("codex"))
                .session_id
                .as_deref(),
            Some("s-9")
        );
        store.clear(&key);
        assert!(store
            .resolve(ChatId(1), TopicId::root(), AgentId::new("codex"))
            .session_id
            .is_none());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(JsonFile::new(dir.path().join("none.json")));
        assert!(store.snapshot().is_empty());
    }
}
