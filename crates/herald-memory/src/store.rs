//! The memory store: per-thread JSONL append logs, the curated digest in
//! `memory.md`, and the optional FTS index.
//!
//! Appends are fail-soft: an I/O failure is logged and must never block
//! the conversation that triggered it.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, warn};

use herald_core::paths::StateDir;
use herald_core::persist::JsonFile;
use herald_core::types::ThreadKey;

use crate::error::Result;
use crate::index::MemoryIndex;
use crate::types::{CurationState, MemoryEvent, RetrievalRequest};

/// Marker lines delimiting the auto-curated section of `memory.md`.
/// Manual edits outside the markers survive re-curation.
pub const AUTO_BEGIN: &str = "<!-- herald:auto -->";
pub const AUTO_END: &str = "<!-- /herald:auto -->";

/// Events pulled from each thread log when rebuilding the digest.
const CURATE_TAIL_PER_THREAD: usize = 50;
/// Events pulled per log file in the recency retrieval fallback.
const FALLBACK_TAIL_PER_THREAD: usize = 20;

pub struct MemoryStore {
    dir: StateDir,
    index: Option<MemoryIndex>,
    state: Arc<JsonFile<CurationState>>,
}

impl MemoryStore {
    /// Open the store under `dir`. A broken index is logged and disabled;
    /// the JSONL tier works regardless.
    pub fn open(dir: StateDir) -> Self {
        let index = match MemoryIndex::open(&dir.memory_index_file()) {
            Ok(idx) => Some(idx),
            Err(e) => {
                warn!("memory index unavailable ({e}), falling back to recency retrieval");
                None
            }
        };
        let state = Arc::new(JsonFile::new(dir.memory_state_file()));
        Self { dir, index, state }
    }

    /// Append one event to the thread's JSONL log and mirror it into the
    /// index. Never fails the caller.
    pub fn append_event(&self, event: &MemoryEvent) {
        if let Err(e) = self.append_jsonl(event) {
            warn!(thread = %event.thread_key, "memory append failed: {e}");
        }
        if let Some(index) = &self.index {
            if let Err(e) = index.insert(event) {
                warn!(thread = %event.thread_key, "memory index insert failed: {e}");
            }
        }
    }

    fn append_jsonl(&self, event: &MemoryEvent) -> Result<()> {
        let path = self.dir.thread_log_file(&key_of(event));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The most recent `limit` events of a thread, oldest first.
    pub fn tail(&self, key: &ThreadKey, limit: usize) -> Vec<MemoryEvent> {
        let path = self.dir.thread_log_file(key);
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let mut events: Vec<MemoryEvent> = raw
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(limit)
            .collect();
        events.reverse();
        events
    }

    /// Current digest (manual + auto sections of `memory.md`).
    pub fn digest(&self) -> String {
        std::fs::read_to_string(self.dir.memory_md()).unwrap_or_default()
    }

    pub fn curation_state(&self) -> CurationState {
        self.state.load()
    }

    /// Rebuild the auto section of `memory.md` from recent events across all
    /// threads, preserving the manual section verbatim.
    pub async fn curate(&self, max_bytes: usize) -> Result<CurationState> {
        let mut events = self.recent_events_all_threads(CURATE_TAIL_PER_THREAD);
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.thread_key.cmp(&a.thread_key))
        });
        let processed = events.len() as u64;

        let mut auto = String::new();
        for event in &events {
            let line = format!(
                "- [{} {} {}] {}\n",
                event.timestamp.format("%Y-%m-%d %H:%M"),
                event.thread_key,
                event.role,
                first_line(&event.text, 200)
            );
            if auto.len() + line.len() > max_bytes {
                break;
            }
            auto.push_str(&line);
        }

        let current = self.digest();
        let rebuilt = splice_auto_section(&current, &auto);
        tokio::fs::write(self.dir.memory_md(), rebuilt).await?;

        let state = CurationState {
            events_processed: processed,
            bytes: auto.len(),
            last_curated_at: Some(chrono::Utc::now()),
        };
        if let Err(e) = self.state.save(&state).await {
            warn!("curation state persist failed: {e}");
        }
        info!(events = processed, bytes = state.bytes, "memory digest curated");
        Ok(state)
    }

    /// Ranked retrieval: FTS when the index is up, recency scan otherwise.
    /// Deterministic for identical inputs either way.
    pub fn retrieve(&self, req: &RetrievalRequest) -> String {
        let events = match &self.index {
            Some(index) => match index.search(req) {
                Ok(events) => events,
                Err(e) => {
                    warn!("index search failed ({e}), using recency fallback");
                    self.retrieve_by_recency(req)
                }
            },
            None => self.retrieve_by_recency(req),
        };

        if events.is_empty() {
            return String::new();
        }
        let mut out = String::from("Relevant memory:\n");
        for event in events {
            out.push_str(&format!(
                "- [{} {}] {}\n",
                event.timestamp.format("%Y-%m-%d %H:%M"),
                event.role,
                first_line(&event.text, 200)
            ));
        }
        out
    }

    /// Fallback ranking without the index: scope weight desc, timestamp
    /// desc, thread key desc.
    fn retrieve_by_recency(&self, req: &RetrievalRequest) -> Vec<MemoryEvent> {
        let thread_key = req.thread_key().to_string();
        let mut scored: Vec<(i64, MemoryEvent)> = self
            .recent_events_all_threads(FALLBACK_TAIL_PER_THREAD)
            .into_iter()
            .map(|event| {
                let weight = if event.thread_key == thread_key {
                    4
                } else if event.chat_id == req.chat.0 && event.topic_id == req.topic.as_str() {
                    3
                } else if event.chat_id == req.chat.0 {
                    2
                } else {
                    1
                };
                (weight, event)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
                .then_with(|| b.1.thread_key.cmp(&a.1.thread_key))
        });
        scored
            .into_iter()
            .take(req.limit)
            .map(|(_, e)| e)
            .collect()
    }

    /// Tails of every thread log, file order sorted for determinism.
    fn recent_events_all_threads(&self, per_thread: usize) -> Vec<MemoryEvent> {
        let dir = self.dir.memory_threads_dir();
        let mut paths: Vec<_> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect(),
            Err(_) => return Vec::new(),
        };
        paths.sort();

        let mut events = Vec::new();
        for path in paths {
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let mut tail: Vec<MemoryEvent> = raw
                .lines()
                .rev()
                .filter_map(|line| serde_json::from_str(line).ok())
                .take(per_thread)
                .collect();
            tail.reverse();
            events.extend(tail);
        }
        debug!(count = events.len(), "collected recent events for scan");
        events
    }
}

fn key_of(event: &MemoryEvent) -> ThreadKey {
    ThreadKey::parse(&event.thread_key)
        .map(|(k, _)| k)
        .unwrap_or_else(|_| {
            ThreadKey::new(
                herald_core::types::ChatId(event.chat_id),
                herald_core::types::TopicId::from(event.topic_id.as_str()),
                herald_core::types::AgentId::new(&event.agent_id),
            )
        })
}

/// Replace the marker-delimited auto section, or append one if the file has
/// no markers yet. Everything outside the markers is manual and untouched.
fn splice_auto_section(current: &str, auto: &str) -> String {
    let begin = current.find(AUTO_BEGIN);
    let end = current.find(AUTO_END);
    match (begin, end) {
        (Some(b), Some(e)) if e > b => {
            let mut out = String::new();
            out.push_str(&current[..b]);
            out.push_str(AUTO_BEGIN);
            out.push('\n');
            out.push_str(auto);
            out.push_str(AUTO_END);
            out.push_str(&current[e + AUTO_END.len()..]);
            out
        }
        _ => {
            let mut out = current.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(AUTO_BEGIN);
            out.push('\n');
            out.push_str(auto);
            out.push_str(AUTO_END);
            out.push('\n');
            out
        }
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::types::{AgentId, ChatId, EventKind, Role, TopicId};

    fn store() -> (MemoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::at(dir.path());
        state.ensure().unwrap();
        (MemoryStore::open(state), dir)
    }

    fn key(chat: i64, agent: &str) -> ThreadKey {
        ThreadKey::new(ChatId(chat), TopicId::root(), AgentId::new(agent))
    }

    #[test]
    fn append_then_tail_is_chronological() {
        let (store, _dir) = store();
        let k = key(1, "claude");
        for text in ["one", "two", "three"] {
            store.append_event(&MemoryEvent::new(&k, Role::User, EventKind::Text, text));
        }
        let tail = store.tail(&k, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "two");
        assert_eq!(tail[1].text, "three");
    }

    #[test]
    fn tail_of_missing_thread_is_empty() {
        let (store, _dir) = store();
        assert!(store.tail(&key(99, "codex"), 10).is_empty());
    }

    #[tokio::test]
    async fn curation_preserves_manual_section() {
        let (store, dir) = store();
        let manual = "# My notes\nKeep this line.\n";
        std::fs::write(dir.path().join("memory.md"), manual).unwrap();

        let k = key(1, "claude");
        store.append_event(&MemoryEvent::new(&k, Role::User, EventKind::Text, "remember the milk"));
        let state = store.curate(4096).await.unwrap();
        assert_eq!(state.events_processed, 1);
        assert!(state.last_curated_at.is_some());

        let digest = store.digest();
        assert!(digest.starts_with(manual));
        assert!(digest.contains(AUTO_BEGIN));
        assert!(digest.contains("remember the milk"));

        // Re-curating must not duplicate the manual section.
        store.curate(4096).await.unwrap();
        let digest2 = store.digest();
        assert_eq!(digest2.matches("Keep this line.").count(), 1);
        assert_eq!(digest2.matches(AUTO_BEGIN).count(), 1);
    }

    #[tokio::test]
    async fn curation_respects_byte_budget() {
        let (store, _dir) = store();
        let k = key(1, "claude");
        for i in 0..100 {
            store.append_event(&MemoryEvent::new(
                &k,
                Role::User,
                EventKind::Text,
                format!("event number {i} with a reasonably long tail of words"),
            ));
        }
        let state = store.curate(500).await.unwrap();
        assert!(state.bytes <= 500);
    }

    #[test]
    fn retrieve_formats_ranked_fragment() {
        let (store, _dir) = store();
        let k = key(1, "claude");
        store.append_event(&MemoryEvent::new(
            &k,
            Role::Assistant,
            EventKind::Text,
            "the deploy window is friday",
        ));
        let fragment = store.retrieve(&RetrievalRequest {
            query: "deploy window".to_string(),
            chat: k.chat,
            topic: k.topic.clone(),
            agent: k.agent.clone(),
            limit: 4,
        });
        assert!(fragment.starts_with("Relevant memory:"));
        assert!(fragment.contains("deploy window"));
    }

    #[test]
    fn retrieve_with_no_matches_is_empty() {
        let (store, _dir) = store();
        let fragment = store.retrieve(&RetrievalRequest {
            query: "zzz unseen".to_string(),
            chat: ChatId(1),
            topic: TopicId::root(),
            agent: AgentId::new("claude"),
            limit: 4,
        });
        assert!(fragment.is_empty());
    }

    #[test]
    fn splice_appends_markers_when_absent() {
        let out = splice_auto_section("manual\n", "- a\n");
        assert!(out.starts_with("manual\n"));
        assert!(out.contains("<!-- herald:auto -->\n- a\n<!-- /herald:auto -->"));
    }
}
