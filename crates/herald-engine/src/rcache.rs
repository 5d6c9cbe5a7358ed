//! Bounded TTL cache in front of the memory retriever, so rapid-fire
//! messages on one topic do not hammer the index.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Entries above this count evict the oldest on insert.
const CAPACITY: usize = 100;
/// Cached fragments expire after this long.
const TTL: Duration = Duration::from_secs(60);
/// Prompt prefix length used in cache keys.
const KEY_PROMPT_CHARS: usize = 200;

pub struct RetrievalCache {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl RetrievalCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key: `{chat}:{topic}:{prompt prefix}`.
    pub fn key(chat: i64, topic: &str, prompt: &str) -> String {
        let prefix: String = prompt.chars().take(KEY_PROMPT_CHARS).collect();
        format!("{chat}:{topic}:{prefix}")
    }

    /// A hit may be the empty string: that is the "nothing relevant"
    /// sentinel and suppresses a re-query just like a real fragment.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let (at, value) = entries.get(key)?;
        if at.elapsed() < TTL {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&self, key: String, value: String) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= CAPACITY && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (at, _))| *at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            }
        }
        entries.insert(key, (Instant::now(), value));
    }
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = RetrievalCache::new();
        cache.put("k".to_string(), "fragment".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("fragment"));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn empty_sentinel_is_a_hit() {
        let cache = RetrievalCache::new();
        cache.put("k".to_string(), String::new());
        assert_eq!(cache.get("k").as_deref(), Some(""));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = RetrievalCache::new();
        for i in 0..CAPACITY + 10 {
            cache.put(format!("k{i}"), "v".to_string());
        }
        assert!(cache.entries.lock().unwrap().len() <= CAPACITY + 1);
    }

    #[test]
    fn key_truncates_long_prompts() {
        let prompt = "p".repeat(500);
        let key = RetrievalCache::key(1, "root", &prompt);
        assert_eq!(key.len(), "1:root:".len() + KEY_PROMPT_CHARS);
    }
}
