//! Memory service: event capture, curation cadence, and bootstrap-context
//! assembly on top of [`MemoryStore`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use herald_core::paths::StateDir;
use herald_core::types::{EventKind, Role, ThreadKey};

use crate::store::MemoryStore;
use crate::types::{MemoryEvent, RetrievalRequest};

/// Ceiling for soul/tools sections in compact bootstraps. Memory and tail
/// are never truncated.
pub const COMPACT_PREAMBLE_MAX: usize = 800;

/// Thread-tail events included in a bootstrap context.
const BOOTSTRAP_TAIL_EVENTS: usize = 10;

/// Auto-section byte budget for the curated digest.
const DIGEST_MAX_BYTES: usize = 8 * 1024;

pub struct MemoryService {
    store: Arc<MemoryStore>,
    dir: StateDir,
    capture_max_chars: usize,
    curate_every: u32,
    captured: AtomicU32,
}

impl MemoryService {
    pub fn new(store: Arc<MemoryStore>, dir: StateDir, capture_max_chars: usize, curate_every: u32) -> Self {
        Self {
            store,
            dir,
            capture_max_chars,
            curate_every,
            captured: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Capture one conversational event: strip attachment tokens, truncate,
    /// append. Every `curate_every` captures a digest rebuild is spawned in
    /// the background. Fail-soft throughout.
    pub fn capture(&self, key: &ThreadKey, role: Role, kind: EventKind, text: &str) {
        let cleaned = strip_attachment_tokens(text);
        let stored = truncate_chars(cleaned.trim(), self.capture_max_chars);
        if stored.is_empty() {
            return;
        }
        self.store
            .append_event(&MemoryEvent::new(key, role, kind, stored));

        let n = self.captured.fetch_add(1, Ordering::Relaxed) + 1;
        if self.curate_every > 0 && n % self.curate_every == 0 {
            debug!(events = n, "capture count reached curation cadence");
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                if let Err(e) = store.curate(DIGEST_MAX_BYTES).await {
                    warn!("background curation failed: {e}");
                }
            });
        }
    }

    pub fn retrieve(&self, req: &RetrievalRequest) -> String {
        self.store.retrieve(req)
    }

    pub async fn curate_now(&self) -> crate::error::Result<crate::types::CurationState> {
        self.store.curate(DIGEST_MAX_BYTES).await
    }

    /// Assemble the bootstrap context for a new or rotated thread: soul,
    /// tools, curated memory, and the thread tail, each wrapped in explicit
    /// open/close markers. Compact mode caps soul and tools only.
    pub fn bootstrap(&self, key: &ThreadKey, compact: bool) -> String {
        let mut out = String::new();

        if let Some(soul) = self.read_preamble(&self.dir.soul_md(), compact) {
            push_section(&mut out, "soul", &soul);
        }
        if let Some(tools) = self.read_preamble(&self.dir.tools_md(), compact) {
            push_section(&mut out, "tools", &tools);
        }

        let digest = self.store.digest();
        if !digest.trim().is_empty() {
            push_section(&mut out, "memory", digest.trim());
        }

        let tail = self.store.tail(key, BOOTSTRAP_TAIL_EVENTS);
        if !tail.is_empty() {
            let mut recent = String::new();
            for event in &tail {
                recent.push_str(&format!(
                    "[{} {}] {}\n",
                    event.timestamp.format("%Y-%m-%d %H:%M"),
                    event.role,
                    event.text
                ));
            }
            push_section(&mut out, "recent", recent.trim_end());
        }

        out.trim_end().to_string()
    }

    fn read_preamble(&self, path: &std::path::Path, compact: bool) -> Option<String> {
        let raw = std::fs::read_to_string(path).ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(if compact {
            truncate_chars(trimmed, COMPACT_PREAMBLE_MAX)
        } else {
            trimmed.to_string()
        })
    }
}

fn push_section(out: &mut String, name: &str, body: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&format!("<{name}>\n{body}\n</{name}>"));
}

/// Remove `[attached …]` reference tokens the runner injects for media, so
/// file paths do not pile up in long-term memory.
fn strip_attachment_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let start = match (rest.find("[attached"), rest.find("[Attached")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match start {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find(']') {
                    Some(end) => rest = &rest[start + end + 1..],
                    None => return out,
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}
