use std::path::{Path, PathBuf};

use crate::types::ThreadKey;

/// Root of all persisted state.
///
/// Resolution order: `HERALD_HOME` env override, else the platform config
/// dir (`~/.config/herald` on Linux), else `./.herald`.
#[derive(Debug, Clone)]
pub struct StateDir(PathBuf);

impl StateDir {
    pub fn resolve() -> Self {
        if let Ok(home) = std::env::var("HERALD_HOME") {
            if !home.is_empty() {
                return Self(PathBuf::from(home));
            }
        }
        match dirs::config_dir() {
            Some(dir) => Self(dir.join("herald")),
            None => Self(PathBuf::from(".herald")),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn root(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }

    /// Create the directory tree. Idempotent.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.memory_threads_dir())?;
        std::fs::create_dir_all(self.attachments_dir())?;
        Ok(())
    }

    pub fn settings_file(&self) -> PathBuf {
        self.join("config.json")
    }

    pub fn overrides_file(&self) -> PathBuf {
        self.join("agent-overrides.json")
    }

    pub fn threads_file(&self) -> PathBuf {
        self.join("threads.json")
    }

    pub fn usage_file(&self) -> PathBuf {
        self.join("usage.json")
    }

    pub fn cron_file(&self) -> PathBuf {
        self.join("cron.json")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.join("memory")
    }

    pub fn memory_threads_dir(&self) -> PathBuf {
        self.memory_dir().join("threads")
    }

    pub fn memory_state_file(&self) -> PathBuf {
        self.memory_dir().join("state.json")
    }

    pub fn memory_index_file(&self) -> PathBuf {
        self.memory_dir().join("index.db")
    }

    pub fn thread_log_file(&self, key: &ThreadKey) -> PathBuf {
        self.memory_threads_dir()
            .join(format!("{}.jsonl", key.file_stem()))
    }

    pub fn memory_md(&self) -> PathBuf {
        self.join("memory.md")
    }

    pub fn soul_md(&self) -> PathBuf {
        self.join("soul.md")
    }

    pub fn tools_md(&self) -> PathBuf {
        self.join("tools.md")
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.join("attachments")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, ChatId, ThreadKey, TopicId};

    #[test]
    fn layout_is_rooted() {
        let dir = StateDir::at("/tmp/herald-test");
        assert_eq!(dir.threads_file(), Path::new("/tmp/herald-test/threads.json"));
        assert_eq!(
            dir.memory_state_file(),
            Path::new("/tmp/herald-test/memory/state.json")
        );
    }

    #[test]
    fn thread_log_file_is_under_memory_threads() {
        let dir = StateDir::at("/tmp/herald-test");
        let key = ThreadKey::new(ChatId(5), TopicId::root(), AgentId::new("claude"));
        let path = dir.thread_log_file(&key);
        assert!(path.starts_with("/tmp/herald-test/memory/threads"));
        assert!(path.to_string_lossy().ends_with("5_root_claude.jsonl"));
    }
}
