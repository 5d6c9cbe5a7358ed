use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Response substrings that suppress outbound delivery entirely.
pub const SILENT_TOKENS: [&str; 2] = ["HEARTBEAT_OK", "CURATION_EMPTY"];

/// In-memory cap for a job's live output ring.
pub const RING_CAP_BYTES: usize = 50 * 1024;

/// One scheduled invocation, persisted in `cron.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    /// Standard five-field cron expression.
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub prompt: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Target chat; falls back to the configured cron chat.
    pub chat_id: Option<i64>,
    pub topic_id: Option<String>,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
}

impl CronJob {
    pub fn new(cron: &str, prompt: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            cron: cron.to_string(),
            timezone: default_timezone(),
            prompt: prompt.to_string(),
            enabled: true,
            chat_id: None,
            topic_id: None,
            agent: None,
            model: None,
            cwd: None,
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn bool_true() -> bool {
    true
}

/// `{ jobs: [...] }`, the shape of `cron.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronFile {
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

/// Per-job run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Scheduled,
    Running,
    /// Running and streaming output into the ring.
    Logging,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Logging => write!(f, "logging"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bounded ring of live output chunks, oldest dropped first.
#[derive(Debug, Default)]
pub struct OutputRing {
    chunks: VecDeque<String>,
    bytes: usize,
}

impl OutputRing {
    pub fn push(&mut self, chunk: String) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > RING_CAP_BYTES {
            match self.chunks.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    pub fn contents(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// True when the response should not be delivered to the chat.
pub fn is_silent(response: &str) -> bool {
    SILENT_TOKENS.iter().any(|t| response.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_past_cap() {
        let mut ring = OutputRing::default();
        let chunk = "a".repeat(20 * 1024);
        for _ in 0..4 {
            ring.push(chunk.clone());
        }
        let contents = ring.contents();
        assert!(contents.len() <= RING_CAP_BYTES);
        assert!(!contents.is_empty());
    }

    #[test]
    fn silent_tokens_match_as_substrings() {
        assert!(is_silent("HEARTBEAT_OK"));
        assert!(is_silent("nothing new today — CURATION_EMPTY"));
        assert!(!is_silent("heartbeat ok"));
    }

    #[test]
    fn job_defaults_are_enabled_utc() {
        let job = CronJob::new("*/5 * * * *", "check the queue");
        assert!(job.enabled);
        assert_eq!(job.timezone, "UTC");
        assert_eq!(job.id.len(), 8);
    }
}
