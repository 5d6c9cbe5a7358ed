use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (herald.toml + HERALD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeraldConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot API token. Missing or empty is fatal at startup.
    #[serde(default)]
    pub bot_token: String,
    /// Allowed Telegram user ids. Empty list permits everyone.
    #[serde(default)]
    pub allow_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent used when neither a per-topic override nor an explicit
    /// request names one.
    #[serde(default = "default_agent")]
    pub default: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default: default_agent(),
        }
    }
}

fn default_agent() -> String {
    "claude".to_string()
}

impl HeraldConfig {
    /// Load config from a TOML file with HERALD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. HERALD_CONFIG env var
    ///   3. <state dir>/herald.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("HERALD_CONFIG").ok())
            .unwrap_or_else(|| {
                crate::paths::StateDir::resolve()
                    .join("herald.toml")
                    .to_string_lossy()
                    .into_owned()
            });

        let config: HeraldConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HERALD_").split("__"))
            .extract()
            .map_err(|e| crate::error::HeraldError::Config(e.to_string()))?;

        Ok(config)
    }
}

/// Runtime tuning knobs, read from bare environment variables over serde
/// defaults. Every value falls back to its default on parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// Wall-clock limit for one agent subprocess.
    pub agent_timeout_ms: u64,
    /// Output buffer cap per subprocess, in bytes.
    pub agent_max_buffer: usize,
    /// Re-emit file/style instructions every N turns on a continuing thread.
    pub file_instructions_every: u32,
    /// Trigger digest curation every N captured events.
    pub memory_curate_every: u32,
    /// Max events returned by the memory retriever.
    pub memory_retrieval_limit: usize,
    /// Captured event text is truncated to this many characters.
    pub memory_capture_max_chars: usize,
    /// Rotate the thread after this many turns (0 disables).
    pub thread_rotation_turns: u32,
    /// Rotate the thread once the accumulated context reaches this many
    /// characters (0 disables).
    pub thread_max_context_chars: usize,
    /// Daily token budget across all chats (0 = unlimited).
    pub token_budget_daily: u64,
    /// Cron jobs are skipped once the budget reaches this percentage.
    pub cron_budget_gate_pct: f64,
    /// Downloaded attachments older than this are reaped.
    pub attachment_ttl_hours: u64,
    /// Cadence of the attachment reaper.
    pub attachment_cleanup_interval_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            agent_timeout_ms: 300_000,
            agent_max_buffer: 10 * 1024 * 1024,
            file_instructions_every: 5,
            memory_curate_every: 20,
            memory_retrieval_limit: 6,
            memory_capture_max_chars: 2_000,
            thread_rotation_turns: 0,
            thread_max_context_chars: 150_000,
            token_budget_daily: 0,
            cron_budget_gate_pct: 90.0,
            attachment_ttl_hours: 24,
            attachment_cleanup_interval_ms: 3_600_000,
        }
    }
}

const TUNING_VARS: &[&str] = &[
    "AGENT_TIMEOUT_MS",
    "AGENT_MAX_BUFFER",
    "FILE_INSTRUCTIONS_EVERY",
    "MEMORY_CURATE_EVERY",
    "MEMORY_RETRIEVAL_LIMIT",
    "MEMORY_CAPTURE_MAX_CHARS",
    "THREAD_ROTATION_TURNS",
    "THREAD_MAX_CONTEXT_CHARS",
    "TOKEN_BUDGET_DAILY",
    "CRON_BUDGET_GATE_PCT",
    "ATTACHMENT_TTL_HOURS",
    "ATTACHMENT_CLEANUP_INTERVAL_MS",
];

impl Tuning {
    /// Read the documented knobs from the environment, defaults otherwise.
    pub fn from_env() -> Self {
        Figment::from(Serialized::defaults(Tuning::default()))
            .merge(Env::raw().only(TUNING_VARS))
            .extract()
            .unwrap_or_else(|e| {
                tracing::warn!("tuning env parse failed ({e}), using defaults");
                Tuning::default()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_are_sane() {
        let t = Tuning::default();
        assert!(t.agent_timeout_ms > 0);
        assert!(t.file_instructions_every > 0);
        assert_eq!(t.thread_rotation_turns, 0);
        assert_eq!(t.token_budget_daily, 0);
    }

    #[test]
    fn config_defaults_use_claude() {
        let c = HeraldConfig::default();
        assert_eq!(c.agent.default, "claude");
        assert!(c.telegram.bot_token.is_empty());
        assert!(c.telegram.allow_users.is_empty());
    }
}
