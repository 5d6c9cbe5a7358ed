//! The adapter strategy: one implementation per CLI agent, covering command
//! construction and output parsing. Optional capabilities (session listing,
//! model listing) are exposed through query methods that default to `None`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::stale;

/// Env var carrying the assembled prompt into the agent subprocess.
pub const ENV_PROMPT: &str = "HERALD_PROMPT";
/// Env var carrying the session id to resume.
pub const ENV_SESSION_ID: &str = "HERALD_SESSION_ID";

/// Inputs for [`AgentAdapter::build_command`].
///
/// When an `*_expression` is present the adapter embeds it verbatim (the
/// value travels through the matching env var); otherwise the raw value is
/// inlined with POSIX single-quote escaping.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest<'a> {
    pub prompt: &'a str,
    pub prompt_expression: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub session_id_expression: Option<&'a str>,
    pub model: Option<&'a str>,
    pub thinking: Option<&'a str>,
}

impl<'a> CommandRequest<'a> {
    /// The prompt fragment to embed in the command line.
    pub fn prompt_fragment(&self) -> String {
        match self.prompt_expression {
            Some(expr) => expr.to_string(),
            None => crate::quote::shell_quote(self.prompt),
        }
    }

    /// The session-id fragment, if a session is being resumed.
    pub fn session_fragment(&self) -> Option<String> {
        match (self.session_id_expression, self.session_id) {
            (Some(expr), _) => Some(expr.to_string()),
            (None, Some(id)) => Some(crate::quote::shell_quote(id)),
            (None, None) => None,
        }
    }
}

/// Structured token usage reported by an agent, when its protocol carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of parsing one agent invocation's stdout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedOutput {
    pub text: String,
    pub session_id: Option<String>,
    /// True when at least one JSON object was recognised in the output.
    pub saw_json: bool,
    pub usage: Option<Usage>,
    pub cost_usd: Option<f64>,
}

/// Per-agent strategy. Implementations must be deterministic: identical raw
/// bytes into [`parse_output`](Self::parse_output) produce identical results.
pub trait AgentAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Whether stdin/stdout must be attached to a pseudo-terminal.
    fn needs_pty(&self) -> bool {
        false
    }

    /// Whether stderr is folded into stdout before parsing.
    fn merge_stderr(&self) -> bool {
        false
    }

    fn build_command(&self, req: &CommandRequest<'_>) -> String;

    fn parse_output(&self, raw: &str) -> ParsedOutput;

    /// Command that lists this agent's recent sessions, newest last.
    fn list_sessions_command(&self) -> Option<String> {
        None
    }

    /// Extract the most recent session id from a session listing.
    fn parse_session_list(&self, _raw: &str) -> Option<String> {
        None
    }

    fn list_models_command(&self) -> Option<String> {
        None
    }

    fn parse_model_list(&self, _raw: &str) -> Vec<String> {
        Vec::new()
    }

    /// Whether `raw` looks like a dead-session rejection. Only consulted when
    /// a session id was in use; adapters that produced JSON are never stale.
    fn is_stale_session_output(&self, raw: &str, parsed: &ParsedOutput) -> bool {
        !parsed.saw_json && stale::phrase_match(raw)
    }
}

/// Lookup table of the known adapters.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in agents.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(crate::claude::ClaudeAdapter::new()));
        reg.register(Arc::new(crate::codex::CodexAdapter::new()));
        reg.register(Arc::new(crate::gemini::GeminiAdapter::new()));
        reg.register(Arc::new(crate::plain::PlainAdapter::new(
            "opencode",
            "opencode run",
        )));
        reg
    }

    pub fn register(&mut self, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.get(id).cloned()
    }

    /// Known agent ids, sorted for stable display.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
