//! Adapter for the Gemini CLI, a single-JSON-envelope agent that logs to
//! stderr. stderr is merged into stdout before parsing so the bottom-up
//! envelope scan sees the full picture.

use serde_json::Value;

use crate::adapter::{AgentAdapter, CommandRequest, ParsedOutput, Usage};
use crate::envelope;

pub struct GeminiAdapter {
    command: String,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            command: "gemini".to_string(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for GeminiAdapter {
    fn id(&self) -> &str {
        "gemini"
    }

    fn merge_stderr(&self) -> bool {
        true
    }

    fn build_command(&self, req: &CommandRequest<'_>) -> String {
        let mut line = format!("{} -p {} -o json", self.command, req.prompt_fragment());
        if let Some(session) = req.session_fragment() {
            line.push_str(" --resume ");
            line.push_str(&session);
        }
        if let Some(model) = req.model.filter(|m| !m.is_empty()) {
            line.push_str(" -m ");
            line.push_str(&crate::quote::shell_quote(model));
        }
        line
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        let Some(env) = envelope::parse(raw) else {
            return ParsedOutput {
                text: envelope::strip_controls(raw).trim().to_string(),
                ..Default::default()
            };
        };

        let text = env
            .get("response")
            .or_else(|| env.get("result"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let usage = env.get("usage").map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        });

        ParsedOutput {
            text,
            session_id: envelope::session_id(&env, &["sessionId", "session_id"]),
            saw_json: true,
            usage,
            cost_usd: None,
        }
    }

    fn list_sessions_command(&self) -> Option<String> {
        Some(format!("{} sessions list", self.command))
    }

    /// The listing prints one session per line, newest last; take the last
    /// UUID-shaped token.
    fn parse_session_list(&self, raw: &str) -> Option<String> {
        envelope::strip_controls(raw)
            .lines()
            .rev()
            .flat_map(|line| line.split_whitespace())
            .find(|token| uuid::Uuid::parse_str(token).is_ok())
            .map(str::to_string)
    }

    fn list_models_command(&self) -> Option<String> {
        Some(format!("{} models list", self.command))
    }

    fn parse_model_list(&self, raw: &str) -> Vec<String> {
        envelope::strip_controls(raw)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }
}
