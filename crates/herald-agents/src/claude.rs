//! Adapter for the Claude Code CLI (`claude -p`), a single-JSON-envelope
//! agent. Format: `{"result":"...","session_id":"...","usage":{...}}`.

use serde_json::Value;

use crate::adapter::{AgentAdapter, CommandRequest, ParsedOutput, Usage};
use crate::envelope;

pub struct ClaudeAdapter {
    command: String,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self {
            command: "claude".to_string(),
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn id(&self) -> &str {
        "claude"
    }

    fn build_command(&self, req: &CommandRequest<'_>) -> String {
        let mut line = format!(
            "{} -p {} --output-format json",
            self.command,
            req.prompt_fragment()
        );
        if let Some(session) = req.session_fragment() {
            line.push_str(" --resume ");
            line.push_str(&session);
        }
        if let Some(model) = req.model.filter(|m| !m.is_empty()) {
            line.push_str(" --model ");
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
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let usage = env.get("usage").map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        });

        ParsedOutput {
            text,
            session_id: envelope::session_id(&env, &["session_id", "sessionId"]),
            saw_json: true,
            usage,
            cost_usd: env.get("total_cost_usd").and_then(Value::as_f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "b9f0c7f2-49e6-4a8e-9d5a-0a1b2c3d4e5f";

    #[test]
    fn command_references_prompt_expression() {
        let adapter = ClaudeAdapter::new();
        let req = CommandRequest {
            prompt: "secret",
            prompt_expression: Some("\"$HERALD_PROMPT\""),
            ..Default::default()
        };
        let line = adapter.build_command(&req);
        assert_eq!(line, "claude -p \"$HERALD_PROMPT\" --output-format json");
    }

    #[test]
    fn resume_and_model_flags_only_when_present() {
        let adapter = ClaudeAdapter::new();
        let req = CommandRequest {
            prompt: "hi",
            prompt_expression: Some("\"$HERALD_PROMPT\""),
            session_id: Some(SID),
            model: Some("claude-sonnet-4-6"),
            ..Default::default()
        };
        let line = adapter.build_command(&req);
        assert!(line.contains(&format!("--resume '{SID}'")));
        assert!(line.contains("--model 'claude-sonnet-4-6'"));

        let bare = adapter.build_command(&CommandRequest {
            prompt: "hi",
            model: Some(""),
            ..Default::default()
        });
        assert!(!bare.contains("--resume"));
        assert!(!bare.contains("--model"));
    }

    #[test]
    fn envelope_parse_extracts_all_fields() {
        let adapter = ClaudeAdapter::new();
        let raw = format!(
            r#"{{"result":"hola","session_id":"{SID}","usage":{{"input_tokens":100,"output_tokens":25}},"total_cost_usd":0.003}}"#
        );
        let parsed = adapter.parse_output(&raw);
        assert_eq!(parsed.text, "hola");
        assert_eq!(parsed.session_id.as_deref(), Some(SID));
        assert!(parsed.saw_json);
        assert_eq!(parsed.usage.unwrap().input_tokens, 100);
        assert_eq!(parsed.cost_usd, Some(0.003));
    }

    #[test]
    fn non_json_output_falls_back_to_trimmed_text() {
        let adapter = ClaudeAdapter::new();
        let parsed = adapter.parse_output("  Error: no conversation found with session id t-1  ");
        assert!(!parsed.saw_json);
        assert!(parsed.session_id.is_none());
        assert_eq!(
            parsed.text,
            "Error: no conversation found with session id t-1"
        );
    }

    #[test]
    fn parse_is_deterministic() {
        let adapter = ClaudeAdapter::new();
        let raw = r#"{"result":"x","usage":{"input_tokens":1,"output_tokens":2}}"#;
        assert_eq!(adapter.parse_output(raw), adapter.parse_output(raw));
    }
}
