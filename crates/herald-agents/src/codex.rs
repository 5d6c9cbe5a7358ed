//! Adapter for the Codex CLI (`codex exec --json`), a line-delimited JSON
//! event stream agent.

use crate::adapter::{AgentAdapter, CommandRequest, ParsedOutput};
use crate::stream;

pub struct CodexAdapter {
    command: String,
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self {
            command: "codex".to_string(),
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for CodexAdapter {
    fn id(&self) -> &str {
        "codex"
    }

    fn build_command(&self, req: &CommandRequest<'_>) -> String {
        let mut line = format!("{} exec", self.command);
        if let Some(session) = req.session_fragment() {
            line.push_str(" resume ");
            line.push_str(&session);
        }
        line.push_str(" --json");
        if let Some(model) = req.model.filter(|m| !m.is_empty()) {
            line.push_str(" -m ");
            line.push_str(&crate::quote::shell_quote(model));
        }
        if let Some(thinking) = req.thinking.filter(|t| !t.is_empty()) {
            line.push_str(" -c model_reasoning_effort=");
            line.push_str(&crate::quote::shell_quote(thinking));
        }
        line.push(' ');
        line.push_str(&req.prompt_fragment());
        line
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        let objects = stream::scan_objects(raw);
        if objects.is_empty() {
            return ParsedOutput {
                text: raw.trim().to_string(),
                ..Default::default()
            };
        }
        stream::extract_turn(&objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_has_no_resume() {
        let adapter = CodexAdapter::new();
        let line = adapter.build_command(&CommandRequest {
            prompt: "hola",
            prompt_expression: Some("\"$HERALD_PROMPT\""),
            ..Default::default()
        });
        assert_eq!(line, "codex exec --json \"$HERALD_PROMPT\"");
    }

    #[test]
    fn resume_model_and_thinking_flags() {
        let adapter = CodexAdapter::new();
        let line = adapter.build_command(&CommandRequest {
            prompt: "hola",
            prompt_expression: Some("\"$HERALD_PROMPT\""),
            session_id: Some("t-1"),
            model: Some("gpt-5.2-codex"),
            thinking: Some("high"),
            ..Default::default()
        });
        assert_eq!(
            line,
            "codex exec resume 't-1' --json -m 'gpt-5.2-codex' -c model_reasoning_effort='high' \"$HERALD_PROMPT\""
        );
    }

    #[test]
    fn stream_output_parses_session_and_text() {
        let adapter = CodexAdapter::new();
        let raw = concat!(
            r#"{"type":"thread.started","thread_id":"t-1"}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"Primera respuesta"}}"#,
            "\n",
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":5}}"#,
            "\n",
        );
        let parsed = adapter.parse_output(raw);
        assert_eq!(parsed.session_id.as_deref(), Some("t-1"));
        assert_eq!(parsed.text, "Primera respuesta");
        assert!(parsed.saw_json);
        assert_eq!(parsed.usage.unwrap().output_tokens, 5);
    }

    #[test]
    fn non_json_output_is_passed_through_trimmed() {
        let adapter = CodexAdapter::new();
        let parsed = adapter.parse_output("  plain words  ");
        assert_eq!(parsed.text, "plain words");
        assert!(!parsed.saw_json);
    }
}
