//! Pass-through adapter for agents that just print text. No sessions, no
//! structured usage; the trimmed output is the answer.

use crate::adapter::{AgentAdapter, CommandRequest, ParsedOutput};

pub struct PlainAdapter {
    id: String,
    program: String,
    needs_pty: bool,
}

impl PlainAdapter {
    pub fn new(id: &str, program: &str) -> Self {
        Self {
            id: id.to_string(),
            program: program.to_string(),
            needs_pty: false,
        }
    }

    /// For agents that refuse to run without a terminal attached.
    pub fn with_pty(mut self) -> Self {
        self.needs_pty = true;
        self
    }
}

impl AgentAdapter for PlainAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn needs_pty(&self) -> bool {
        self.needs_pty
    }

    fn build_command(&self, req: &CommandRequest<'_>) -> String {
        let mut line = self.program.clone();
        if let Some(model) = req.model.filter(|m| !m.is_empty()) {
            line.push_str(" --model ");
            line.push_str(&crate::quote::shell_quote(model));
        }
        line.push(' ');
        line.push_str(&req.prompt_fragment());
        line
    }

    fn parse_output(&self, raw: &str) -> ParsedOutput {
        ParsedOutput {
            text: crate::envelope::strip_controls(raw).trim().to_string(),
            ..Default::default()
        }
    }
}
