pub mod sync;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub details: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            details: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn render_text(&self) -> String {
        let mut out = format!("{}\n", self.command);
        for detail in &self.details {
            out.push_str("  ");
            out.push_str(detail);
            out.push('\n');
        }
        out
    }
}
