use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::chat::CompletionSink;
use crate::core::message::{Message, Role, TokenUsage};

/// Plain-text transcript appended to after every finished turn (`--log`).
pub struct TranscriptLog {
    file_path: PathBuf,
    user_display_name: String,
}

impl TranscriptLog {
    pub fn open(
        path: impl Into<PathBuf>,
        user_display_name: impl Into<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let file_path = path.into();
        // Fail early when the file cannot be created or appended to
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?
            .flush()?;

        Ok(Self {
            file_path,
            user_display_name: user_display_name.into(),
        })
    }

    /// A `## `-prefixed marker line such as a conversation boundary.
    pub fn log_note(&self, note: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.append(&format!("## {note}"))
    }

    pub fn log_turn(
        &self,
        user: &Message,
        assistant: &Message,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.append(&self.render(user))?;
        if !assistant.content.is_empty() {
            self.append(&self.render(assistant))?;
        }
        Ok(())
    }

    fn render(&self, message: &Message) -> String {
        let mut text = match message.role {
            Role::User => format!("{}: {}", self.user_display_name, message.content),
            Role::Assistant => message.content.clone(),
        };
        if let Some(file) = &message.file {
            text.push_str(&format!("\n[attached {} ({})]", file.name, file.mime_type));
        }
        text
    }

    fn append(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        write_block(&mut writer, content)?;
        writer.flush()?;
        Ok(())
    }
}

/// Each line as-is followed by one blank separator line.
fn write_block(writer: &mut impl Write, content: &str) -> std::io::Result<()> {
    for line in content.lines() {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)
}

#[async_trait]
impl CompletionSink for TranscriptLog {
    async fn on_message_complete(&self, user: &Message, assistant: &Message, _usage: TokenUsage) {
        if let Err(err) = self.log_turn(user, assistant) {
            tracing::warn!(path = %self.file_path.display(), error = %err, "failed to write transcript");
        }
    }
}
