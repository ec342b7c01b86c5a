//! Line-oriented rendering of chat events for the terminal commands.

use std::io::{self, Write};

use crate::core::chat::ChatEvent;
use crate::core::message::{Message, MessageId, Role, TokenUsage};

/// Writes streamed assistant text as it grows and reports failures on a
/// separate error writer.
pub struct EventPrinter<W: Write, E: Write> {
    out: W,
    err: E,
    avatar: String,
    /// Assistant message currently on screen and what has been printed of it.
    active: Option<(MessageId, String)>,
    failed: bool,
    /// Retry notices go to `err` instead of replacing the streamed line.
    notices_on_err: bool,
    waiting: bool,
}

impl<W: Write, E: Write> EventPrinter<W, E> {
    pub fn new(out: W, err: E, avatar: impl Into<String>) -> Self {
        Self {
            out,
            err,
            avatar: avatar.into(),
            active: None,
            failed: false,
            notices_on_err: false,
            waiting: false,
        }
    }

    /// Keep `out` to the reply alone, for output that may be piped.
    pub fn with_notices_on_err(mut self) -> Self {
        self.notices_on_err = true;
        self
    }

    /// Whether an error was reported since the last call.
    pub fn take_failed(&mut self) -> bool {
        std::mem::take(&mut self.failed)
    }

    pub fn handle(&mut self, event: &ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::MessageAdded(message) if message.role == Role::Assistant => {
                self.end_line()?;
                write!(self.out, "{}{}", self.prefix(), message.content)?;
                self.active = Some((message.id, message.content.clone()));
            }
            ChatEvent::MessageAdded(_) => {}
            ChatEvent::MessageUpdated { id, content } => self.update(*id, content)?,
            ChatEvent::MessageRemoved(id) => {
                if self.active.as_ref().is_some_and(|(active, _)| active == id) {
                    writeln!(self.out)?;
                    self.active = None;
                }
            }
            ChatEvent::RetryScheduled { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
                self.waiting = true;
            }
            ChatEvent::ErrorSet(message) => {
                self.end_line()?;
                writeln!(self.err, "❌ {message}")?;
                self.failed = true;
            }
            ChatEvent::Completed { .. } => self.end_line()?,
        }
        self.out.flush()
    }

    fn update(&mut self, id: MessageId, content: &str) -> io::Result<()> {
        let prefix = self.prefix();
        let Some((active, shown)) = self.active.as_mut() else {
            return Ok(());
        };
        if *active != id {
            return Ok(());
        }
        if self.waiting {
            if !content.is_empty() && self.notices_on_err {
                let notice: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
                writeln!(self.err, "⏳ {}", notice.join(" "))?;
                return Ok(());
            }
            // An emptied placeholder starts the next attempt.
            self.waiting = !content.is_empty();
        }
        match content.strip_prefix(shown.as_str()) {
            Some(suffix) => write!(self.out, "{suffix}")?,
            None => {
                // The text was replaced (a retry notice or its reset); start over.
                writeln!(self.out)?;
                write!(self.out, "{prefix}{content}")?;
            }
        }
        *shown = content.to_string();
        Ok(())
    }

    fn prefix(&self) -> String {
        if self.avatar.is_empty() {
            String::new()
        } else {
            format!("{} ", self.avatar)
        }
    }

    /// Close the open assistant line, if any.
    pub fn end_line(&mut self) -> io::Result<()> {
        if self.active.take().is_some() {
            writeln!(self.out)?;
        }
        Ok(())
    }
}

/// A stored or loaded transcript, one message per block.
pub fn print_transcript<W: Write>(
    out: &mut W,
    messages: &[Message],
    avatar: &str,
) -> io::Result<()> {
    for message in messages {
        let prefix = match message.role {
            Role::User => "You:",
            Role::Assistant => avatar,
        };
        writeln!(out, "{prefix} {}", message.content)?;
        if let Some(file) = &message.file {
            writeln!(out, "    [attached {} ({})]", file.name, file.mime_type)?;
        }
    }
    Ok(())
}

pub fn format_usage(usage: &TokenUsage) -> String {
    format!(
        "Tokens: {} prompt + {} completion = {} total",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn printer() -> EventPrinter<Vec<u8>, Vec<u8>> {
        EventPrinter::new(Vec::new(), Vec::new(), "🛋️")
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn streamed_reply_prints_only_new_text() {
        let mut p = printer();
        p.handle(&ChatEvent::MessageAdded(Message::new(2, Role::Assistant, "")))
            .unwrap();
        for content in ["Hi", "Hi there", "Hi there!"] {
            p.handle(&ChatEvent::MessageUpdated {
                id: 2,
                content: content.into(),
            })
            .unwrap();
        }
        p.handle(&ChatEvent::Completed {
            usage: TokenUsage::default(),
        })
        .unwrap();

        assert_eq!(text(&p.out), "🛋️ Hi there!\n");
        assert!(!p.take_failed());
    }

    #[test]
    fn retry_notice_is_replaced_on_a_fresh_line() {
        let mut p = printer();
        p.handle(&ChatEvent::MessageAdded(Message::new(2, Role::Assistant, "")))
            .unwrap();
        p.handle(&ChatEvent::RetryScheduled {
            attempt: 1,
            delay: Duration::from_secs(5),
        })
        .unwrap();
        p.handle(&ChatEvent::MessageUpdated {
            id: 2,
            content: "Busy.\n\n(Retrying in 5s... 1/3)".into(),
        })
        .unwrap();
        p.handle(&ChatEvent::MessageUpdated {
            id: 2,
            content: String::new(),
        })
        .unwrap();
        p.handle(&ChatEvent::MessageUpdated {
            id: 2,
            content: "Ok".into(),
        })
        .unwrap();

        assert_eq!(
            text(&p.out),
            "🛋️ Busy.\n\n(Retrying in 5s... 1/3)\n🛋️ Ok"
        );
    }

    #[test]
    fn retry_notice_can_go_to_the_error_writer() {
        let mut p = EventPrinter::new(Vec::new(), Vec::new(), "").with_notices_on_err();
        p.handle(&ChatEvent::MessageAdded(Message::new(2, Role::Assistant, "")))
            .unwrap();
        let updates = [
            "Busy.\n\n(Retrying in 5s... 1/3)",
            "",
            "Answer",
        ];
        p.handle(&ChatEvent::RetryScheduled {
            attempt: 1,
            delay: Duration::from_secs(5),
        })
        .unwrap();
        for content in updates {
            p.handle(&ChatEvent::MessageUpdated {
                id: 2,
                content: content.into(),
            })
            .unwrap();
        }
        p.end_line().unwrap();

        assert_eq!(text(&p.out), "Answer\n");
        assert_eq!(text(&p.err), "⏳ Busy. (Retrying in 5s... 1/3)\n");
    }

    #[test]
    fn empty_avatar_prints_bare_text() {
        let mut p = EventPrinter::new(Vec::new(), Vec::new(), "");
        p.handle(&ChatEvent::MessageAdded(Message::new(2, Role::Assistant, "")))
            .unwrap();
        p.handle(&ChatEvent::MessageUpdated {
            id: 2,
            content: "Plain".into(),
        })
        .unwrap();
        assert_eq!(text(&p.out), "Plain");
    }

    #[test]
    fn errors_go_to_the_error_writer() {
        let mut p = printer();
        p.handle(&ChatEvent::MessageAdded(Message::new(2, Role::Assistant, "")))
            .unwrap();
        p.handle(&ChatEvent::MessageRemoved(2)).unwrap();
        p.handle(&ChatEvent::ErrorSet("boom".into())).unwrap();

        assert_eq!(text(&p.out), "🛋️ \n");
        assert_eq!(text(&p.err), "❌ boom\n");
        assert!(p.take_failed());
        assert!(!p.take_failed());
    }

    #[test]
    fn transcript_marks_attachments() {
        let mut out = Vec::new();
        let user = Message::new(1, Role::User, "look").with_file(Some(
            crate::core::message::FileMeta {
                name: "cat.png".into(),
                mime_type: "image/png".into(),
            },
        ));
        print_transcript(&mut out, &[user, Message::new(2, Role::Assistant, "cute")], "🤖")
            .unwrap();
        assert_eq!(
            text(&out),
            "You: look\n    [attached cat.png (image/png)]\n🤖 cute\n"
        );
    }
}
