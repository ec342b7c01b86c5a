use base64::Engine;
use serde::{Deserialize, Serialize};

pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Role label used by the Gemini `contents` array.
    pub fn gemini_label(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            // Persisted rows and vendor payloads use either label for replies.
            "assistant" | "model" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Name and type of a file attached to a user message. The payload itself is
/// only kept in the outbound request parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
}

/// A message in the visible transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub file: Option<FileMeta>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, file: Option<FileMeta>) -> Self {
        self.file = file;
        self
    }
}

/// A file supplied alongside a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn meta(&self) -> FileMeta {
        FileMeta {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    pub fn to_part(&self) -> RequestPart {
        RequestPart::InlineData {
            mime_type: self.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    /// Base64-encoded file payload.
    InlineData { mime_type: String, data: String },
}

impl RequestPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            RequestPart::Text(text) => Some(text),
            RequestPart::InlineData { .. } => None,
        }
    }
}

/// Ordered, non-empty list of parts making up one outbound user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts(Vec<RequestPart>);

impl RequestParts {
    pub fn new(parts: Vec<RequestPart>) -> Option<Self> {
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts))
        }
    }

    /// Build the parts for a user turn: the text (when not blank) followed by
    /// the attachment payload.
    pub fn from_input(text: &str, attachment: Option<&Attachment>) -> Option<Self> {
        let mut parts = Vec::new();
        if !text.trim().is_empty() {
            parts.push(RequestPart::Text(text.to_string()));
        }
        if let Some(attachment) = attachment {
            parts.push(attachment.to_part());
        }
        Self::new(parts)
    }

    pub fn as_slice(&self) -> &[RequestPart] {
        &self.0
    }

    /// Text parts joined with a single space.
    pub fn joined_text(&self) -> String {
        self.0
            .iter()
            .filter_map(RequestPart::text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replace every text part with `text`, keeping inline data in place. When
    /// there was no text part, the text is prepended.
    pub fn with_text(&self, text: String) -> Self {
        let mut parts: Vec<RequestPart> = self
            .0
            .iter()
            .filter(|part| part.text().is_none())
            .cloned()
            .collect();
        parts.insert(0, RequestPart::Text(text));
        Self(parts)
    }

    pub fn into_vec(self) -> Vec<RequestPart> {
        self.0
    }
}

/// One completed exchange entry resent with every subsequent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub parts: Vec<RequestPart>,
}

impl HistoryTurn {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![RequestPart::Text(content.into())],
        }
    }

    pub fn user(parts: Vec<RequestPart>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(RequestPart::text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}
