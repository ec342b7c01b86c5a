//! Hosted persistence: conversations, their messages, chatbot profiles and the
//! knowledge documents used for retrieval.

pub mod rest;
pub mod store;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::{Message, MessageId, Role, TokenUsage};
use crate::core::persona::Persona;

pub use rest::RestBackend;
pub use store::ConversationStore;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

#[derive(Debug)]
pub enum BackendError {
    /// No project URL or key was configured.
    NotConfigured,
    Http { status: u16, message: String },
    Network(String),
    Decode(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotConfigured => write!(
                f,
                "backend is not configured (set [backend] url and anon_key, or PARLOR_BACKEND_URL and PARLOR_BACKEND_KEY)"
            ),
            BackendError::Http { status, message } => {
                write!(f, "backend returned {status}: {message}")
            }
            BackendError::Network(message) => write!(f, "backend unreachable: {message}"),
            BackendError::Decode(message) => write!(f, "unexpected backend response: {message}"),
        }
    }
}

impl Error for BackendError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub chatbot_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub total_prompt_tokens: u64,
    #[serde(default)]
    pub total_completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.total_prompt_tokens,
            self.total_completion_tokens,
            self.total_tokens,
        )
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredMessage {
    pub id: serde_json::Value,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    /// Convert stored rows into transcript messages with fresh local ids.
    pub fn into_messages(rows: Vec<StoredMessage>) -> Vec<Message> {
        rows.into_iter()
            .zip(1..)
            .map(|(row, id): (StoredMessage, MessageId)| Message::new(id, row.role, row.content))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl NewMessage {
    pub fn user(conversation_id: &str, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        }
    }

    pub fn assistant(conversation_id: &str, content: &str, usage: TokenUsage) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            prompt_tokens: Some(usage.prompt_tokens),
            completion_tokens: Some(usage.completion_tokens),
            total_tokens: Some(usage.total_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chatbot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub avatar_emoji: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Chatbot {
    /// Profiles carry no greetings or wait lines of their own; the built-in
    /// ones are used.
    pub fn to_persona(&self) -> Persona {
        let builtin = Persona::builtin_default();
        Persona {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            system_prompt: self.system_prompt.clone(),
            avatar_emoji: self.avatar_emoji.clone(),
            greetings: builtin.greetings,
            wait_messages: builtin.wait_messages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatbotDraft {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub avatar_emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub chatbot_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewKnowledgeDocument {
    pub chatbot_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEmbedding {
    pub document_id: String,
    pub chatbot_id: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchedChunk {
    pub chunk_text: String,
    #[serde(default)]
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchQuery {
    pub query_embedding: Vec<f32>,
    pub target_chatbot_id: String,
    pub match_threshold: f32,
    pub match_count: u32,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, BackendError>;
    async fn create_conversation(
        &self,
        title: &str,
        chatbot_id: Option<&str>,
    ) -> Result<Conversation, BackendError>;
    async fn update_conversation(
        &self,
        id: &str,
        update: &ConversationUpdate,
    ) -> Result<(), BackendError>;
    async fn delete_conversation(&self, id: &str) -> Result<(), BackendError>;

    /// Oldest first.
    async fn load_messages(&self, conversation_id: &str)
        -> Result<Vec<StoredMessage>, BackendError>;
    async fn insert_messages(&self, rows: &[NewMessage]) -> Result<(), BackendError>;

    /// Oldest first.
    async fn list_chatbots(&self) -> Result<Vec<Chatbot>, BackendError>;
    async fn create_chatbot(&self, draft: &ChatbotDraft) -> Result<Chatbot, BackendError>;
    async fn update_chatbot(&self, id: &str, draft: &ChatbotDraft) -> Result<(), BackendError>;
    async fn delete_chatbot(&self, id: &str) -> Result<(), BackendError>;

    async fn insert_knowledge_document(
        &self,
        document: &NewKnowledgeDocument,
    ) -> Result<KnowledgeDocument, BackendError>;
    async fn insert_knowledge_embeddings(&self, rows: &[NewEmbedding]) -> Result<(), BackendError>;
    async fn match_knowledge_embeddings(
        &self,
        query: &MatchQuery,
    ) -> Result<Vec<MatchedChunk>, BackendError>;
}
