use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    Backend, BackendError, Conversation, ConversationUpdate, NewMessage, StoredMessage,
    DEFAULT_CONVERSATION_TITLE,
};
use crate::core::chat::CompletionSink;
use crate::core::message::{Message, TokenUsage};

const TITLE_CHARS: usize = 30;

/// Persists finished turns into the active conversation, creating it on the
/// first turn.
pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    chatbot_id: Option<String>,
    current: Mutex<Option<Conversation>>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn Backend>, chatbot_id: Option<String>) -> Self {
        Self {
            backend,
            chatbot_id,
            current: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Option<Conversation> {
        self.current.lock().await.clone()
    }

    /// The next turn starts a new conversation row.
    pub async fn start_new(&self) {
        *self.current.lock().await = None;
    }

    /// Make `id` the active conversation and return its transcript.
    pub async fn resume(&self, id: &str) -> Result<(Conversation, Vec<Message>), BackendError> {
        let conversation = self
            .backend
            .list_conversations()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| BackendError::Http {
                status: 404,
                message: format!("conversation {id} not found"),
            })?;
        let rows = self.backend.load_messages(id).await?;
        *self.current.lock().await = Some(conversation.clone());
        Ok((conversation, StoredMessage::into_messages(rows)))
    }

    pub async fn record_turn(
        &self,
        user: &Message,
        assistant: &Message,
        usage: TokenUsage,
    ) -> Result<(), BackendError> {
        let mut current = self.current.lock().await;
        let conversation = match current.take() {
            Some(conversation) => conversation,
            None => {
                self.backend
                    .create_conversation(DEFAULT_CONVERSATION_TITLE, self.chatbot_id.as_deref())
                    .await?
            }
        };
        // Keep the row even if a later step fails.
        *current = Some(conversation.clone());

        self.backend
            .insert_messages(&[
                NewMessage::user(&conversation.id, &user.content),
                NewMessage::assistant(&conversation.id, &assistant.content, usage),
            ])
            .await?;

        let mut totals = conversation.usage();
        totals.accumulate(usage);
        let update = ConversationUpdate {
            title: (conversation.title == DEFAULT_CONVERSATION_TITLE)
                .then(|| title_from(&user.content)),
            total_prompt_tokens: Some(totals.prompt_tokens),
            total_completion_tokens: Some(totals.completion_tokens),
            total_tokens: Some(totals.total_tokens),
            updated_at: Some(Utc::now()),
        };
        self.backend
            .update_conversation(&conversation.id, &update)
            .await?;

        if let Some(active) = current.as_mut() {
            if let Some(title) = update.title {
                active.title = title;
            }
            active.total_prompt_tokens = totals.prompt_tokens;
            active.total_completion_tokens = totals.completion_tokens;
            active.total_tokens = totals.total_tokens;
            active.updated_at = update.updated_at;
        }
        Ok(())
    }
}

/// First 30 characters of the opening user message, with an ellipsis when cut.
pub fn title_from(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_CHARS {
        let head: String = text.chars().take(TITLE_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[async_trait]
impl CompletionSink for ConversationStore {
    async fn on_message_complete(&self, user: &Message, assistant: &Message, usage: TokenUsage) {
        if let Err(err) = self.record_turn(user, assistant, usage).await {
            tracing::warn!(error = %err, "failed to save messages");
        }
    }
}
