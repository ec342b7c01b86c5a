use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    Backend, BackendError, Chatbot, ChatbotDraft, Conversation, ConversationUpdate,
    KnowledgeDocument, MatchQuery, MatchedChunk, NewEmbedding, NewKnowledgeDocument, NewMessage,
    StoredMessage,
};
use crate::core::chat_stream::error_message_from_body;
use crate::core::config::BackendSettings;
use crate::utils::url::{eq_filter, rest_rpc_url, rest_table_url};

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const CHATBOTS: &str = "custom_chatbots";
const KNOWLEDGE_DOCUMENTS: &str = "knowledge_documents";
const KNOWLEDGE_EMBEDDINGS: &str = "knowledge_embeddings";
const MATCH_FUNCTION: &str = "match_knowledge_embeddings";

pub const BACKEND_URL_ENV: &str = "PARLOR_BACKEND_URL";
pub const BACKEND_KEY_ENV: &str = "PARLOR_BACKEND_KEY";

/// PostgREST-style table API of a hosted project.
pub struct RestBackend {
    client: reqwest::Client,
    project_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(
        client: reqwest::Client,
        project_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            project_url: project_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Settings from the config file, each overridable from the environment.
    pub fn from_settings(
        client: reqwest::Client,
        settings: &BackendSettings,
    ) -> Result<Self, BackendError> {
        let pick = |env: &str, configured: &Option<String>| {
            std::env::var(env)
                .ok()
                .or_else(|| configured.clone())
                .filter(|value| !value.trim().is_empty())
        };
        match (
            pick(BACKEND_URL_ENV, &settings.url),
            pick(BACKEND_KEY_ENV, &settings.anon_key),
        ) {
            (Some(url), Some(key)) => Ok(Self::new(client, url, key)),
            _ => Err(BackendError::NotConfigured),
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, rest_table_url(&self.project_url, table))
    }

    async fn send(request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_message_from_body(status, &body);
        tracing::debug!(status = status.as_u16(), %message, "backend request rejected");
        Err(BackendError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
        Self::send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))
    }

    /// Insert one row and return the stored representation.
    async fn insert_returning<B, T>(&self, table: &str, row: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .table(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(row);
        let mut rows: Vec<T> = Self::fetch(request).await?;
        if rows.is_empty() {
            return Err(BackendError::Decode(format!(
                "insert into {table} returned no row"
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn insert_many<B: Serialize>(&self, table: &str, rows: &[B]) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        let request = self
            .table(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(rows);
        Self::send(request).await.map(|_| ())
    }

    async fn patch<B: Serialize + ?Sized>(
        &self,
        table: &str,
        id: &str,
        body: &B,
    ) -> Result<(), BackendError> {
        let request = self
            .table(Method::PATCH, table)
            .query(&[("id", eq_filter(id))])
            .json(body);
        Self::send(request).await.map(|_| ())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), BackendError> {
        let request = self
            .table(Method::DELETE, table)
            .query(&[("id", eq_filter(id))]);
        Self::send(request).await.map(|_| ())
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, BackendError> {
        let request = self.table(Method::GET, CONVERSATIONS).query(&[
            (
                "select",
                "id,chatbot_id,title,total_prompt_tokens,total_completion_tokens,total_tokens,created_at,updated_at",
            ),
            ("order", "updated_at.desc"),
        ]);
        Self::fetch(request).await
    }

    async fn create_conversation(
        &self,
        title: &str,
        chatbot_id: Option<&str>,
    ) -> Result<Conversation, BackendError> {
        let row = serde_json::json!({ "title": title, "chatbot_id": chatbot_id });
        self.insert_returning(CONVERSATIONS, &row).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        update: &ConversationUpdate,
    ) -> Result<(), BackendError> {
        self.patch(CONVERSATIONS, id, update).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), BackendError> {
        self.delete(CONVERSATIONS, id).await
    }

    async fn load_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, BackendError> {
        let request = self.table(Method::GET, MESSAGES).query(&[
            ("select", "id,role,content,created_at".to_string()),
            ("conversation_id", eq_filter(conversation_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        Self::fetch(request).await
    }

    async fn insert_messages(&self, rows: &[NewMessage]) -> Result<(), BackendError> {
        self.insert_many(MESSAGES, rows).await
    }

    async fn list_chatbots(&self) -> Result<Vec<Chatbot>, BackendError> {
        let request = self
            .table(Method::GET, CHATBOTS)
            .query(&[("select", "*"), ("order", "created_at.asc")]);
        Self::fetch(request).await
    }

    async fn create_chatbot(&self, draft: &ChatbotDraft) -> Result<Chatbot, BackendError> {
        self.insert_returning(CHATBOTS, draft).await
    }

    async fn update_chatbot(&self, id: &str, draft: &ChatbotDraft) -> Result<(), BackendError> {
        self.patch(CHATBOTS, id, draft).await
    }

    async fn delete_chatbot(&self, id: &str) -> Result<(), BackendError> {
        self.delete(CHATBOTS, id).await
    }

    async fn insert_knowledge_document(
        &self,
        document: &NewKnowledgeDocument,
    ) -> Result<KnowledgeDocument, BackendError> {
        self.insert_returning(KNOWLEDGE_DOCUMENTS, document).await
    }

    async fn insert_knowledge_embeddings(&self, rows: &[NewEmbedding]) -> Result<(), BackendError> {
        self.insert_many(KNOWLEDGE_EMBEDDINGS, rows).await
    }

    async fn match_knowledge_embeddings(
        &self,
        query: &MatchQuery,
    ) -> Result<Vec<MatchedChunk>, BackendError> {
        let request = self
            .request(Method::POST, rest_rpc_url(&self.project_url, MATCH_FUNCTION))
            .json(query);
        Self::fetch(request).await
    }
}
