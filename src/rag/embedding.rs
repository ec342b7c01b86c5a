use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::gemini::{
    BatchEmbedContentsRequest, BatchEmbedContentsResponse, EmbedContent, EmbedContentRequest,
    EmbedContentResponse, Part,
};
use crate::core::chat_stream::error_message_from_body;
use crate::core::config::RagSettings;
use crate::utils::url::construct_api_url;

#[derive(Debug)]
pub enum EmbeddingError {
    Http { status: u16, message: String },
    Network(String),
    /// The response carried no usable vector.
    Empty,
    Decode(String),
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::Http { status, message } => write!(f, "{status} {message}"),
            EmbeddingError::Network(message) => write!(f, "network error: {message}"),
            EmbeddingError::Empty => write!(f, "embedding response contained no values"),
            EmbeddingError::Decode(message) => write!(f, "invalid embedding response: {message}"),
        }
    }
}

impl Error for EmbeddingError {}

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One vector per input, in order. Entries the upstream left empty come
    /// back as empty vectors.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: u32,
}

impl GeminiEmbedder {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: &RagSettings,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: settings.embedding_model.clone(),
            dimensions: settings.dimensions,
        }
    }

    fn request_for(&self, text: &str, with_model: bool) -> EmbedContentRequest {
        EmbedContentRequest {
            model: with_model.then(|| format!("models/{}", self.model)),
            content: EmbedContent {
                parts: vec![Part::Text {
                    text: text.to_string(),
                }],
            },
            output_dimensionality: self.dimensions,
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, EmbeddingError> {
        let url = construct_api_url(&self.base_url, &format!("models/{}:{method}", self.model));
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| EmbeddingError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                message: error_message_from_body(status, &body),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| EmbeddingError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response: EmbedContentResponse = self
            .post("embedContent", &self.request_for(text, false))
            .await?;
        response
            .embedding
            .map(|embedding| embedding.values)
            .filter(|values| !values.is_empty())
            .ok_or(EmbeddingError::Empty)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| self.request_for(text, true))
                .collect(),
        };
        let response: BatchEmbedContentsResponse =
            self.post("batchEmbedContents", &request).await?;
        tracing::debug!(
            requested = texts.len(),
            returned = response.embeddings.len(),
            "batch embedding finished"
        );

        let mut vectors: Vec<Vec<f32>> = response
            .embeddings
            .into_iter()
            .map(|embedding| embedding.values)
            .collect();
        vectors.resize(texts.len(), Vec::new());
        Ok(vectors)
    }
}
