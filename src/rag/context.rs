use std::sync::Arc;

use async_trait::async_trait;

use super::embedding::Embedder;
use crate::backend::{Backend, MatchQuery};
use crate::core::chat::RagContextBuilder;
use crate::core::config::RagSettings;

const CHUNK_SEPARATOR: &str = "\n---\n";

/// Prepends the chatbot's best-matching knowledge chunks to the user's text.
pub struct KnowledgeRag {
    backend: Arc<dyn Backend>,
    embedder: Arc<dyn Embedder>,
    chatbot_id: String,
    match_threshold: f32,
    match_count: u32,
}

impl KnowledgeRag {
    pub fn new(
        backend: Arc<dyn Backend>,
        embedder: Arc<dyn Embedder>,
        chatbot_id: impl Into<String>,
        settings: &RagSettings,
    ) -> Self {
        Self {
            backend,
            embedder,
            chatbot_id: chatbot_id.into(),
            match_threshold: settings.match_threshold,
            match_count: settings.match_count,
        }
    }
}

pub fn compose_prompt(chunks: &[String], user_text: &str) -> String {
    format!(
        "[Reference material]\nThe following was found in the related knowledge documents:\n---\n{}\n---\n\nUsing the reference material above, answer the following question:\n{user_text}",
        chunks.join(CHUNK_SEPARATOR)
    )
}

#[async_trait]
impl RagContextBuilder for KnowledgeRag {
    async fn build_context(&self, user_text: &str) -> Option<String> {
        let query_embedding = match self.embedder.embed(user_text).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed; sending without context");
                return None;
            }
        };

        let query = MatchQuery {
            query_embedding,
            target_chatbot_id: self.chatbot_id.clone(),
            match_threshold: self.match_threshold,
            match_count: self.match_count,
        };
        let matches = match self.backend.match_knowledge_embeddings(&query).await {
            Ok(matches) => matches,
            Err(err) => {
                tracing::warn!(error = %err, "knowledge search failed; sending without context");
                return None;
            }
        };
        if matches.is_empty() {
            return None;
        }

        tracing::debug!(
            chatbot = %self.chatbot_id,
            matches = matches.len(),
            "attaching knowledge context"
        );
        let chunks: Vec<String> = matches.into_iter().map(|m| m.chunk_text).collect();
        Some(compose_prompt(&chunks, user_text))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::store::tests::MemoryBackend;
    use crate::backend::MatchedChunk;
    use crate::rag::embedding::EmbeddingError;

    /// Embeds every text as its length, or fails when told to.
    pub(crate) struct LengthEmbedder {
        pub fail: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::Network("offline".into()));
            }
            Ok(vec![text.chars().count() as f32])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::Network("offline".into()));
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32])
                .collect())
        }
    }

    fn chunk(text: &str) -> MatchedChunk {
        MatchedChunk {
            chunk_text: text.to_string(),
            similarity: 0.8,
        }
    }

    #[tokio::test]
    async fn matched_chunks_wrap_the_question() {
        let backend = Arc::new(MemoryBackend::default());
        *backend.matches.lock().unwrap() = vec![chunk("alpha"), chunk("beta")];
        let rag = KnowledgeRag::new(
            backend.clone(),
            Arc::new(LengthEmbedder { fail: false }),
            "b1",
            &RagSettings::default(),
        );

        let prompt = rag.build_context("why?").await.expect("context");
        assert!(prompt.contains("---\nalpha\n---\nbeta\n---"));
        assert!(prompt.ends_with("answer the following question:\nwhy?"));

        let queries = backend.queries.lock().unwrap().clone();
        assert_eq!(queries[0].query_embedding, vec![4.0]);
        assert_eq!(queries[0].target_chatbot_id, "b1");
        assert_eq!(queries[0].match_threshold, 0.5);
        assert_eq!(queries[0].match_count, 5);
    }

    #[tokio::test]
    async fn no_matches_means_no_context() {
        let backend = Arc::new(MemoryBackend::default());
        let rag = KnowledgeRag::new(
            backend,
            Arc::new(LengthEmbedder { fail: false }),
            "b1",
            &RagSettings::default(),
        );
        assert_eq!(rag.build_context("anything").await, None);
    }

    #[tokio::test]
    async fn embedding_failure_means_no_context() {
        let backend = Arc::new(MemoryBackend::default());
        *backend.matches.lock().unwrap() = vec![chunk("alpha")];
        let rag = KnowledgeRag::new(
            backend.clone(),
            Arc::new(LengthEmbedder { fail: true }),
            "b1",
            &RagSettings::default(),
        );
        assert_eq!(rag.build_context("anything").await, None);
        assert!(backend.queries.lock().unwrap().is_empty());
    }
}
