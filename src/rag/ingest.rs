use super::chunking::{chunk_text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use super::embedding::Embedder;
use crate::backend::{Backend, NewEmbedding, NewKnowledgeDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Titles of documents that could not be stored or embedded.
    pub failed: Vec<String>,
}

/// Store each document, then chunk, embed and index it for `chatbot_id`.
/// A failing document is logged and skipped; the rest still go in.
pub async fn ingest_documents(
    backend: &dyn Backend,
    embedder: &dyn Embedder,
    chatbot_id: &str,
    documents: &[DocumentInput],
) -> IngestReport {
    let mut report = IngestReport::default();

    for document in documents {
        let saved = match backend
            .insert_knowledge_document(&NewKnowledgeDocument {
                chatbot_id: chatbot_id.to_string(),
                title: document.title.clone(),
                content: document.content.clone(),
            })
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                tracing::warn!(title = %document.title, error = %err, "failed to store knowledge document");
                report.failed.push(document.title.clone());
                continue;
            }
        };
        report.documents += 1;

        let chunks = chunk_text(&document.content, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
        if chunks.is_empty() {
            continue;
        }

        let vectors = match embedder.embed_batch(&chunks).await {
            Ok(vectors) => vectors,
            Err(err) => {
                tracing::warn!(title = %document.title, error = %err, "failed to embed knowledge document");
                report.failed.push(document.title.clone());
                continue;
            }
        };

        let rows: Vec<NewEmbedding> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .filter(|(_, (_, vector))| !vector.is_empty())
            .map(|(chunk_index, (chunk_text, embedding))| NewEmbedding {
                document_id: saved.id.clone(),
                chatbot_id: chatbot_id.to_string(),
                chunk_index,
                chunk_text,
                embedding,
            })
            .collect();
        if rows.is_empty() {
            continue;
        }

        match backend.insert_knowledge_embeddings(&rows).await {
            Ok(()) => report.chunks += rows.len(),
            Err(err) => {
                tracing::warn!(title = %document.title, error = %err, "failed to store embeddings");
                report.failed.push(document.title.clone());
            }
        }
    }

    report
}
