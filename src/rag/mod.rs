//! Retrieval over per-chatbot knowledge documents: chunking and embedding on
//! the way in, similarity lookup on every turn.

pub mod chunking;
pub mod context;
pub mod embedding;
pub mod ingest;

pub use context::KnowledgeRag;
pub use embedding::{Embedder, GeminiEmbedder};
pub use ingest::{ingest_documents, DocumentInput, IngestReport};
