pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod entities;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod logger;
pub mod models;
pub mod qa;
pub mod retry;
pub mod session;

#[cfg(test)]
mod testing;

pub use chunking::{build_chunks, chunk_text, normalize_whitespace, ChunkingConfig};
pub use config::{EmbeddingConfig, GenerationConfig, QaConfig};
pub use context::{EMPTY_QUESTION_ANSWER, IRRELEVANT_ANSWER, NO_INDEX_ANSWER};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use entities::{entity_answer, extract_entities, EntityKind, EntitySet, ENTITY_TRIGGERS};
pub use error::{
    ConfigError, EmbeddingError, GenerationError, IndexError, IngestError, SessionError,
};
pub use extractor::{extract_document, extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{ChatCompletionsClient, FragmentStream, GenerationRequest, GenerationService};
pub use index::{Metric, VectorStore};
pub use ingest::{
    discover_pdf_files, index_path_for, ingest_document, ingest_folder_best_effort,
    FolderIngestionReport, IngestionReport, SkippedPdf,
};
pub use logger::InteractionLogger;
pub use models::{Answer, AnswerRoute, Chunk, DocumentFingerprint, PageImage, SearchHit, SourceRef};
pub use qa::QaEngine;
pub use retry::{with_retry, RetryPolicy};
pub use session::{Message, Role, Session, SessionRegistry};
