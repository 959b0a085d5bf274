//! sop-rag - 문서 코퍼스 하이브리드 검색 + 스트리밍 답변
//!
//! 질문에서 날짜/이름/레코드 코드를 뽑아 메타데이터를 먼저 정확 조회하고,
//! 없으면 벡터 유사도 검색으로 넘어간 뒤, 생성 모델 답변을 출처와 함께
//! NDJSON 이벤트로 스트리밍합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;

#[cfg(test)]
mod test_support;

// Re-exports
pub use config::{get_data_dir, EmbedMode, RagConfig};
pub use embedding::{create_embedder, EmbeddingProvider, OllamaEmbedding};
pub use error::{
    BuildError, BuildStage, CollaboratorError, EngineError, IndexError, ValidationError,
};
pub use generation::{create_generator, ChatTurn, GenerationRequest, Generator, OllamaGenerator};
pub use knowledge::{
    AnswerStream, Chunk, ChunkConfig, DocumentChunker, EntitySet, HybridRetriever, IndexSnapshot,
    LoadedDocument, MetadataIndex, Query, ResponseEvent, RetrievalEngine, RetrievalPath,
    RetrievalResult, VectorIndex,
};
