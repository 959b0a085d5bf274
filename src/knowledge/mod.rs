//! Knowledge 모듈 - SOP 문서 하이브리드 검색 엔진
//!
//! - Chunker: 문자 창 재귀 분할 + 표 정규화 + 엔티티 태깅
//! - SQLite(docstore.db): 청크 텍스트/메타데이터 + 매니페스트
//! - LanceDB(vectors.lance): 청크 임베딩
//! - Hybrid: 엔티티 정확 조회 우선, 코사인 유사도 검색 폴백
//! - Engine: 스냅샷 교체 + NDJSON 응답 스트림

mod answer;
mod chunker;
mod document;
mod engine;
mod entities;
mod hybrid;
mod lance;
mod metadata;
mod store;
mod table;
mod vector;

// Re-exports
pub use answer::{assemble, AnswerAssembler, AnswerStream, Generation, ResponseEvent};
pub use chunker::{
    chunk_documents, clean_chunk_text, ChunkConfig, Chunker, DocumentChunker, RecursiveChunker,
};
pub use document::{Chunk, LoadedDocument};
pub use engine::{BuildSummary, EngineStats, Query, RetrievalEngine};
pub use entities::{
    extract, extract_query_entities, EntityDetector, EntitySet, PatternEntityExtractor,
};
pub use hybrid::{
    decide_path, distinct_sources, HybridRetriever, IndexSnapshot, RetrievalPath,
    RetrievalResult, RetrievedChunk,
};
pub use metadata::MetadataIndex;
pub use table::{is_table, to_markdown_table, HeuristicTableDetector, TableDetector, TableSignal};
pub use vector::{
    cosine_similarity, BuildOptions, EmbedReport, IndexEntry, SearchResult, VectorIndex,
    DOCSTORE_FILE, VECTORS_DIR,
};
