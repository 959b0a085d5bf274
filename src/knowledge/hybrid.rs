//! 하이브리드 검색 - 메타데이터 정확 조회 우선, 벡터 검색 폴백
//!
//! 질의에서 엔티티(날짜/이름/레코드 코드)를 뽑아 메타데이터 인덱스를 먼저 조회하고,
//! 엔티티가 없거나 히트가 없으면 벡터 유사도 검색으로 넘어갑니다.
//!
//! ```text
//! Start → ExtractEntities ─┬─ (엔티티 있음 && 히트 ≥ 1) → MetadataPath ─┐
//!                          └─ (그 외)                    → SemanticPath ─┴→ AssembleContext
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, IndexError};

use super::document::Chunk;
use super::entities::{extract_query_entities, EntityDetector, PatternEntityExtractor};
use super::metadata::MetadataIndex;
use super::vector::VectorIndex;

// ============================================================================
// Snapshot
// ============================================================================

/// 질의가 읽는 불변 인덱스 스냅샷 (벡터 인덱스 + 메타데이터 인덱스)
#[derive(Debug)]
pub struct IndexSnapshot {
    vectors: VectorIndex,
    metadata: MetadataIndex,
}

impl IndexSnapshot {
    pub fn new(vectors: VectorIndex) -> Self {
        let metadata = MetadataIndex::build(vectors.chunks());
        Self { vectors, metadata }
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }
}

// ============================================================================
// Types
// ============================================================================

/// 결과를 만든 검색 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalPath {
    /// 메타데이터 정확/부분 일치
    Metadata,
    /// 벡터 유사도 검색
    Semantic,
}

impl fmt::Display for RetrievalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalPath::Metadata => f.write_str("metadata"),
            RetrievalPath::Semantic => f.write_str("semantic"),
        }
    }
}

/// 검색된 청크
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// 시맨틱 경로의 유사도 (메타데이터 경로는 None)
    pub score: Option<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    /// 중복 제거된 출처 (첫 등장 순서)
    pub sources: Vec<String>,
    pub path: RetrievalPath,
    /// 질의에서 추출된 엔티티
    pub entities: Vec<String>,
}

impl RetrievalResult {
    fn new(chunks: Vec<RetrievedChunk>, path: RetrievalPath, entities: Vec<String>) -> Self {
        let sources = distinct_sources(chunks.iter().map(|c| &c.chunk));
        Self {
            chunks,
            sources,
            path,
            entities,
        }
    }

    /// 생성 모델에 넘길 컨텍스트
    pub fn context(&self) -> String {
        self.passages().join("\n\n")
    }

    pub fn passages(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.text.clone()).collect()
    }
}

/// 출처 경로 중복 제거 (순서 유지)
pub fn distinct_sources<'a, I>(chunks: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.iter().any(|s| s == &chunk.source_path) {
            sources.push(chunk.source_path.clone());
        }
    }
    sources
}

/// 경로 결정 (엔티티가 있고 메타데이터 히트가 있으면 메타데이터 경로)
pub fn decide_path(entities: &[String], metadata_hits: &[usize]) -> RetrievalPath {
    if !entities.is_empty() && !metadata_hits.is_empty() {
        RetrievalPath::Metadata
    } else {
        RetrievalPath::Semantic
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    entities: Arc<dyn EntityDetector>,
    top_k: usize,
    metadata_limit: usize,
    embed_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            embedder,
            entities: Arc::new(PatternEntityExtractor),
            top_k: config.top_k.max(1),
            metadata_limit: config.metadata_limit.max(1),
            embed_timeout: config.embed_timeout,
        }
    }

    /// 엔티티 탐지기 교체
    pub fn with_detector(mut self, detector: Arc<dyn EntityDetector>) -> Self {
        self.entities = detector;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 스냅샷에서 질의에 맞는 청크 검색
    pub async fn retrieve(
        &self,
        snapshot: Option<&IndexSnapshot>,
        query: &str,
    ) -> Result<RetrievalResult, EngineError> {
        let entities = extract_query_entities(self.entities.as_ref(), query);

        let hits = match (snapshot, entities.is_empty()) {
            (Some(snapshot), false) => snapshot.metadata().lookup(&entities),
            _ => vec![],
        };

        match decide_path(&entities, &hits) {
            RetrievalPath::Metadata => {
                // decide_path가 Metadata면 스냅샷이 있음
                let snapshot = snapshot.ok_or(IndexError::IndexUnavailable)?;
                tracing::info!(
                    "Metadata search: {} hits for {:?}, using first {}",
                    hits.len(),
                    entities,
                    hits.len().min(self.metadata_limit)
                );

                let chunks = hits
                    .iter()
                    .take(self.metadata_limit)
                    .filter_map(|&position| snapshot.vectors().chunk(position))
                    .map(|chunk| RetrievedChunk {
                        chunk: chunk.clone(),
                        score: None,
                    })
                    .collect();

                Ok(RetrievalResult::new(chunks, RetrievalPath::Metadata, entities))
            }
            RetrievalPath::Semantic => {
                let snapshot = snapshot.ok_or(IndexError::IndexUnavailable)?;
                if entities.is_empty() {
                    tracing::info!("No entities in query, using semantic search");
                } else {
                    tracing::info!(
                        "No metadata hits for {:?}, falling back to semantic search",
                        entities
                    );
                }

                let results = snapshot
                    .vectors()
                    .search(self.embedder.as_ref(), query, self.top_k, self.embed_timeout)
                    .await?;

                let chunks = results
                    .into_iter()
                    .map(|(chunk, score)| RetrievedChunk {
                        chunk: chunk.clone(),
                        score: Some(score),
                    })
                    .collect();

                Ok(RetrievalResult::new(chunks, RetrievalPath::Semantic, entities))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::knowledge::vector::BuildOptions;
    use crate::test_support::{chunk, HashEmbedding, StalledEmbedding};

    async fn snapshot(chunks: Vec<Chunk>) -> IndexSnapshot {
        let (index, _) = VectorIndex::build(chunks, &HashEmbedding::new(), BuildOptions::default())
            .await
            .unwrap();
        IndexSnapshot::new(index)
    }

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(Arc::new(HashEmbedding::new()), &RagConfig::default())
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("r1", "release of batch QX-20931 approved", "docs/release.txt"),
            chunk("r2", "what about record approval for release batch", "docs/semantic-bait.txt"),
            chunk("r3", "cleaning the mixing tank", "docs/clean.txt"),
            chunk("r4", "mixing tank inspection", "docs/inspect.txt"),
            chunk("r5", "tank cleaning schedule", "docs/schedule.txt"),
            chunk("r6", "mixing procedure for the tank", "docs/mixing.txt"),
            chunk("r7", "another tank mixing note", "docs/clean.txt"),
        ]
    }

    #[test]
    fn test_decide_path() {
        let entities = vec!["QX-20931".to_string()];
        assert_eq!(decide_path(&entities, &[0]), RetrievalPath::Metadata);
        assert_eq!(decide_path(&entities, &[]), RetrievalPath::Semantic);
        assert_eq!(decide_path(&[], &[0]), RetrievalPath::Semantic);
    }

    #[test]
    fn test_distinct_sources_order_stable() {
        let chunks = corpus();
        let sources = distinct_sources(&chunks);
        assert_eq!(sources.len(), 6);
        assert_eq!(sources[0], "docs/release.txt");
        assert_eq!(sources[2], "docs/clean.txt");
    }

    #[tokio::test]
    async fn test_record_code_takes_metadata_path() {
        let snapshot = snapshot(corpus()).await;
        let result = retriever()
            .retrieve(Some(&snapshot), "what about record approval for release batch QX-20931")
            .await
            .unwrap();

        assert_eq!(result.path, RetrievalPath::Metadata);
        assert_eq!(result.entities, vec!["QX-20931"]);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk.id, "r1");
        assert_eq!(result.sources, vec!["docs/release.txt"]);
    }

    #[tokio::test]
    async fn test_unmatched_entity_falls_back_to_semantic() {
        let snapshot = snapshot(corpus()).await;
        let result = retriever()
            .retrieve(Some(&snapshot), "mixing tank ZZ-99999")
            .await
            .unwrap();

        assert_eq!(result.path, RetrievalPath::Semantic);
        assert_eq!(result.entities, vec!["ZZ-99999"]);
        assert_eq!(result.chunks.len(), 5);
    }

    #[tokio::test]
    async fn test_no_entities_uses_semantic_top_five() {
        let snapshot = snapshot(corpus()).await;
        let result = retriever()
            .retrieve(Some(&snapshot), "how is the mixing tank cleaned")
            .await
            .unwrap();

        assert_eq!(result.path, RetrievalPath::Semantic);
        assert!(result.entities.is_empty());
        assert_eq!(result.chunks.len(), 5);
        assert!(result.sources.len() <= 5);
        assert!(result.chunks.iter().all(|c| c.score.is_some()));
    }

    #[tokio::test]
    async fn test_metadata_hits_truncated_in_build_order() {
        let chunks: Vec<Chunk> = (0..8)
            .map(|i| chunk(&format!("m{}", i), "signed by Alice Smith", &format!("docs/{}.txt", i)))
            .collect();
        let snapshot = snapshot(chunks).await;

        let result = retriever()
            .retrieve(Some(&snapshot), "what did Alice Smith sign")
            .await
            .unwrap();

        assert_eq!(result.path, RetrievalPath::Metadata);
        let ids: Vec<&str> = result.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_no_snapshot_is_unavailable() {
        let result = retriever().retrieve(None, "anything at all").await;
        assert!(matches!(
            result,
            Err(EngineError::Index(IndexError::IndexUnavailable))
        ));

        let result = retriever().retrieve(None, "record QX-20931").await;
        assert!(matches!(
            result,
            Err(EngineError::Index(IndexError::IndexUnavailable))
        ));
    }

    #[tokio::test]
    async fn test_query_embedding_timeout() {
        let snapshot = snapshot(corpus()).await;
        let config = RagConfig {
            embed_timeout: Duration::from_millis(20),
            ..RagConfig::default()
        };
        let retriever = HybridRetriever::new(Arc::new(StalledEmbedding), &config);

        let result = retriever.retrieve(Some(&snapshot), "mixing tank").await;
        assert!(matches!(
            result,
            Err(EngineError::Collaborator(CollaboratorError::EmbeddingTimeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_context_joins_passages() {
        let snapshot = snapshot(corpus()).await;
        let result = retriever()
            .retrieve(Some(&snapshot), "batch QX-20931")
            .await
            .unwrap();
        assert_eq!(result.context(), "release of batch QX-20931 approved");
    }
}
