//! Vector Index - 청크 임베딩, 유사도 검색, 영속화
//!
//! 빌드 결과는 불변이며 다음 전체 재빌드로만 교체됩니다.
//! 검색은 메모리의 벡터를 코사인 유사도로 전수 비교합니다 (소~중규모 코퍼스 전제).
//!
//! 디스크 레이아웃 (인덱스 디렉토리):
//! - `docstore.db`: 청크 텍스트/메타데이터 + 매니페스트 (SQLite)
//! - `vectors.lance`: 임베딩 벡터 (LanceDB)
//!
//! 두 파일은 함께 저장되고 함께 로드됩니다. 저장은 임시 디렉토리에 쓴 뒤
//! rename으로 교체합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::document::Chunk;
use super::lance::LanceVectorStore;
use super::store::{DocStore, IndexManifest, FORMAT_VERSION};
use crate::config::{EmbedMode, RagConfig};
use crate::embedding::{embed_with_timeout, EmbeddingProvider};
use crate::error::{BuildError, BuildStage, CollaboratorError, IndexError};

/// 문서 저장소 파일 이름
pub const DOCSTORE_FILE: &str = "docstore.db";
/// 벡터 테이블 디렉토리 이름
pub const VECTORS_DIR: &str = "vectors.lance";

// ============================================================================
// Types
// ============================================================================

/// (청크, 벡터) 쌍
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// 빌드 순서상 위치
    pub position: usize,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

/// 빌드 옵션
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub mode: EmbedMode,
    pub allow_partial: bool,
    /// 청크 하나당 임베딩 타임아웃
    pub timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: EmbedMode::PerChunk,
            allow_partial: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RagConfig> for BuildOptions {
    fn from(config: &RagConfig) -> Self {
        Self {
            mode: config.embed_mode,
            allow_partial: config.allow_partial_embeddings,
            timeout: config.embed_timeout,
        }
    }
}

/// 빌드 임베딩 통계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub skipped: usize,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 불변 벡터 인덱스
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dimension: usize,
    entries: Vec<IndexEntry>,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    /// 청크를 임베딩해 인덱스 빌드
    ///
    /// 임베딩에 실패한 청크와 빈 벡터, 차원 불일치 벡터, NaN/무한대를 포함한 벡터는
    /// 경고 후 건너뜁니다.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        options: BuildOptions,
    ) -> Result<(Self, EmbedReport), BuildError> {
        if chunks.is_empty() {
            return Err(BuildError::EmptyCorpus {
                stage: BuildStage::Chunk,
            });
        }

        let total = chunks.len();
        tracing::info!(
            "Embedding {} chunks with {} ({:?} mode)",
            total,
            embedder.name(),
            options.mode
        );

        let vectors = match options.mode {
            EmbedMode::PerChunk => embed_each(&chunks, embedder, options.timeout).await,
            EmbedMode::Batch => match embed_all(&chunks, embedder, options.timeout).await {
                Some(vectors) => vectors,
                None => embed_each(&chunks, embedder, options.timeout).await,
            },
        };

        let mut dimension = 0;
        let mut entries = Vec::with_capacity(total);
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let Some(vector) = vector else { continue };

            if vector.is_empty() {
                tracing::warn!("Skipping chunk {}: empty embedding", chunk.id);
                continue;
            }
            if !is_finite_vector(&vector) {
                tracing::warn!("Skipping chunk {}: embedding has non-finite values", chunk.id);
                continue;
            }
            if dimension == 0 {
                dimension = vector.len();
            } else if vector.len() != dimension {
                tracing::warn!(
                    "Skipping chunk {}: embedding dimension {} != {}",
                    chunk.id,
                    vector.len(),
                    dimension
                );
                continue;
            }

            entries.push(IndexEntry { chunk, vector });
        }

        let report = EmbedReport {
            total,
            embedded: entries.len(),
            skipped: total - entries.len(),
        };

        if entries.is_empty() {
            return Err(BuildError::EmptyCorpus {
                stage: BuildStage::Embed,
            });
        }
        if report.skipped > 0 {
            tracing::warn!(
                "{} of {} chunks skipped during embedding",
                report.skipped,
                report.total
            );
            if !options.allow_partial {
                return Err(BuildError::EmbeddingFailure {
                    failed: report.skipped,
                    total: report.total,
                });
            }
        }

        tracing::info!(
            "Built vector index: {} vectors (dimension {})",
            entries.len(),
            dimension
        );

        let index = Self {
            model: embedder.name().to_string(),
            dimension,
            entries,
            built_at: Utc::now(),
        };
        Ok((index, report))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// 빌드 순서대로 청크 순회
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    pub fn chunk(&self, position: usize) -> Option<&Chunk> {
        self.entries.get(position).map(|e| &e.chunk)
    }

    /// 질의 벡터와 가장 유사한 k개 (유사도 내림차순, 동점은 빌드 순서)
    ///
    /// `k == 0`은 1로 보정합니다. 인덱스보다 큰 k는 전체를 돌려줍니다.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        let k = k.max(1);

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| SearchResult {
                position,
                similarity: cosine_similarity(query, &entry.vector),
            })
            .collect();

        // sort_by는 안정 정렬, total_cmp는 NaN이 섞여도 전순서
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(k);
        results
    }

    /// 질의 텍스트를 임베딩해 검색 (`k`는 [`search_vector`](Self::search_vector)와 같이 보정)
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
        timeout: Duration,
    ) -> Result<Vec<(&Chunk, f32)>, CollaboratorError> {
        let query_vector = embed_with_timeout(embedder, query, timeout).await?;
        if query_vector.len() != self.dimension {
            return Err(CollaboratorError::EmbeddingFailure(format!(
                "Query embedding dimension {} does not match index dimension {}",
                query_vector.len(),
                self.dimension
            )));
        }
        if !is_finite_vector(&query_vector) {
            return Err(CollaboratorError::EmbeddingFailure(
                "Query embedding has non-finite values".to_string(),
            ));
        }

        Ok(self
            .search_vector(&query_vector, k)
            .into_iter()
            .filter_map(|r| self.chunk(r.position).map(|c| (c, r.similarity)))
            .collect())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// 인덱스 디렉토리에 저장 (문서 저장소 + 벡터 테이블)
    ///
    /// 형제 임시 디렉토리에 모두 쓴 뒤 교체하므로, 실패해도 기존 인덱스는 남습니다.
    pub async fn save(&self, dir: &Path) -> Result<(), IndexError> {
        let staging = sibling_path(dir, "staging")?;

        match self.write_artifacts(&staging).await {
            Ok(()) => {}
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(IndexError::Io(format!("{:#}", e)));
            }
        }

        swap_into_place(&staging, dir).await?;
        tracing::info!("Saved index ({} chunks) to {:?}", self.len(), dir);
        Ok(())
    }

    async fn write_artifacts(&self, dir: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir).await?;

        {
            let mut store = DocStore::create(&dir.join(DOCSTORE_FILE))?;
            store.write_manifest(&IndexManifest {
                format_version: FORMAT_VERSION,
                embedding_model: self.model.clone(),
                dimension: self.dimension,
                chunk_count: self.entries.len(),
                built_at: self.built_at,
            })?;
            store.insert_chunks(self.chunks())?;
        }

        let rows: Vec<(&str, &[f32])> = self
            .entries
            .iter()
            .map(|e| (e.chunk.id.as_str(), e.vector.as_slice()))
            .collect();
        let vectors = LanceVectorStore::open(&dir.join(VECTORS_DIR)).await?;
        vectors.write_vectors(&rows, self.dimension).await?;

        Ok(())
    }

    /// 인덱스 디렉토리에서 로드
    ///
    /// - 디렉토리가 없거나 비어 있으면 `IndexNotFound`
    /// - 구성 파일이 없거나 읽을 수 없거나 서로 맞지 않으면 `IndexCorrupt`
    pub async fn load(dir: &Path) -> Result<Self, IndexError> {
        if !is_populated_dir(dir).await {
            return Err(IndexError::IndexNotFound(dir.display().to_string()));
        }

        let db_path = dir.join(DOCSTORE_FILE);
        let lance_path = dir.join(VECTORS_DIR);
        for artifact in [&db_path, &lance_path] {
            if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
                return Err(IndexError::IndexCorrupt(format!(
                    "missing {}",
                    artifact.display()
                )));
            }
        }

        // rusqlite는 동기 API
        let (manifest, chunks) = tokio::task::spawn_blocking(move || read_docstore(&db_path))
            .await
            .map_err(|e| IndexError::Io(format!("docstore read task failed: {}", e)))?
            .map_err(|e| IndexError::IndexCorrupt(format!("{:#}", e)))?;

        let stored = async {
            LanceVectorStore::open(&lance_path)
                .await?
                .read_vectors()
                .await
        }
        .await
        .map_err(|e| IndexError::IndexCorrupt(format!("{:#}", e)))?;

        if chunks.is_empty() || chunks.len() != manifest.chunk_count {
            return Err(IndexError::IndexCorrupt(format!(
                "manifest lists {} chunks, document store has {}",
                manifest.chunk_count,
                chunks.len()
            )));
        }
        if stored.len() != chunks.len() {
            return Err(IndexError::IndexCorrupt(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                stored.len()
            )));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (position, (chunk, row)) in chunks.into_iter().zip(stored).enumerate() {
            if row.position != position || row.chunk_id != chunk.id {
                return Err(IndexError::IndexCorrupt(format!(
                    "vector row {} does not match chunk {}",
                    row.position, chunk.id
                )));
            }
            if row.embedding.len() != manifest.dimension {
                return Err(IndexError::IndexCorrupt(format!(
                    "vector for chunk {} has dimension {} (expected {})",
                    chunk.id,
                    row.embedding.len(),
                    manifest.dimension
                )));
            }
            entries.push(IndexEntry {
                chunk,
                vector: row.embedding,
            });
        }

        tracing::info!("Loaded index ({} chunks) from {:?}", entries.len(), dir);

        Ok(Self {
            model: manifest.embedding_model,
            dimension: manifest.dimension,
            entries,
            built_at: manifest.built_at,
        })
    }
}

// ============================================================================
// Embedding helpers
// ============================================================================

fn is_finite_vector(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

/// 청크마다 개별 임베딩 (실패 시 None)
async fn embed_each(
    chunks: &[Chunk],
    embedder: &dyn EmbeddingProvider,
    timeout: Duration,
) -> Vec<Option<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match embed_with_timeout(embedder, &chunk.text, timeout).await {
            Ok(vector) => vectors.push(Some(vector)),
            Err(e) => {
                tracing::warn!("Skipping chunk {} ({}): {}", chunk.id, chunk.source_path, e);
                vectors.push(None);
            }
        }
    }
    vectors
}

/// 배치 임베딩 (실패하면 None을 반환해 청크 단위로 재시도하게 함)
async fn embed_all(
    chunks: &[Chunk],
    embedder: &dyn EmbeddingProvider,
    timeout: Duration,
) -> Option<Vec<Option<Vec<f32>>>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let budget = timeout.saturating_mul(u32::try_from(texts.len()).unwrap_or(u32::MAX));

    match tokio::time::timeout(budget, embedder.embed_batch(&texts)).await {
        Ok(Ok(vectors)) if vectors.len() == texts.len() => {
            Some(vectors.into_iter().map(Some).collect())
        }
        Ok(Ok(vectors)) => {
            tracing::warn!(
                "Batch embedding returned {} vectors for {} chunks, retrying per chunk",
                vectors.len(),
                texts.len()
            );
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("Batch embedding failed, retrying per chunk: {:#}", e);
            None
        }
        Err(_) => {
            tracing::warn!("Batch embedding timed out after {:?}, retrying per chunk", budget);
            None
        }
    }
}

// ============================================================================
// Persistence helpers
// ============================================================================

fn read_docstore(path: &Path) -> anyhow::Result<(IndexManifest, Vec<Chunk>)> {
    let store = DocStore::open_existing(path)?;
    let manifest = store.read_manifest()?;
    let chunks = store.read_chunks()?;
    Ok((manifest, chunks))
}

/// 디렉토리가 존재하고 항목이 하나 이상 있는지
async fn is_populated_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// `<dir>.<tag>-<uuid>` 형제 경로
fn sibling_path(dir: &Path, tag: &str) -> Result<PathBuf, IndexError> {
    let name = dir
        .file_name()
        .ok_or_else(|| IndexError::Io(format!("Invalid index directory {:?}", dir)))?;
    Ok(dir.with_file_name(format!(
        "{}.{}-{}",
        name.to_string_lossy(),
        tag,
        uuid::Uuid::new_v4().simple()
    )))
}

/// 임시 디렉토리를 최종 위치로 교체
async fn swap_into_place(staging: &Path, dir: &Path) -> Result<(), IndexError> {
    let io = |e: std::io::Error| IndexError::Io(e.to_string());

    if tokio::fs::try_exists(dir).await.map_err(io)? {
        let backup = sibling_path(dir, "old")?;
        tokio::fs::rename(dir, &backup).await.map_err(io)?;

        if let Err(e) = tokio::fs::rename(staging, dir).await {
            // 기존 인덱스 복구
            let _ = tokio::fs::rename(&backup, dir).await;
            let _ = tokio::fs::remove_dir_all(staging).await;
            return Err(io(e));
        }

        if let Err(e) = tokio::fs::remove_dir_all(&backup).await {
            tracing::warn!("Failed to remove previous index {:?}: {}", backup, e);
        }
    } else {
        tokio::fs::rename(staging, dir).await.map_err(io)?;
    }

    Ok(())
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다.
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
///
/// # Returns
/// 코사인 유사도 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    // NaN/무한대 성분이나 오버플로는 신호 없음으로 취급
    let similarity = dot_product / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        chunk, FailingEmbedding, FlakyEmbedding, HashEmbedding, NonFiniteEmbedding,
    };
    use tempfile::TempDir;

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("c0", "cleaning procedure for the mixing tank", "docs/clean.txt"),
            chunk("c1", "calibration of the pressure gauge", "docs/calib.txt"),
            chunk("c2", "mixing tank inspection checklist", "docs/inspect.txt"),
            chunk("c3", "training records for operators", "docs/train.txt"),
        ]
    }

    async fn build_corpus() -> VectorIndex {
        let (index, _) = VectorIndex::build(corpus(), &HashEmbedding::new(), BuildOptions::default())
            .await
            .unwrap();
        index
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn test_build_empty_is_empty_corpus() {
        let err = VectorIndex::build(vec![], &HashEmbedding::new(), BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), BuildStage::Chunk);
    }

    #[tokio::test]
    async fn test_build_all_failures_is_empty_corpus() {
        let err = VectorIndex::build(corpus(), &FailingEmbedding, BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::EmptyCorpus {
                stage: BuildStage::Embed
            }
        ));
    }

    #[tokio::test]
    async fn test_build_skips_failed_chunks() {
        let embedder = FlakyEmbedding {
            fail_on: "calibration".to_string(),
        };
        let (index, report) = VectorIndex::build(corpus(), &embedder, BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(index.len(), 3);
        assert!(index.chunks().all(|c| c.id != "c1"));
    }

    #[tokio::test]
    async fn test_partial_failure_rejected_when_not_allowed() {
        let embedder = FlakyEmbedding {
            fail_on: "calibration".to_string(),
        };
        let options = BuildOptions {
            allow_partial: false,
            ..BuildOptions::default()
        };
        let err = VectorIndex::build(corpus(), &embedder, options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::EmbeddingFailure {
                failed: 1,
                total: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_batch_mode_falls_back_per_chunk() {
        let embedder = FlakyEmbedding {
            fail_on: "never-present".to_string(),
        };
        let options = BuildOptions {
            mode: EmbedMode::Batch,
            ..BuildOptions::default()
        };
        let (index, report) = VectorIndex::build(corpus(), &embedder, options)
            .await
            .unwrap();
        assert_eq!(report.embedded, 4);
        assert_eq!(index.len(), 4);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = build_corpus().await;
        let results = index
            .search(&HashEmbedding::new(), "mixing tank", 2, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let ids: Vec<&str> = results.iter().map(|(c, _)| c.id.as_str()).collect();
        assert!(ids.contains(&"c0") && ids.contains(&"c2"));
        assert!(results[0].1 >= results[1].1);
    }

    #[tokio::test]
    async fn test_build_skips_non_finite_vectors() {
        let embedder = NonFiniteEmbedding {
            poison_on: "calibration".to_string(),
        };
        let (index, report) = VectorIndex::build(corpus(), &embedder, BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert!(index.entries().iter().all(|e| e.vector.iter().all(|x| x.is_finite())));
        assert!(index.chunks().all(|c| c.id != "c1"));
    }

    #[tokio::test]
    async fn test_non_finite_query_is_embedding_failure() {
        let index = build_corpus().await;
        let embedder = NonFiniteEmbedding {
            poison_on: "gauge".to_string(),
        };
        let err = index
            .search(&embedder, "pressure gauge", 2, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::EmbeddingFailure(_)));
    }

    #[test]
    fn test_non_finite_entries_rank_as_no_signal() {
        let entries = vec![
            IndexEntry {
                chunk: chunk("low", "x", "a"),
                vector: vec![0.0, 1.0],
            },
            IndexEntry {
                chunk: chunk("nan", "y", "b"),
                vector: vec![f32::NAN, 1.0],
            },
            IndexEntry {
                chunk: chunk("high", "z", "c"),
                vector: vec![1.0, 0.2],
            },
        ];
        let index = VectorIndex {
            model: "fixed".to_string(),
            dimension: 2,
            entries,
            built_at: Utc::now(),
        };

        let results = index.search_vector(&[1.0, 0.0], 3);
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![2, 0, 1]);
        assert!(results.iter().all(|r| r.similarity.is_finite()));
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn test_search_k_larger_than_index_returns_all() {
        let index = build_corpus().await;
        assert_eq!(index.search_vector(&[1.0; 64], 50).len(), 4);
        // k=0은 1로 보정
        assert_eq!(index.search_vector(&[1.0; 64], 0).len(), 1);
    }

    #[tokio::test]
    async fn test_ties_keep_build_order() {
        let chunks = vec![
            chunk("a", "same words", "x"),
            chunk("b", "same words", "y"),
            chunk("c", "same words", "z"),
        ];
        let (index, _) = VectorIndex::build(chunks, &HashEmbedding::new(), BuildOptions::default())
            .await
            .unwrap();
        let positions: Vec<usize> = index
            .search_vector(&crate::test_support::hash_vector("same words"), 3)
            .into_iter()
            .map(|r| r.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let first = build_corpus().await;
        let second = build_corpus().await;
        let embedder = HashEmbedding::new();

        let a = first
            .search(&embedder, "tank inspection", 4, Duration::from_secs(1))
            .await
            .unwrap();
        let b = second
            .search(&embedder, "tank inspection", 4, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(a.len(), b.len());
        for ((ca, sa), (cb, sb)) in a.iter().zip(b.iter()) {
            assert_eq!(ca.id, cb.id);
            assert!((sa - sb).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");
        let index = build_corpus().await;

        index.save(&dir).await.unwrap();
        assert!(dir.join(DOCSTORE_FILE).exists());
        assert!(dir.join(VECTORS_DIR).exists());

        let loaded = VectorIndex::load(&dir).await.unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.dimension(), index.dimension());
        assert_eq!(loaded.model(), "hash-bow");
        for (a, b) in loaded.entries().iter().zip(index.entries()) {
            assert_eq!(a.chunk, b.chunk);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn test_save_replaces_existing_index() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");

        build_corpus().await.save(&dir).await.unwrap();

        let (smaller, _) = VectorIndex::build(
            vec![chunk("only", "single chunk corpus", "docs/one.txt")],
            &HashEmbedding::new(),
            BuildOptions::default(),
        )
        .await
        .unwrap();
        smaller.save(&dir).await.unwrap();

        let loaded = VectorIndex::load(&dir).await.unwrap();
        assert_eq!(loaded.len(), 1);

        // 임시/백업 디렉토리가 남지 않음
        let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_load_absent_or_empty_is_not_found() {
        let temp = TempDir::new().unwrap();

        let missing = VectorIndex::load(&temp.path().join("nope")).await;
        assert!(matches!(missing, Err(IndexError::IndexNotFound(_))));

        let empty = temp.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        let result = VectorIndex::load(&empty).await;
        assert!(matches!(result, Err(IndexError::IndexNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_corrupt_docstore() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");
        build_corpus().await.save(&dir).await.unwrap();

        std::fs::write(dir.join(DOCSTORE_FILE), b"truncated garbage").unwrap();

        let result = VectorIndex::load(&dir).await;
        assert!(matches!(result, Err(IndexError::IndexCorrupt(_))));
    }

    #[tokio::test]
    async fn test_load_missing_vectors_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");
        build_corpus().await.save(&dir).await.unwrap();

        std::fs::remove_dir_all(dir.join(VECTORS_DIR)).unwrap();

        let result = VectorIndex::load(&dir).await;
        assert!(matches!(result, Err(IndexError::IndexCorrupt(_))));
    }
}
