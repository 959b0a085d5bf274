//! Retrieval Engine - 인덱스 스냅샷 수명 관리 + 질의 처리
//!
//! 질의는 시작 시점의 스냅샷(`Arc<IndexSnapshot>`) 하나를 잡고 끝까지 그것만 읽습니다.
//! 빌드/로드는 새 스냅샷을 만든 뒤 포인터 하나만 교체하므로, 진행 중인 질의는
//! 부분적으로 만들어진 인덱스를 보지 않습니다. 빌드가 실패하면 기존 스냅샷이 그대로 남습니다.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::collector::FileCollector;
use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{
    BuildError, BuildStage, CollaboratorError, EngineError, IndexError, ValidationError,
};
use crate::extractor::{load_all, DocumentLoader, FileLoader};
use crate::generation::{create_generator, ChatTurn, GenerationRequest, Generator};

use super::answer::{AnswerAssembler, AnswerStream, Generation};
use super::chunker::DocumentChunker;
use super::document::{Chunk, LoadedDocument};
use super::hybrid::{HybridRetriever, IndexSnapshot, RetrievalResult};
use super::vector::{BuildOptions, EmbedReport, VectorIndex};

// ============================================================================
// Types
// ============================================================================

/// 사용자 질의
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub question: String,
    /// 이전 대화 (생성 프롬프트에만 사용, 검색에는 사용하지 않음)
    pub history: Vec<ChatTurn>,
}

impl Query {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: vec![],
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

/// 빌드 결과 요약
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    pub files: usize,
    pub failed_files: usize,
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped: usize,
}

impl BuildSummary {
    fn with_report(mut self, report: EmbedReport) -> Self {
        self.embedded = report.embedded;
        self.skipped = report.skipped;
        self
    }
}

/// 엔진 상태
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub loaded: bool,
    pub chunk_count: usize,
    pub source_count: usize,
    pub entity_values: usize,
    pub embedding_model: Option<String>,
    pub dimension: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub index_dir: PathBuf,
    /// 스냅샷 교체 횟수
    pub generation: u64,
    pub rebuilding: bool,
}

// ============================================================================
// RetrievalEngine
// ============================================================================

struct EngineInner {
    config: RagConfig,
    retriever: HybridRetriever,
    generator: Arc<dyn Generator>,
    chunker: DocumentChunker,
    loader: Arc<dyn DocumentLoader>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    generation: AtomicU64,
    /// 빌드는 한 번에 하나만
    build_lock: tokio::sync::Mutex<()>,
    rebuilding: AtomicBool,
}

/// 검색 엔진 (복제 비용이 싼 핸들)
#[derive(Clone)]
pub struct RetrievalEngine {
    inner: Arc<EngineInner>,
}

impl RetrievalEngine {
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self::with_loader(config, embedder, generator, Arc::new(FileLoader::default()))
    }

    pub fn with_loader(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        let retriever = HybridRetriever::new(embedder, &config);
        let chunker = DocumentChunker::new(config.chunk.clone());

        Self {
            inner: Arc::new(EngineInner {
                config,
                retriever,
                generator,
                chunker,
                loader,
                snapshot: RwLock::new(None),
                generation: AtomicU64::new(0),
                build_lock: tokio::sync::Mutex::new(()),
                rebuilding: AtomicBool::new(false),
            }),
        }
    }

    /// Ollama 협력자로 엔진 생성
    pub fn from_config(config: RagConfig) -> anyhow::Result<Self> {
        let embedder = Arc::new(create_embedder(&config)?);
        let generator = Arc::new(create_generator(&config)?);
        Ok(Self::new(config, embedder, generator))
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// 현재 스냅샷 (없으면 None)
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        match self.inner.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// 스냅샷 교체 (포인터 하나만 바꿈)
    fn publish(&self, snapshot: Option<Arc<IndexSnapshot>>) -> u64 {
        {
            let mut guard = match self.inner.snapshot.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = snapshot;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 디스크의 인덱스 로드
    pub async fn load_from_disk(&self) -> Result<(), IndexError> {
        let dir = &self.inner.config.index_dir;
        let index = VectorIndex::load(dir).await?;
        let generation = self.publish(Some(Arc::new(IndexSnapshot::new(index))));
        tracing::info!("Index loaded from {:?} (generation {})", dir, generation);
        Ok(())
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// 청크로 벡터 인덱스 빌드 (저장/교체 없음)
    pub async fn build_index(&self, chunks: Vec<Chunk>) -> Result<VectorIndex, BuildError> {
        let (index, _) = VectorIndex::build(
            chunks,
            self.inner.retriever.embedder().as_ref(),
            BuildOptions::from(&self.inner.config),
        )
        .await?;
        Ok(index)
    }

    /// 문서 요소로 빌드 → 저장 → 스냅샷 교체
    pub async fn index_documents(
        &self,
        documents: &[LoadedDocument],
    ) -> Result<BuildSummary, BuildError> {
        let summary = BuildSummary {
            documents: documents.len(),
            ..BuildSummary::default()
        };
        self.build_and_publish(documents, summary).await
    }

    /// 문서 디렉토리 전체 인덱싱 (수집 → 로드 → 청킹 → 임베딩 → 저장)
    pub async fn index_corpus(&self, docs_dir: &Path) -> Result<BuildSummary, BuildError> {
        let files = FileCollector::with_defaults()
            .collect_directory(docs_dir)
            .map_err(|e| BuildError::Load(format!("{:#}", e)))?;
        if files.is_empty() {
            tracing::warn!("No documents found in {:?}", docs_dir);
            return Err(BuildError::EmptyCorpus {
                stage: BuildStage::Load,
            });
        }

        let (documents, report) = load_all(self.inner.loader.as_ref(), &files).await;
        if documents.is_empty() {
            return Err(BuildError::EmptyCorpus {
                stage: BuildStage::Load,
            });
        }
        tracing::info!(
            "Loaded {} elements from {} files ({} failed)",
            documents.len(),
            report.loaded_files,
            report.failed_files
        );

        let summary = BuildSummary {
            files: files.len(),
            failed_files: report.failed_files,
            documents: documents.len(),
            ..BuildSummary::default()
        };
        self.build_and_publish(&documents, summary).await
    }

    async fn build_and_publish(
        &self,
        documents: &[LoadedDocument],
        mut summary: BuildSummary,
    ) -> Result<BuildSummary, BuildError> {
        let _guard = self.inner.build_lock.lock().await;
        self.inner.rebuilding.store(true, Ordering::SeqCst);

        let result = async {
            let chunks = self.inner.chunker.chunk(documents);
            summary.chunks = chunks.len();
            if chunks.is_empty() {
                return Err(BuildError::EmptyCorpus {
                    stage: BuildStage::Chunk,
                });
            }

            let (index, report) = VectorIndex::build(
                chunks,
                self.inner.retriever.embedder().as_ref(),
                BuildOptions::from(&self.inner.config),
            )
            .await?;

            index
                .save(&self.inner.config.index_dir)
                .await
                .map_err(BuildError::Persist)?;

            let generation = self.publish(Some(Arc::new(IndexSnapshot::new(index))));
            tracing::info!("Index rebuilt (generation {})", generation);
            Ok(summary.with_report(report))
        }
        .await;

        self.inner.rebuilding.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            tracing::error!(
                "Index build failed at {} stage: {}. Keeping previous index.",
                e.stage(),
                e
            );
        }
        result
    }

    /// 백그라운드 재빌드 (설정의 문서 디렉토리)
    pub fn spawn_rebuild(&self) -> JoinHandle<Result<BuildSummary, BuildError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let docs_dir = engine.inner.config.docs_dir.clone();
            engine.index_corpus(&docs_dir).await
        })
    }

    /// 저장된 인덱스 삭제 + 언로드
    pub async fn clear(&self) -> Result<(), IndexError> {
        let _guard = self.inner.build_lock.lock().await;
        self.publish(None);

        let dir = &self.inner.config.index_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => tracing::info!("Cleared index at {:?}", dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::Io(e.to_string())),
        }
        Ok(())
    }

    /// 현재 상태
    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        let vectors = snapshot.as_ref().map(|s| s.vectors());

        EngineStats {
            loaded: snapshot.is_some(),
            chunk_count: vectors.map(|v| v.len()).unwrap_or(0),
            source_count: vectors
                .map(|v| super::hybrid::distinct_sources(v.chunks()).len())
                .unwrap_or(0),
            entity_values: snapshot
                .as_ref()
                .map(|s| s.metadata().distinct_values())
                .unwrap_or(0),
            embedding_model: vectors.map(|v| v.model().to_string()),
            dimension: vectors.map(|v| v.dimension()),
            built_at: vectors.map(|v| v.built_at()),
            index_dir: self.inner.config.index_dir.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
            rebuilding: self.inner.rebuilding.load(Ordering::SeqCst),
        }
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// 질문 검증 (앞뒤 공백 제거)
    pub fn validate<'a>(&self, question: &'a str) -> Result<&'a str, ValidationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let len = question.chars().count();
        let max = self.inner.config.max_query_chars;
        if len > max {
            return Err(ValidationError::QueryTooLong { len, max });
        }
        Ok(question)
    }

    /// 검색만 수행 (감사용 결과)
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult, EngineError> {
        let question = self.validate(question)?;
        let snapshot = self.snapshot();
        self.inner
            .retriever
            .retrieve(snapshot.as_deref(), question)
            .await
    }

    /// 질의 → 응답 이벤트 스트림
    pub fn answer(&self, query: Query) -> AnswerStream {
        let engine = self.clone();
        self.spawn_answer(move |assembler| async move {
            let result = match engine.retrieve(&query.question).await {
                Ok(result) => result,
                Err(e) => return assembler.fail(e).await,
            };
            engine.generate(assembler, result, query).await;
        })
    }

    /// 이미 검색한 결과로 답변 생성
    pub fn answer_with(&self, result: RetrievalResult, query: Query) -> AnswerStream {
        let engine = self.clone();
        self.spawn_answer(move |assembler| async move {
            engine.generate(assembler, result, query).await;
        })
    }

    fn spawn_answer<F, Fut>(&self, producer: F) -> AnswerStream
    where
        F: FnOnce(AnswerAssembler) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let config = &self.inner.config;
        AnswerStream::spawn(config.stream_buffer, config.generation_timeout, producer)
    }

    async fn generate(&self, assembler: AnswerAssembler, result: RetrievalResult, query: Query) {
        tracing::info!(
            "Answering via {} path with {} chunks",
            result.path,
            result.chunks.len()
        );

        let request = GenerationRequest {
            context: result.context(),
            passages: result.passages(),
            question: query.question.trim().to_string(),
            history: query.history,
        };

        let timeout = self.inner.config.generation_timeout;
        let generation =
            match tokio::time::timeout(timeout, self.inner.generator.generate_stream(&request))
                .await
            {
                Ok(Ok(stream)) => Generation::Stream(stream),
                Ok(Err(e)) => {
                    let err = CollaboratorError::GenerationFailure(format!("{:#}", e));
                    return assembler.fail(err).await;
                }
                Err(_) => {
                    return assembler
                        .fail(CollaboratorError::GenerationTimeout(timeout))
                        .await;
                }
            };

        assembler.deliver(generation, result.sources).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
