//! 에러 타입
//!
//! 인덱스 빌드, 인덱스 영속화, 외부 모델 호출, 질의 검증 단계별 에러를 정의합니다.
//! CLI와 파일 수집 계층은 `anyhow`를 그대로 사용하고,
//! 검색 엔진 코어는 아래 타입으로 실패 원인을 구분합니다.

use std::fmt;

use thiserror::Error;

// ============================================================================
// Build
// ============================================================================

/// 인덱스 빌드 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// 문서 로드
    Load,
    /// 청킹
    Chunk,
    /// 임베딩
    Embed,
    /// 디스크 저장
    Persist,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Load => "load",
            BuildStage::Chunk => "chunk",
            BuildStage::Embed => "embed",
            BuildStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// 인덱스 빌드 에러
#[derive(Debug, Error)]
pub enum BuildError {
    /// 문서 수집/로드 실패
    #[error("Failed to load documents: {0}")]
    Load(String),

    /// 해당 단계 이후 남은 청크가 없음
    #[error("Empty corpus: no usable chunks after {stage} stage")]
    EmptyCorpus { stage: BuildStage },

    /// 일부 청크 임베딩 실패 (부분 실패를 허용하지 않는 설정일 때)
    #[error("Embedding failed for {failed}/{total} chunks")]
    EmbeddingFailure { failed: usize, total: usize },

    /// 인덱스 저장 실패
    #[error("Failed to persist index: {0}")]
    Persist(#[source] IndexError),
}

impl BuildError {
    /// 실패한 빌드 단계
    pub fn stage(&self) -> BuildStage {
        match self {
            BuildError::Load(_) => BuildStage::Load,
            BuildError::EmptyCorpus { stage } => *stage,
            BuildError::EmbeddingFailure { .. } => BuildStage::Embed,
            BuildError::Persist(_) => BuildStage::Persist,
        }
    }
}

// ============================================================================
// Index
// ============================================================================

/// 벡터 인덱스 에러
#[derive(Debug, Error)]
pub enum IndexError {
    /// 인덱스 디렉토리가 없거나 비어 있음
    #[error("Index not found at {0}")]
    IndexNotFound(String),

    /// 저장된 인덱스를 읽을 수 없음
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// 로드된 인덱스 없음
    #[error("Vector index not initialized. Please run indexing first.")]
    IndexUnavailable,

    /// 저장 중 I/O 실패
    #[error("Index I/O error: {0}")]
    Io(String),
}

// ============================================================================
// Collaborators
// ============================================================================

/// 외부 모델(임베딩/생성) 호출 에러
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Embedding request timed out after {0:?}")]
    EmbeddingTimeout(std::time::Duration),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Generation request timed out after {0:?}")]
    GenerationTimeout(std::time::Duration),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),
}

// ============================================================================
// Query
// ============================================================================

/// 질의 입력 검증 에러
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Question must not be empty")]
    EmptyQuery,

    #[error("Question too long: {len} characters (max {max})")]
    QueryTooLong { len: usize, max: usize },
}

/// 질의 처리 중 발생하는 에러
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ============================================================================
// Tests
// ============================================================================
