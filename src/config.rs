//! 설정 모듈
//!
//! 기본값 → 환경변수 → CLI 플래그 순으로 덮어씁니다.
//!
//! | 환경변수 | 설명 |
//! |---|---|
//! | `SOP_RAG_HOME` | 데이터 디렉토리 (기본: `~/.local/share/.sop-rag`) |
//! | `OLLAMA_HOST` | Ollama 서버 주소 |
//! | `SOP_RAG_EMBED_MODEL` | 임베딩 모델 이름 |
//! | `SOP_RAG_LLM_MODEL` | 답변 생성 모델 이름 |
//! | `SOP_RAG_EMBED_MODE` | `per-chunk` 또는 `batch` |

use std::path::PathBuf;
use std::time::Duration;

use crate::knowledge::ChunkConfig;

/// 기본 Ollama 주소
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// 기본 모델 (임베딩/생성 모두 mistral)
pub const DEFAULT_MODEL: &str = "mistral";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로
pub fn get_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("SOP_RAG_HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sop-rag")
}

// ============================================================================
// Embed Mode
// ============================================================================

/// 빌드 시 임베딩 호출 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// 청크마다 개별 호출 (실패한 청크만 건너뜀)
    PerChunk,
    /// 한 번의 배치 호출 (실패 시 청크 단위로 재시도)
    Batch,
}

impl EmbedMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "per-chunk" | "per_chunk" | "testing" => Some(EmbedMode::PerChunk),
            "batch" | "production" => Some(EmbedMode::Batch),
            _ => None,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// 인덱스 디렉토리 (docstore.db + vectors.lance)
    pub index_dir: PathBuf,
    /// 문서 디렉토리
    pub docs_dir: PathBuf,
    /// 청킹 설정
    pub chunk: ChunkConfig,
    /// 시맨틱 검색 결과 수
    pub top_k: usize,
    /// 메타데이터 검색 결과 최대 사용 수
    pub metadata_limit: usize,
    pub ollama_host: String,
    pub embed_model: String,
    pub llm_model: String,
    pub embed_timeout: Duration,
    /// 생성 호출 타임아웃 (토큰 사이 대기 시간에도 적용)
    pub generation_timeout: Duration,
    /// 질문 최대 길이 (문자 수)
    pub max_query_chars: usize,
    /// 응답 이벤트 채널 용량
    pub stream_buffer: usize,
    pub embed_mode: EmbedMode,
    /// 일부 청크 임베딩 실패를 허용할지 여부
    pub allow_partial_embeddings: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = get_data_dir();
        Self {
            index_dir: data_dir.join("index"),
            docs_dir: data_dir.join("documents"),
            chunk: ChunkConfig::default(),
            top_k: 5,
            metadata_limit: 5,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            embed_model: DEFAULT_MODEL.to_string(),
            llm_model: DEFAULT_MODEL.to_string(),
            embed_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            max_query_chars: 4000,
            stream_buffer: 32,
            embed_mode: EmbedMode::PerChunk,
            allow_partial_embeddings: true,
        }
    }
}

impl RagConfig {
    /// 기본값에 환경변수를 적용
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(host) = non_empty_env("OLLAMA_HOST") {
            config.ollama_host = host;
        }
        if let Some(model) = non_empty_env("SOP_RAG_EMBED_MODEL") {
            config.embed_model = model;
        }
        if let Some(model) = non_empty_env("SOP_RAG_LLM_MODEL") {
            config.llm_model = model;
        }
        if let Some(mode) = non_empty_env("SOP_RAG_EMBED_MODE") {
            match EmbedMode::parse(&mode) {
                Some(m) => config.embed_mode = m,
                None => tracing::warn!("Unknown SOP_RAG_EMBED_MODE '{}', using default", mode),
            }
        }

        config
    }

    /// 인덱스 디렉토리 지정
    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.index_dir = dir.into();
        self
    }

    /// 문서 디렉토리 지정
    pub fn with_docs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docs_dir = dir.into();
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
