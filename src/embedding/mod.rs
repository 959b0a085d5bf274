//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더입니다.
//! 인덱스 빌드(청크 임베딩)와 시맨틱 검색(질의 임베딩)에서 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OllamaEmbedding::new("http://localhost:11434", "mistral")?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 모델 식별자 (인덱스 매니페스트에 기록)
    fn name(&self) -> &str;
}

/// 타임아웃을 적용한 임베딩 호출
pub async fn embed_with_timeout(
    embedder: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> std::result::Result<Vec<f32>, CollaboratorError> {
    match tokio::time::timeout(timeout, embedder.embed(text)).await {
        Ok(Ok(vector)) => Ok(vector),
        Ok(Err(e)) => Err(classify_embed_error(&e, timeout)),
        Err(_) => Err(CollaboratorError::EmbeddingTimeout(timeout)),
    }
}

/// HTTP 타임아웃은 `EmbeddingTimeout`, 나머지는 `EmbeddingFailure`로 분류
pub fn classify_embed_error(err: &anyhow::Error, timeout: Duration) -> CollaboratorError {
    let timed_out = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_timeout());

    if timed_out {
        CollaboratorError::EmbeddingTimeout(timeout)
    } else {
        CollaboratorError::EmbeddingFailure(format!("{:#}", err))
    }
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 단건 임베딩 엔드포인트
const EMBEDDINGS_PATH: &str = "/api/embeddings";
/// 배치 임베딩 엔드포인트
const EMBED_BATCH_PATH: &str = "/api/embed";

/// 연결 실패 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// Ollama 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    host: String,
    model: String,
    client: reqwest::Client,
}

/// `/api/embeddings` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// `/api/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedBatchRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `host` - Ollama 서버 주소 (예: `http://localhost:11434`)
    /// * `model` - 임베딩 모델 이름
    pub fn new(host: &str, model: &str) -> Result<Self> {
        Self::with_timeout(host, model, Duration::from_secs(60))
    }

    /// HTTP 타임아웃 지정
    pub fn with_timeout(host: &str, model: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            anyhow::bail!("Embedding model name must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    /// POST + 연결 실패 재시도 (타임아웃은 재시도하지 않음)
    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        let mut attempt = 0;

        loop {
            let response = match self.client.post(self.url(path)).json(body).send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "Embedding request failed, retrying in {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e).context("Failed to send embedding request"),
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return Ok(body);
            }

            if let Ok(error) = serde_json::from_str::<OllamaError>(&body) {
                anyhow::bail!("Ollama embedding error ({}): {}", status, error.error);
            }
            anyhow::bail!("Ollama embedding error ({}): {}", status, body);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let body = self.post_json(EMBEDDINGS_PATH, &request).await?;
        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        Ok(response.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedBatchRequest {
            model: &self.model,
            input: texts,
        };

        let body = self.post_json(EMBED_BATCH_PATH, &request).await?;
        let response: EmbedBatchResponse =
            serde_json::from_str(&body).context("Failed to parse batch embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Batch embedding returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }

        Ok(response.embeddings)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정으로 임베딩 프로바이더 생성
pub fn create_embedder(config: &crate::config::RagConfig) -> Result<OllamaEmbedding> {
    let embedder = OllamaEmbedding::with_timeout(
        &config.ollama_host,
        &config.embed_model,
        config.embed_timeout + Duration::from_secs(5),
    )?;
    tracing::info!(
        "Using Ollama embedding (model: {}, host: {})",
        config.embed_model,
        config.ollama_host
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
