//! 답변 생성 모듈 - Ollama `/api/generate` 스트리밍 클라이언트
//!
//! 검색된 컨텍스트와 질문으로 답변을 생성합니다.
//! 스트리밍 응답은 NDJSON 줄 단위로 도착하며, 각 줄의 `response` 조각을
//! 순서대로 내보냅니다.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 이전 대화 턴 (생성 프롬프트에만 사용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// 생성 요청
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// 검색된 청크 텍스트를 이어 붙인 컨텍스트
    pub context: String,
    /// 컨텍스트를 구성한 개별 청크 텍스트 (순서 유지)
    pub passages: Vec<String>,
    pub question: String,
    pub history: Vec<ChatTurn>,
}

impl GenerationRequest {
    /// 모델에 보낼 프롬프트 (대화 기록 + 컨텍스트 + 질문)
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        for turn in &self.history {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        if !self.history.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(&self.context);
        prompt.push_str("\n\n");
        prompt.push_str(&self.question);
        prompt
    }
}

/// 답변 조각 스트림 (유한, 재시작 불가)
pub type FragmentStream = BoxStream<'static, Result<String>>;

// ============================================================================
// Generator Trait
// ============================================================================

/// 답변 생성기 트레이트
#[async_trait]
pub trait Generator: Send + Sync {
    /// 완성된 답변 한 번에 생성
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// 답변 조각 스트림 생성 (기본 구현: 완성 답변 하나)
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let answer = self.generate(request).await?;
        Ok(futures::stream::once(async move { Ok(answer) }).boxed())
    }

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Generator
// ============================================================================

const GENERATE_PATH: &str = "/api/generate";

/// Ollama 생성 구현체
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    host: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// 스트림/단건 응답 한 줄
#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaGenerator {
    pub fn new(host: &str, model: &str) -> Result<Self> {
        if model.trim().is_empty() {
            anyhow::bail!("Generation model name must not be empty");
        }

        // 스트림 전체 길이는 제한하지 않고 연결만 제한 (토큰 간 대기는 호출 측 타임아웃)
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response> {
        let prompt = request.prompt();
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream,
        };

        let response = self
            .client
            .post(format!("{}{}", self.host, GENERATE_PATH))
            .json(&body)
            .send()
            .await
            .context("Failed to send generation request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama generation error ({}): {}", status, text);
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let response = self.send(request, false).await?;
        let body = response
            .text()
            .await
            .context("Failed to read generation response")?;
        let line = parse_line(&body)?;
        Ok(line.response)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        Ok(ndjson_fragments(response.bytes_stream()).boxed())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn parse_line(line: &str) -> Result<GenerateLine> {
    let parsed: GenerateLine =
        serde_json::from_str(line).context("Failed to parse generation response")?;
    if let Some(error) = parsed.error {
        anyhow::bail!("Ollama generation error: {}", error);
    }
    Ok(parsed)
}

/// 바이트 스트림을 NDJSON 줄 단위로 나눠 `response` 조각을 내보냄
///
/// 줄이 바이트 청크 경계에 걸쳐도 되도록 바이트 버퍼에 모아서 분리합니다.
fn ndjson_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        buf: Vec<u8>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        buf: Vec::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match parse_line(line) {
                    Ok(parsed) => {
                        if parsed.done {
                            state.finished = true;
                            if parsed.response.is_empty() {
                                return None;
                            }
                        }
                        if parsed.response.is_empty() {
                            continue;
                        }
                        return Some((Ok(parsed.response), state));
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(anyhow::Error::new(e).context("Generation stream interrupted")),
                        state,
                    ));
                }
                None => {
                    if state.buf.iter().all(|b| b.is_ascii_whitespace()) {
                        return None;
                    }
                    // 마지막 줄에 개행이 없는 경우
                    state.buf.push(b'\n');
                }
            }
        }
    })
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정으로 생성기 생성
pub fn create_generator(config: &crate::config::RagConfig) -> Result<OllamaGenerator> {
    let generator = OllamaGenerator::new(&config.ollama_host, &config.llm_model)?;
    tracing::info!(
        "Using Ollama generation (model: {}, host: {})",
        config.llm_model,
        config.ollama_host
    );
    Ok(generator)
}

// ============================================================================
// Tests
// ============================================================================
