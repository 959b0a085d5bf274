//! 테스트용 결정적 임베딩/생성기

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use crate::embedding::EmbeddingProvider;
use crate::generation::{FragmentStream, GenerationRequest, Generator};
use crate::knowledge::{Chunk, LoadedDocument};

pub const HASH_DIMENSION: usize = 64;

/// 단어 해시 bag-of-words 임베딩 (같은 단어를 공유할수록 유사)
pub struct HashEmbedding;

impl HashEmbedding {
    pub fn new() -> Self {
        Self
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; HASH_DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.to_lowercase().bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % HASH_DIMENSION as u64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text))
    }

    fn name(&self) -> &str {
        "hash-bow"
    }
}

/// 특정 문자열을 포함한 텍스트만 실패하는 임베딩
pub struct FlakyEmbedding {
    pub fail_on: String,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.fail_on) {
            anyhow::bail!("embedding backend rejected input");
        }
        Ok(hash_vector(text))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("batch endpoint unavailable")
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// 특정 문자열을 포함한 텍스트에 NaN이 섞인 벡터를 돌려주는 임베딩
pub struct NonFiniteEmbedding {
    pub poison_on: String,
}

#[async_trait]
impl EmbeddingProvider for NonFiniteEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = hash_vector(text);
        if text.contains(&self.poison_on) {
            vector[0] = f32::NAN;
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "non-finite"
    }
}

/// 항상 실패하는 임베딩
pub struct FailingEmbedding;

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("connection refused")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 응답하지 않는 임베딩
pub struct StalledEmbedding;

#[async_trait]
impl EmbeddingProvider for StalledEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![1.0; HASH_DIMENSION])
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// 컨텍스트 청크마다 조각 하나를 내보내는 생성기
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(request.passages.concat())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let fragments: Vec<Result<String>> = request.passages.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(fragments).boxed())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// 실패하는 생성기
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        anyhow::bail!("model not loaded")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 첫 조각 이후 멈추는 생성기 (스트림 해제 여부 기록)
pub struct StallingGenerator {
    pub released: Arc<AtomicBool>,
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for StallingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        anyhow::bail!("streaming only")
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> Result<FragmentStream> {
        let flag = ReleaseFlag(self.released.clone());
        let stream = futures::stream::unfold((0usize, flag), |(n, flag)| async move {
            if n > 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Some((Ok(format!("part-{}", n)), (n + 1, flag)))
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

pub fn chunk(id: &str, text: &str, source: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        source_path: source.to_string(),
        entities: crate::knowledge::extract(text),
        heading: None,
        version: None,
        revision: None,
    }
}

pub fn document(text: &str, source: &str) -> LoadedDocument {
    LoadedDocument::new(text, source)
}
