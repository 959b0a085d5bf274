//! Text Chunking Module
//!
//! 문서 요소를 겹치는 문자 윈도우로 분할하고, 청크마다 정규화
//! (제어문자 제거, 빈 줄 축약, 줄 끝 공백 제거, 표 변환)와 엔티티 태깅을 수행합니다.
//!
//! 크기/오버랩 계약:
//! - 청크는 `max_characters` 문자를 넘지 않음
//! - 같은 문서의 연속된 청크는 `overlap_characters` 이상 겹침
//!   (문서가 윈도우 하나보다 짧으면 청크 1개)

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};

use super::document::{Chunk, LoadedDocument};
use super::entities::{EntityDetector, PatternEntityExtractor};
use super::table::{to_markdown_table, HeuristicTableDetector, TableDetector};

/// 빈 줄 여러 개 (공백만 있는 줄 포함)
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank line pattern is valid"));

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 400,
            overlap_characters: 50,
        }
    }
}

impl ChunkConfig {
    pub fn new(max_characters: usize, overlap_characters: usize) -> Self {
        Self {
            max_characters,
            overlap_characters,
        }
    }

    /// 오버랩 없는 설정
    pub fn without_overlap(max_characters: usize) -> Self {
        Self::new(max_characters, 0)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 분할 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 경계 인식 윈도우 청커
///
/// 윈도우 끝을 문단 → 줄 → 문장 → 단어 경계 순으로 찾고,
/// 경계가 없으면 문자 단위로 자릅니다.
pub struct RecursiveChunker {
    config: ChunkConfig,
}

/// 경계 선호 순서
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

const BOUNDARIES: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Word,
];

impl Boundary {
    /// `p`에서 청크를 끝낼 수 있는지 (청크는 `p` 직전 문자까지)
    fn matches(self, chars: &[char], p: usize) -> bool {
        let c = chars[p];
        match self {
            Boundary::Paragraph => c == '\n' && chars.get(p + 1) == Some(&'\n'),
            Boundary::Line => c == '\n',
            Boundary::Sentence => {
                c.is_whitespace() && p > 0 && matches!(chars[p - 1], '.' | '?' | '!')
            }
            Boundary::Word => c.is_whitespace(),
        }
    }
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성 (400자 / 50자 오버랩)
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    fn max(&self) -> usize {
        self.config.max_characters.max(1)
    }

    /// 오버랩은 윈도우 절반을 넘지 않도록 제한
    fn overlap(&self) -> usize {
        self.config.overlap_characters.min(self.max() / 2)
    }

    /// 청크 범위(문자 인덱스, 끝 제외) 계산
    fn split_ranges(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let n = chars.len();
        let max = self.max();
        let overlap = self.overlap();

        let mut ranges = Vec::new();
        let mut start = skip_whitespace(chars, 0);
        let mut prev_end = 0;

        while start < n {
            let hard_end = (start + max).min(n);
            let min_end = (start + overlap + overlap / 2 + 1)
                .max(prev_end + 1)
                .min(hard_end);

            let end = if hard_end == n {
                n
            } else {
                find_break(chars, min_end, hard_end)
            };
            let end = trim_end_whitespace(chars, start, end);

            ranges.push((start, end));

            if hard_end == n {
                break;
            }

            prev_end = end;
            // 윈도우 꼬리가 긴 공백 구간이면 오버랩할 내용이 없으므로 공백 뒤에서 재시작
            start = if overlap == 0 || end < min_end {
                skip_whitespace(chars, end)
            } else {
                next_start(chars, start, end, overlap)
            };
        }

        ranges
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let chars: Vec<char> = text.trim_end().chars().collect();
        self.split_ranges(&chars)
            .into_iter()
            .map(|(s, e)| chars[s..e].iter().collect::<String>())
            .filter(|c| !c.trim().is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn trim_end_whitespace(chars: &[char], start: usize, mut end: usize) -> usize {
    while end > start + 1 && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    end
}

/// `[min_end, hard_end]` 안에서 선호도가 가장 높은 경계 중 가장 뒤쪽 위치
fn find_break(chars: &[char], min_end: usize, hard_end: usize) -> usize {
    for boundary in BOUNDARIES {
        for p in (min_end..=hard_end).rev() {
            if p < chars.len() && boundary.matches(chars, p) {
                return p;
            }
        }
    }
    hard_end
}

/// 다음 청크 시작점: `end - overlap` 이하에서 가장 가까운 단어 시작
fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    let candidate = end.saturating_sub(overlap).max(start + 1);
    let floor = candidate.saturating_sub(overlap / 2).max(start + 1);

    for p in (floor..=candidate).rev() {
        if !chars[p].is_whitespace() && chars[p - 1].is_whitespace() {
            return p;
        }
    }

    let mut p = candidate;
    while p > start + 1 && chars[p].is_whitespace() {
        p -= 1;
    }
    p
}

/// 청크 텍스트 정리
///
/// 제어문자(줄바꿈/탭 제외) 제거, 연속 빈 줄을 하나로 축약,
/// 줄 끝 공백 제거, 앞뒤 공백 제거.
pub fn clean_chunk_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let collapsed = BLANK_LINES.replace_all(&stripped, "\n\n");

    collapsed
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 결정적 청크 ID (원본, 문서 순번, 청크 순번, 텍스트의 SHA-256 앞 16자리)
fn chunk_id(source_path: &str, doc_index: usize, ordinal: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(doc_index.to_le_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// DocumentChunker
// ============================================================================

/// 문서 → 청크 파이프라인 (분할 + 정규화 + 엔티티 태깅)
pub struct DocumentChunker {
    splitter: Box<dyn Chunker>,
    entities: Arc<dyn EntityDetector>,
    tables: Arc<dyn TableDetector>,
    max_characters: usize,
}

impl DocumentChunker {
    pub fn new(config: ChunkConfig) -> Self {
        let max_characters = config.max_characters;
        Self {
            splitter: Box::new(RecursiveChunker::new(config)),
            entities: Arc::new(PatternEntityExtractor),
            tables: Arc::new(HeuristicTableDetector),
            max_characters,
        }
    }

    /// 탐지기 교체
    pub fn with_detectors(
        mut self,
        entities: Arc<dyn EntityDetector>,
        tables: Arc<dyn TableDetector>,
    ) -> Self {
        self.entities = entities;
        self.tables = tables;
        self
    }

    /// 문서들을 청크로 변환
    ///
    /// 입력이 비었거나 청크가 하나도 안 나오면 경고 후 빈 결과를 반환합니다.
    pub fn chunk(&self, documents: &[LoadedDocument]) -> Vec<Chunk> {
        if documents.is_empty() {
            tracing::warn!("No documents to chunk");
            return vec![];
        }

        let mut chunks = Vec::new();

        for (doc_index, doc) in documents.iter().enumerate() {
            // 정리는 길이를 늘리지 않으므로 분할 전에 수행해도 크기 계약이 유지됨
            let cleaned = clean_chunk_text(&doc.text);

            for (ordinal, piece) in self.splitter.chunk(&cleaned).into_iter().enumerate() {
                let text = self.normalize(&piece, doc.structural_category.as_deref(), chunks.len());
                if text.is_empty() {
                    continue;
                }

                let entities = self.entities.detect(&text);
                let chunk = Chunk {
                    id: chunk_id(&doc.source_path, doc_index, ordinal, &text),
                    text,
                    source_path: doc.source_path.clone(),
                    entities,
                    heading: doc.heading.clone(),
                    version: doc.version.clone(),
                    revision: doc.revision.clone(),
                };

                let n = chunks.len();
                if n < 5 || n % 50 == 0 {
                    tracing::debug!(
                        "[CHUNK {}] preview={:?} dates={:?} names={:?} records={:?} heading={:?} source={}",
                        n + 1,
                        chunk.text.chars().take(120).collect::<String>(),
                        chunk.entities.dates,
                        chunk.entities.names,
                        chunk.entities.records,
                        chunk.heading,
                        chunk.source_path
                    );
                }

                chunks.push(chunk);
            }
        }

        if chunks.is_empty() {
            tracing::warn!(
                "No chunks produced from {} documents. Check loader and chunking step.",
                documents.len()
            );
        } else {
            tracing::info!(
                "Split {} documents into {} chunks ({}, {})",
                documents.len(),
                chunks.len(),
                self.splitter.name(),
                self.entities.name()
            );
        }

        chunks
    }

    /// 청크 하나 정규화 (정리 + 표 변환)
    fn normalize(&self, piece: &str, category: Option<&str>, index: usize) -> String {
        let text = clean_chunk_text(piece);
        let signal = self.tables.classify(&text, category);

        if !signal.is_table() {
            return text;
        }

        let table = to_markdown_table(&text);
        if table == text {
            return text;
        }

        if table.chars().count() > self.max_characters {
            tracing::debug!(
                "[CHUNK {}] Table conversion skipped: result exceeds {} characters",
                index + 1,
                self.max_characters
            );
            return text;
        }

        tracing::debug!(
            "[CHUNK {}] Converted to Markdown table (reason: {})",
            index + 1,
            signal.reason()
        );
        table
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 문서들을 지정된 크기/오버랩으로 청킹
pub fn chunk_documents(
    documents: &[LoadedDocument],
    max_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    DocumentChunker::new(ChunkConfig::new(max_size, overlap)).chunk(documents)
}

// ============================================================================
// Tests
// ============================================================================
