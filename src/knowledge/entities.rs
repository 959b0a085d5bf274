//! 엔티티 추출 - 패턴 기반 날짜/이름/레코드 코드 인식
//!
//! 청크 생성 시 메타데이터로 붙이고, 질의 시에는 하나의 집합으로 평탄화하여
//! 메타데이터 인덱스 조회 키로 사용합니다.
//!
//! 이름 패턴은 "대문자로 시작하는 두 단어" 휴리스틱입니다.
//! 문장 첫머리 단어 등 일반적인 대문자 구문도 이름으로 잡히는
//! 정밀도 한계가 있으며, 더 강한 NER이 없을 때의 기본 동작입니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 영문 월 이름 (긴 이름 우선)
const MONTHS: &str = "January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sept|Sep|Oct|Nov|Dec";

/// `DD Month YYYY` | `Month DD, YYYY` | `YYYY-MM-DD`
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?:\d{{1,2}}\s+(?:{m})\s+\d{{4}}|(?:{m})\s+\d{{1,2}},\s+\d{{4}}|\d{{4}}-\d{{2}}-\d{{2}})\b",
        m = MONTHS
    ))
    .expect("date pattern is valid")
});

/// `Xxxx Yyyy`
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+[ \t]+[A-Z][a-z]+\b").expect("name pattern is valid")
});

/// 6자 이상의 `[A-Z0-9#-]` 연속
static RECORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z0-9#-]{6,}").expect("record pattern is valid"));

// ============================================================================
// EntitySet
// ============================================================================

/// 추출된 엔티티 (카테고리별, 스캔 순서 유지 + 중복 제거)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    pub dates: Vec<String>,
    pub names: Vec<String>,
    pub records: Vec<String>,
    /// 예약 필드 (밑줄 서식 텍스트, 현재 로더는 채우지 않음)
    #[serde(default)]
    pub underlined: Vec<String>,
}

impl EntitySet {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
            && self.names.is_empty()
            && self.records.is_empty()
            && self.underlined.is_empty()
    }

    /// 모든 카테고리 값 순회
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.dates
            .iter()
            .chain(self.names.iter())
            .chain(self.records.iter())
            .chain(self.underlined.iter())
            .map(String::as_str)
    }

    /// 카테고리를 합쳐 하나의 집합으로 평탄화 (질의용)
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.values() {
            push_unique(&mut out, value);
        }
        out
    }
}

// ============================================================================
// EntityDetector
// ============================================================================

/// 엔티티 탐지 전략
///
/// 더 강한 탐지기(NER 모델 등)로 교체할 수 있도록 오케스트레이터는
/// 이 트레이트만 의존합니다.
pub trait EntityDetector: Send + Sync {
    fn detect(&self, text: &str) -> EntitySet;

    fn name(&self) -> &'static str;
}

/// 정규식 패턴 기반 탐지기
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternEntityExtractor;

impl EntityDetector for PatternEntityExtractor {
    fn detect(&self, text: &str) -> EntitySet {
        extract(text)
    }

    fn name(&self) -> &'static str {
        "PatternEntityExtractor"
    }
}

/// 텍스트에서 엔티티 추출 (매칭 없으면 빈 집합)
pub fn extract(text: &str) -> EntitySet {
    let mut set = EntitySet::default();

    for m in DATE_PATTERN.find_iter(text) {
        push_unique(&mut set.dates, m.as_str());
    }
    for m in NAME_PATTERN.find_iter(text) {
        push_unique(&mut set.names, m.as_str());
    }
    // 기호만의 연속("------", "######")도 패턴 규칙상 레코드 코드
    for m in RECORD_PATTERN.find_iter(text) {
        push_unique(&mut set.records, m.as_str());
    }

    set
}

/// 질의에서 엔티티 추출 (카테고리 구분 없이 평탄화)
pub fn extract_query_entities(detector: &dyn EntityDetector, query: &str) -> Vec<String> {
    detector.detect(query).flatten()
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================
