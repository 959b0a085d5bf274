//! 텍스트 문서 요소 분리
//!
//! 빈 줄로 구분된 블록을 요소로 보고 구조 카테고리를 붙입니다.
//! - `Title`: Markdown 헤딩, 또는 마침표 없이 대문자로 시작하는 짧은 한 줄
//! - `Table`: 모든 줄이 탭/다중 공백으로 열이 나뉜 2줄 이상 블록
//! - `NarrativeText`: 그 외
//!
//! 직전 Title이 이후 요소의 `heading`이 되고, 문서 머리의
//! `Version: ...` / `Revision: ...` 줄은 모든 요소의 version/revision이 됩니다.

use std::sync::LazyLock;

use regex::Regex;

use crate::knowledge::LoadedDocument;

pub const CATEGORY_TITLE: &str = "Title";
pub const CATEGORY_TABLE: &str = "Table";
pub const CATEGORY_NARRATIVE: &str = "NarrativeText";

/// 제목으로 볼 한 줄의 최대 길이
const MAX_TITLE_CHARS: usize = 80;

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*\s*$").expect("heading pattern is valid"));

static VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*version\b\s*(?:[:#]|no\.?)?\s*(\S.*?)\s*$").expect("version pattern is valid")
});

static REVISION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*rev(?:ision)?\b\.?\s*(?:[:#]|no\.?)?\s*(\S.*?)\s*$")
        .expect("revision pattern is valid")
});

static COLUMN_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S(?:\t|[ ]{2,})\S").expect("column gap pattern is valid"));

/// 문서 머리 필드
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    pub version: Option<String>,
    pub revision: Option<String>,
}

/// `Version:` / `Revision:` 줄 탐색 (각각 처음 나온 값)
pub fn parse_header_fields(text: &str) -> HeaderFields {
    let mut fields = HeaderFields::default();

    for line in text.lines() {
        if fields.version.is_none() {
            if let Some(caps) = VERSION_LINE.captures(line) {
                fields.version = Some(caps[1].to_string());
                continue;
            }
        }
        if fields.revision.is_none() {
            if let Some(caps) = REVISION_LINE.captures(line) {
                fields.revision = Some(caps[1].to_string());
            }
        }
        if fields.version.is_some() && fields.revision.is_some() {
            break;
        }
    }

    fields
}

/// 텍스트를 구조 요소로 분리
pub fn split_elements(text: &str, source_path: &str) -> Vec<LoadedDocument> {
    let header = parse_header_fields(text);
    let mut heading: Option<String> = None;
    let mut elements = Vec::new();

    for block in blocks(text) {
        let (category, title) = classify_block(&block);
        if let Some(title) = title {
            heading = Some(title);
        }

        let mut element = LoadedDocument::new(block, source_path).with_category(category);
        element.heading = heading.clone();
        element.version = header.version.clone();
        element.revision = header.revision.clone();
        elements.push(element);
    }

    elements
}

/// 빈 줄 기준 블록 (앞뒤 공백 제거, 빈 블록 제외)
fn blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    blocks
}

/// 블록 카테고리와 (제목이면) 제목 텍스트
fn classify_block(block: &str) -> (&'static str, Option<String>) {
    let lines: Vec<&str> = block.lines().collect();

    if lines.len() == 1 {
        let line = lines[0].trim();
        if let Some(caps) = MARKDOWN_HEADING.captures(line) {
            return (CATEGORY_TITLE, Some(caps[1].to_string()));
        }
        if looks_like_title(line) {
            return (CATEGORY_TITLE, Some(line.to_string()));
        }
    }

    if lines.len() >= 2 && lines.iter().all(|l| COLUMN_GAP.is_match(l.trim())) {
        return (CATEGORY_TABLE, None);
    }

    (CATEGORY_NARRATIVE, None)
}

fn looks_like_title(line: &str) -> bool {
    if line.chars().count() > MAX_TITLE_CHARS || COLUMN_GAP.is_match(line) {
        return false;
    }
    if line.ends_with(['.', ',', ';', ':', '?', '!']) {
        return false;
    }
    if VERSION_LINE.is_match(line) || REVISION_LINE.is_match(line) {
        return false;
    }
    line.chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
