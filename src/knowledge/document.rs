//! 문서/청크 타입
//!
//! - `LoadedDocument`: 로더가 만든 문서 요소 (청킹 입력)
//! - `Chunk`: 검색 단위. 생성 후 불변이며 엔티티는 생성 시점의 텍스트에서 파생됨

use serde::{Deserialize, Serialize};

use super::entities::EntitySet;

/// 로더가 반환하는 문서 요소
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    /// 구조 카테고리 ("Title", "Table", "NarrativeText" 등)
    pub structural_category: Option<String>,
    /// 원본 문서 식별자 (파일 경로)
    pub source_path: String,
    pub heading: Option<String>,
    pub version: Option<String>,
    pub revision: Option<String>,
}

impl LoadedDocument {
    pub fn new(text: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structural_category: None,
            source_path: source_path.into(),
            heading: None,
            version: None,
            revision: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.structural_category = Some(category.into());
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 빌드 내 고유 ID
    pub id: String,
    /// 정규화된 텍스트 (비어 있지 않음)
    pub text: String,
    pub source_path: String,
    pub entities: EntitySet,
    pub heading: Option<String>,
    pub version: Option<String>,
    pub revision: Option<String>,
}

impl Chunk {
    /// 부분 문자열 매칭 대상이 되는 헤더 필드들
    pub fn header_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.heading.as_deref(),
            self.version.as_deref(),
            self.revision.as_deref(),
            Some(self.source_path.as_str()),
        ]
        .into_iter()
        .flatten()
    }
}
