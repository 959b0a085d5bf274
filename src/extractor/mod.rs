//! 문서 로드 모듈
//!
//! 수집된 파일을 청킹 입력(`LoadedDocument` 요소 목록)으로 변환합니다.
//! - 텍스트 파일: 빈 줄 단위 요소 분리 (Title/Table/NarrativeText)
//! - PDF 파일: pdf-extract로 페이지 단위 추출
//! - Word 문서: 외부 변환기가 필요하므로 건너뜀
//!
//! 파일 하나가 실패해도 로그만 남기고 나머지는 계속 로드합니다.

pub mod pdf;
pub mod text;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::collector::{CollectedFile, FileType};
use crate::knowledge::LoadedDocument;

// ============================================================================
// DocumentLoader Trait
// ============================================================================

/// 문서 로더 트레이트
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// 파일 하나를 요소 목록으로 로드
    async fn load(&self, path: &Path, file_type: FileType) -> Result<Vec<LoadedDocument>>;
}

// ============================================================================
// FileLoader
// ============================================================================

/// 로컬 파일 로더
#[derive(Debug, Clone)]
pub struct FileLoader {
    /// 요소 텍스트 앞에 `[SOURCE: 파일명]` 줄을 붙일지
    tag_source: bool,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self { tag_source: true }
    }
}

impl FileLoader {
    pub fn new(tag_source: bool) -> Self {
        Self { tag_source }
    }

    /// 텍스트 파일에서 추출
    async fn load_text(&self, path: &Path) -> Result<Vec<LoadedDocument>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {:?}", path))?;

        Ok(text::split_elements(&text, &path.display().to_string()))
    }

    /// PDF 파일에서 추출 (페이지당 요소 하나)
    async fn load_pdf(&self, path: &Path) -> Result<Vec<LoadedDocument>> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&owned))
            .await
            .context("PDF extraction task failed")??;

        let first_page = pages.first().map(|(_, t)| t.as_str()).unwrap_or_default();
        let header = text::parse_header_fields(first_page);
        let source = path.display().to_string();

        Ok(pages
            .into_iter()
            .map(|(page, text)| {
                let mut element = LoadedDocument::new(text, source.clone())
                    .with_category(text::CATEGORY_NARRATIVE)
                    .with_heading(format!("Page {}", page));
                element.version = header.version.clone();
                element.revision = header.revision.clone();
                element
            })
            .collect())
    }

    fn tag(&self, path: &Path, mut elements: Vec<LoadedDocument>) -> Vec<LoadedDocument> {
        if !self.tag_source {
            return elements;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        for element in &mut elements {
            element.text = format!("[SOURCE: {}]\n{}", name, element.text);
        }
        elements
    }
}

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self, path: &Path, file_type: FileType) -> Result<Vec<LoadedDocument>> {
        let elements = match file_type {
            FileType::Text => self.load_text(path).await?,
            FileType::Pdf => self.load_pdf(path).await?,
            FileType::Word => anyhow::bail!(
                "{:?} requires conversion to text or PDF before indexing",
                path
            ),
        };
        Ok(self.tag(path, elements))
    }
}

// ============================================================================
// Batch loading
// ============================================================================

/// 일괄 로드 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded_files: usize,
    pub failed_files: usize,
    pub elements: usize,
}

/// 파일들을 순서대로 로드 (실패한 파일은 경고 후 건너뜀)
pub async fn load_all(
    loader: &dyn DocumentLoader,
    files: &[CollectedFile],
) -> (Vec<LoadedDocument>, LoadReport) {
    let mut documents = Vec::new();
    let mut report = LoadReport::default();

    for file in files {
        match loader.load(&file.path, file.file_type).await {
            Ok(elements) => {
                tracing::info!("Loaded {} elements from {:?}", elements.len(), file.path);
                report.loaded_files += 1;
                report.elements += elements.len();
                documents.extend(elements);
            }
            Err(e) => {
                tracing::warn!("Skipping {:?}: {:#}", file.path, e);
                report.failed_files += 1;
            }
        }
    }

    (documents, report)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FileCollector;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_text_with_source_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sop-1.md");
        std::fs::write(&path, "# Scope\n\nApplies to line 4.").unwrap();

        let elements = FileLoader::default()
            .load(&path, FileType::Text)
            .await
            .unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].text, "[SOURCE: sop-1.md]\nApplies to line 4.");
        assert_eq!(elements[1].heading.as_deref(), Some("Scope"));
    }

    #[tokio::test]
    async fn test_word_documents_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.doc");
        std::fs::write(&path, b"binary").unwrap();

        let result = FileLoader::default().load(&path, FileType::Word).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_all_skips_failures() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Alpha paragraph.").unwrap();
        std::fs::write(dir.path().join("b.docx"), b"binary").unwrap();
        std::fs::write(dir.path().join("c.txt"), "Charlie paragraph.").unwrap();

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let (docs, report) = load_all(&FileLoader::new(false), &files).await;

        assert_eq!(report.loaded_files, 2);
        assert_eq!(report.failed_files, 1);
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha paragraph.", "Charlie paragraph."]);
    }
}
