//! Document Store - rusqlite 기반 청크/매니페스트 저장소
//!
//! 인덱스 디렉토리의 `docstore.db`에 빌드 결과의 청크 텍스트와 메타데이터,
//! 그리고 빌드 매니페스트(모델, 차원, 청크 수)를 저장합니다.
//! 벡터는 같은 디렉토리의 LanceDB 테이블에 따로 저장됩니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::document::Chunk;
use super::entities::EntitySet;

/// 저장 포맷 버전
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Types
// ============================================================================

/// 빌드 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    /// 임베딩 모델 식별자
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

// ============================================================================
// DocStore
// ============================================================================

/// 청크 문서 저장소
pub struct DocStore {
    conn: Connection,
    db_path: PathBuf,
}

impl DocStore {
    /// 새 저장소 생성 (스키마 초기화)
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn,
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기존 저장소를 읽기 전용으로 열기
    pub fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open document store {:?}", path))?;

        Ok(Self {
            conn,
            db_path: path.to_path_buf(),
        })
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS manifest (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    position INTEGER PRIMARY KEY,
                    id TEXT NOT NULL UNIQUE,
                    text TEXT NOT NULL,
                    source_path TEXT NOT NULL,
                    heading TEXT,
                    version TEXT,
                    revision TEXT,
                    entities TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_path);
                "#,
            )
            .context("Failed to create document store schema")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 매니페스트 저장
    pub fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let value = serde_json::to_string(manifest).context("Failed to serialize manifest")?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO manifest (key, value) VALUES ('index', ?1)",
                params![value],
            )
            .context("Failed to write manifest")?;
        Ok(())
    }

    /// 매니페스트 조회
    pub fn read_manifest(&self) -> Result<IndexManifest> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM manifest WHERE key = 'index'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read manifest")?;

        let value = value.ok_or_else(|| anyhow::anyhow!("Manifest entry missing"))?;
        let manifest: IndexManifest =
            serde_json::from_str(&value).context("Failed to parse manifest")?;

        if manifest.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported index format version {} (expected {})",
                manifest.format_version,
                FORMAT_VERSION
            );
        }
        Ok(manifest)
    }

    /// 청크 일괄 저장 (빌드 순서 = position)
    pub fn insert_chunks<'a, I>(&mut self, chunks: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let tx = self
            .conn
            .transaction()
            .context("Failed to begin transaction")?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (position, id, text, source_path, heading, version, revision, entities)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for (position, chunk) in chunks.into_iter().enumerate() {
                let entities = serde_json::to_string(&chunk.entities)
                    .context("Failed to serialize entities")?;
                stmt.execute(params![
                    position as i64,
                    chunk.id,
                    chunk.text,
                    chunk.source_path,
                    chunk.heading,
                    chunk.version,
                    chunk.revision,
                    entities
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
                count += 1;
            }
        }

        tx.commit().context("Failed to commit chunks")?;
        Ok(count)
    }

    /// 모든 청크를 빌드 순서대로 조회
    pub fn read_chunks(&self) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, id, text, source_path, heading, version, revision, entities
             FROM chunks ORDER BY position",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Chunk {
                    id: row.get(1)?,
                    text: row.get(2)?,
                    source_path: row.get(3)?,
                    heading: row.get(4)?,
                    version: row.get(5)?,
                    revision: row.get(6)?,
                    entities: EntitySet::default(),
                },
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for (expected, row) in rows.enumerate() {
            let (position, mut chunk, entities) = row.context("Failed to read chunk row")?;
            if position != expected as i64 {
                anyhow::bail!("Chunk positions are not contiguous at {}", expected);
            }
            chunk.entities = serde_json::from_str(&entities)
                .with_context(|| format!("Failed to parse entities of chunk {}", chunk.id))?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }

    /// 저장된 청크 수
    #[cfg(test)]
    pub fn chunk_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to count chunks")?;
        Ok(count as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DocStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("docstore.db");
        let store = DocStore::create(&db_path).unwrap();
        (dir, store)
    }

    fn sample_chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source_path: "docs/sop-7.txt".to_string(),
            entities: crate::knowledge::entities::extract(text),
            heading: Some("Deviation Handling".to_string()),
            version: Some("3.1".to_string()),
            revision: None,
        }
    }

    fn sample_manifest(count: usize) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: "mistral".to_string(),
            dimension: 4,
            chunk_count: count,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_chunks_round_trip_in_order() {
        let (_dir, mut store) = create_test_store();
        let chunks = vec![
            sample_chunk("a1", "Batch QX-20931 released on 12 March 2024"),
            sample_chunk("b2", "Reviewed by Alice Smith"),
        ];

        assert_eq!(store.insert_chunks(&chunks).unwrap(), 2);
        assert_eq!(store.chunk_count().unwrap(), 2);

        let loaded = store.read_chunks().unwrap();
        assert_eq!(loaded, chunks);
        assert_eq!(loaded[0].entities.records, vec!["QX-20931"]);
    }

    #[test]
    fn test_manifest_round_trip() {
        let (_dir, store) = create_test_store();
        let manifest = sample_manifest(2);
        store.write_manifest(&manifest).unwrap();
        assert_eq!(store.read_manifest().unwrap(), manifest);
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let (_dir, store) = create_test_store();
        assert!(store.read_manifest().is_err());
    }

    #[test]
    fn test_duplicate_chunk_id_rejected() {
        let (_dir, mut store) = create_test_store();
        let chunks = vec![sample_chunk("same", "one"), sample_chunk("same", "two")];
        assert!(store.insert_chunks(&chunks).is_err());
        // 트랜잭션 롤백
        assert_eq!(store.chunk_count().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_read_only() {
        let (dir, mut store) = create_test_store();
        store.write_manifest(&sample_manifest(1)).unwrap();
        store.insert_chunks(&[sample_chunk("a1", "text")]).unwrap();
        drop(store);

        let reopened = DocStore::open_existing(&dir.path().join("docstore.db")).unwrap();
        assert_eq!(reopened.read_chunks().unwrap().len(), 1);
        assert_eq!(reopened.read_manifest().unwrap().chunk_count, 1);
    }

    #[test]
    fn test_garbage_file_fails_to_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docstore.db");
        std::fs::write(&path, b"definitely not a sqlite database file").unwrap();

        let result = DocStore::open_existing(&path).and_then(|s| s.read_manifest());
        assert!(result.is_err());
    }
}
