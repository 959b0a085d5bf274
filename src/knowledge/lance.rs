//! LanceDB Vector Table - 임베딩 벡터 영속화
//!
//! 인덱스 디렉토리의 `vectors.lance`에 (position, chunk_id, embedding) 행을 저장합니다.
//! 검색은 메모리에 올린 벡터로 수행하고, LanceDB는 저장/복원만 담당합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "vectors";

/// 저장된 벡터 행
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub position: usize,
    pub chunk_id: String,
    pub embedding: Vec<f32>,
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 테이블
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("position", DataType::Int64, false),
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// (chunk_id, 벡터) 목록을 Arrow RecordBatch로 변환
    fn rows_to_batch(rows: &[(&str, &[f32])], dimension: usize) -> Result<RecordBatch> {
        if rows.is_empty() {
            anyhow::bail!("Cannot create batch from empty rows");
        }
        let dim = i32::try_from(dimension).context("Embedding dimension too large")?;

        if let Some((id, v)) = rows.iter().find(|(_, v)| v.len() != dimension) {
            anyhow::bail!(
                "Vector for chunk {} has dimension {} (expected {})",
                id,
                v.len(),
                dimension
            );
        }

        let positions: Vec<i64> = (0..rows.len() as i64).collect();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| *id).collect();
        let flat: Vec<f32> = rows.iter().flat_map(|(_, v)| v.iter().copied()).collect();

        let values = Float32Array::from(flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            dim,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dim)),
            vec![
                Arc::new(Int64Array::from(positions)),
                Arc::new(StringArray::from(ids)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 빌드 순서대로 벡터 테이블 생성
    pub async fn write_vectors(&self, rows: &[(&str, &[f32])], dimension: usize) -> Result<usize> {
        let batch = Self::rows_to_batch(rows, dimension)?;
        let schema = batch.schema();

        if self.table_exists().await? {
            anyhow::bail!("Vector table already exists");
        }

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .context("Failed to create vector table")?;

        Ok(rows.len())
    }

    /// 모든 벡터를 position 순서로 조회
    pub async fn read_vectors(&self) -> Result<Vec<StoredVector>> {
        if !self.table_exists().await? {
            anyhow::bail!("Vector table '{}' not found", TABLE_NAME);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open vector table")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        if count == 0 {
            return Ok(vec![]);
        }

        let stream = table
            .query()
            .limit(count)
            .execute()
            .await
            .context("Failed to scan vector table")?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to read vector batches")?;

        let mut rows = Vec::with_capacity(count);
        for batch in batches {
            let positions = batch
                .column_by_name("position")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing position column"))?;

            let ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            let embeddings = batch
                .column_by_name("embedding")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing embedding column"))?;

            for i in 0..batch.num_rows() {
                let values = embeddings.value(i);
                let values = values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| anyhow::anyhow!("Embedding values are not Float32"))?;

                let position = usize::try_from(positions.value(i))
                    .context("Negative vector position")?;

                rows.push(StoredVector {
                    position,
                    chunk_id: ids.value(i).to_string(),
                    embedding: values.values().to_vec(),
                });
            }
        }

        // 스캔 순서는 보장되지 않음
        rows.sort_by_key(|r| r.position);
        Ok(rows)
    }
}

// ============================================================================
// Tests
// ============================================================================
