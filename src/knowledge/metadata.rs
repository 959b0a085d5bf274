//! Metadata Index - 엔티티 값 → 청크 위치 조회
//!
//! 히트 조건 (청크별, 하나라도 만족하면 히트):
//! - 질의 엔티티 값이 청크의 dates/names/records/underlined 중 하나와 정확히 일치
//! - 질의 엔티티 값이 heading/version/revision/source_path의 부분 문자열
//!
//! 정확 일치는 스냅샷 생성 시 한 번 만든 역색인(값 → 위치 목록)으로 찾고,
//! 부분 문자열 매칭은 헤더 필드를 선형으로 훑습니다 (O(청크 × 엔티티)).
//! 결과는 항상 빌드 순서이며 관련도로 정렬하지 않습니다.

use std::collections::{BTreeSet, HashMap};

use super::document::Chunk;

/// 청크 헤더 필드 (부분 문자열 매칭 대상)
#[derive(Debug, Clone)]
struct HeaderFields {
    fields: Vec<String>,
}

/// 메타데이터 인덱스
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    exact: HashMap<String, Vec<usize>>,
    headers: Vec<HeaderFields>,
}

impl MetadataIndex {
    /// 빌드 순서의 청크들로 인덱스 생성
    pub fn build<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut headers = Vec::new();

        for (position, chunk) in chunks.into_iter().enumerate() {
            for value in chunk.entities.values() {
                let positions = exact.entry(value.to_string()).or_default();
                // 같은 청크의 다른 카테고리에 같은 값이 있을 수 있음
                if positions.last() != Some(&position) {
                    positions.push(position);
                }
            }

            headers.push(HeaderFields {
                fields: chunk.header_fields().map(str::to_string).collect(),
            });
        }

        tracing::debug!(
            "Metadata index built: {} chunks, {} distinct entity values",
            headers.len(),
            exact.len()
        );

        Self { exact, headers }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// 인덱스된 고유 엔티티 값 수
    pub fn distinct_values(&self) -> usize {
        self.exact.len()
    }

    /// 엔티티 값들로 히트한 청크 위치 (빌드 순서, 중복 없음)
    pub fn lookup<S: AsRef<str>>(&self, values: &[S]) -> Vec<usize> {
        let values: Vec<&str> = values
            .iter()
            .map(|v| v.as_ref())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return vec![];
        }

        let mut hits = BTreeSet::new();

        for value in &values {
            if let Some(positions) = self.exact.get(*value) {
                hits.extend(positions.iter().copied());
            }
        }

        for (position, header) in self.headers.iter().enumerate() {
            if hits.contains(&position) {
                continue;
            }
            let matched = header
                .fields
                .iter()
                .any(|field| values.iter().any(|value| field.contains(value)));
            if matched {
                hits.insert(position);
            }
        }

        hits.into_iter().collect()
    }
}

/// 역색인 없이 청크를 전부 훑는 조회 (동일 결과의 기준 구현)
#[cfg(test)]
fn scan_lookup<S: AsRef<str>>(values: &[S], chunks: &[Chunk]) -> Vec<usize> {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.as_ref())
        .filter(|v| !v.is_empty())
        .collect();

    chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| {
            values.iter().any(|value| {
                chunk.entities.values().any(|e| e == *value)
                    || chunk.header_fields().any(|field| field.contains(value))
            })
        })
        .map(|(position, _)| position)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chunk;

    fn corpus() -> Vec<Chunk> {
        let mut with_header = chunk("h", "General housekeeping rules.", "docs/SOP-HK-004.txt");
        with_header.heading = Some("Housekeeping".to_string());
        with_header.version = Some("v2.3".to_string());

        vec![
            chunk("a", "Batch QX-20931 was released on 12 March 2024.", "docs/batch.txt"),
            chunk("b", "Reviewed by Alice Smith during the audit.", "docs/audit.txt"),
            with_header,
            chunk("c", "Alice Smith signed deviation DEV-7781.", "docs/deviation.txt"),
        ]
    }

    #[test]
    fn test_exact_entity_match() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);

        assert_eq!(index.lookup(&["QX-20931"]), vec![0]);
        assert_eq!(index.lookup(&["12 March 2024"]), vec![0]);
    }

    #[test]
    fn test_results_in_build_order() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);
        assert_eq!(index.lookup(&["DEV-7781", "Alice Smith"]), vec![1, 3]);
    }

    #[test]
    fn test_header_substring_match() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);

        // source_path 부분 문자열
        assert_eq!(index.lookup(&["SOP-HK-004"]), vec![2]);
        // version 부분 문자열
        assert_eq!(index.lookup(&["2.3"]), vec![2]);
    }

    #[test]
    fn test_entity_match_is_exact_not_substring() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);
        assert!(index.lookup(&["QX-2093"]).is_empty());
    }

    #[test]
    fn test_no_values_no_hits() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);
        let none: [&str; 0] = [];
        assert!(index.lookup(&none).is_empty());
        assert!(index.lookup(&[""]).is_empty());
    }

    #[test]
    fn test_matches_linear_scan() {
        let chunks = corpus();
        let index = MetadataIndex::build(&chunks);

        let queries: Vec<Vec<&str>> = vec![
            vec!["Alice Smith"],
            vec!["docs"],
            vec!["QX-20931", "Housekeeping"],
            vec!["Nobody Here"],
            vec!["12 March 2024", "DEV-7781"],
        ];
        for query in queries {
            assert_eq!(index.lookup(&query), scan_lookup(&query, &chunks), "{:?}", query);
        }
    }
}
