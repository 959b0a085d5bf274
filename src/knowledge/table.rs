//! 표 정규화 - 탭/다중 공백으로 정렬된 텍스트를 Markdown 표로 변환
//!
//! 로더가 요소 카테고리를 "Table"로 표시했거나(메타데이터 신호),
//! 텍스트에 탭 또는 2칸 이상 공백 구분자가 있으면(휴리스틱 신호) 표로 봅니다.

use std::sync::LazyLock;

use regex::Regex;

/// 셀 구분자 (탭이 없을 때)
static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("multi-space pattern is valid"));

/// 휴리스틱 탐지용: 한 줄 안의 2칸 이상 공백
static COLUMN_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ ]{2,}").expect("column gap pattern is valid"));

// ============================================================================
// Detection
// ============================================================================

/// 표 판정 결과 (어느 신호가 발동했는지 기록)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableSignal {
    pub by_meta: bool,
    pub by_heur: bool,
}

impl TableSignal {
    pub fn is_table(&self) -> bool {
        self.by_meta || self.by_heur
    }

    /// 진단 로그용 사유 문자열
    pub fn reason(&self) -> String {
        let mut reasons = Vec::new();
        if self.by_meta {
            reasons.push("metadata");
        }
        if self.by_heur {
            reasons.push("heuristic");
        }
        reasons.join(", ")
    }
}

/// 표 탐지 전략
pub trait TableDetector: Send + Sync {
    fn classify(&self, text: &str, category: Option<&str>) -> TableSignal;
}

/// 카테고리 힌트 + 탭/공백 휴리스틱
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTableDetector;

impl TableDetector for HeuristicTableDetector {
    fn classify(&self, text: &str, category: Option<&str>) -> TableSignal {
        let by_meta = category
            .map(|c| c.trim().eq_ignore_ascii_case("table"))
            .unwrap_or(false);
        let by_heur = text.contains('\t') || COLUMN_GAP.is_match(text);

        TableSignal { by_meta, by_heur }
    }
}

/// 기본 탐지기로 표 여부 판정
pub fn is_table(text: &str, category: Option<&str>) -> bool {
    HeuristicTableDetector.classify(text, category).is_table()
}

// ============================================================================
// Conversion
// ============================================================================

/// 텍스트를 Markdown 표로 변환
///
/// 첫 행(헤더)의 열이 2개 미만이면 입력을 그대로 반환합니다.
pub fn to_markdown_table(text: &str) -> String {
    let rows: Vec<Vec<String>> = text
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(split_row)
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .collect();

    let header = match rows.first() {
        Some(h) if h.len() >= 2 => h,
        _ => return text.to_string(),
    };

    let width = header.len();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(header));
    lines.push(format_row(&vec!["---".to_string(); width]));

    for row in &rows[1..] {
        let mut row = row.clone();
        if row.len() < width {
            row.resize(width, String::new());
        }
        lines.push(format_row(&row));
    }

    lines.join("\n")
}

fn split_row(line: &str) -> Vec<String> {
    if line.contains('\t') {
        line.split('\t').map(|c| c.trim().to_string()).collect()
    } else {
        MULTI_SPACE
            .split(line.trim())
            .map(|c| c.trim().to_string())
            .collect()
    }
}

fn format_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn resplit(markdown: &str) -> Vec<Vec<String>> {
        markdown
            .lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches('|')
                    .trim_end_matches('|')
                    .split('|')
                    .map(|c| c.trim().to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_tab_separated_table() {
        let text = "Step\tOwner\tDue\nReview\tQA\t2024-03-12\nSign\tLead\t2024-03-15";
        let md = to_markdown_table(text);
        assert_eq!(
            md,
            "| Step | Owner | Due |\n| --- | --- | --- |\n| Review | QA | 2024-03-12 |\n| Sign | Lead | 2024-03-15 |"
        );
    }

    #[test]
    fn test_rows_round_trip_when_resplit() {
        let text = "Name    Role     Site\nAlice   Auditor  North\nBob     Operator  South";
        let md = to_markdown_table(text);
        let rows = resplit(&md);

        assert_eq!(rows[0], vec!["Name", "Role", "Site"]);
        assert_eq!(rows[1], vec!["---", "---", "---"]);
        assert_eq!(rows[2], vec!["Alice", "Auditor", "North"]);
        assert_eq!(rows[3], vec!["Bob", "Operator", "South"]);
    }

    #[test]
    fn test_short_rows_padded() {
        let text = "A\tB\tC\n1\t2";
        let md = to_markdown_table(text);
        assert!(md.ends_with("| 1 | 2 |  |"));
    }

    #[test]
    fn test_blank_rows_dropped() {
        let text = "A\tB\n\t\n\n1\t2";
        let md = to_markdown_table(text);
        assert_eq!(md.lines().count(), 3);
    }

    #[test]
    fn test_single_column_is_noop() {
        let text = "Just a sentence.\nAnother line of prose.";
        assert_eq!(to_markdown_table(text), text);
    }

    #[test]
    fn test_empty_is_noop() {
        assert_eq!(to_markdown_table(""), "");
        assert_eq!(to_markdown_table("   \n  "), "   \n  ");
    }

    #[test]
    fn test_detection_signals() {
        let detector = HeuristicTableDetector;

        let signal = detector.classify("plain prose only", Some("Table"));
        assert!(signal.by_meta && !signal.by_heur);
        assert_eq!(signal.reason(), "metadata");

        let signal = detector.classify("a\tb", None);
        assert!(!signal.by_meta && signal.by_heur);

        let signal = detector.classify("col1   col2", Some("NarrativeText"));
        assert!(signal.is_table());

        // 문단 구분(빈 줄)만으로는 표가 아님
        assert!(!is_table("para one\n\npara two", None));
    }
}
