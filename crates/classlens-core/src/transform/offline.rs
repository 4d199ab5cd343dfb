//! Offline OMR-style sheet transformer.
//!
//! The layout is an unstructured grid: a header row carries "Q1", "Q2", ...
//! tokens that identify question columns by position, the student-id column
//! is found by header label (default column 0), an "ANSWER KEY" sentinel
//! row carries the extracted key, and totals/averages rows must be filtered
//! out of the student set.

use super::{normalize_option, normalize_token, ResponseTransformer};
use crate::answer_key::AnswerKey;
use crate::error::{PipelineError, Result};
use crate::matrix::ResponseMatrix;
use crate::sheet::{load_grids, SheetGrid};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Header labels that mark the student-id column.
const ID_COLUMN_LABELS: [&str; 4] = ["CANDIDATE ID", "ROLL NO", "ID", "STUDENT ID"];

/// Id-column values marking non-student rows (totals, averages, key rows).
const SENTINEL_IDS: [&str; 7] = ["", "0", "MAX MARKS", "AVERAGE", "CORRECT", "WRONG", "TOTR"];

static QUESTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Q\s*(\d+)$").unwrap());

/// Transformer for the offline response workbook.
#[derive(Debug, Default)]
pub struct OfflineTransformer;

impl OfflineTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseTransformer for OfflineTransformer {
    fn transform(&self, path: &Path, class_id: &str) -> Result<(ResponseMatrix, AnswerKey)> {
        info!(
            "processing offline format {} for class {class_id}",
            path.display()
        );

        let grids = load_grids(path, class_id)?;
        let normalized_target = normalize_class_token(class_id);

        let mut extracted_key = AnswerKey::new();
        let mut student_order: Vec<String> = Vec::new();
        let mut answers: HashMap<String, BTreeMap<u32, String>> = HashMap::new();
        let mut max_question = 0u32;
        let mut processed_sheets = 0usize;

        for grid in &grids {
            if !sheet_matches(&grid.name, &normalized_target) {
                continue;
            }
            info!("processing sheet '{}'", grid.name);
            processed_sheets += 1;

            let Some(header_idx) = find_header_row(grid) else {
                warn!("no Q1/Q2 header row found in '{}'; skipping", grid.name);
                continue;
            };

            let header = &grid.rows[header_idx];
            let mut question_columns: BTreeMap<usize, u32> = BTreeMap::new();
            let mut id_column = 0usize;
            for (col, cell) in header.iter().enumerate() {
                let token = normalize_token(cell);
                if ID_COLUMN_LABELS.contains(&token.as_str()) {
                    id_column = col;
                }
                if let Some(caps) = QUESTION_HEADER.captures(&token) {
                    if let Ok(q) = caps[1].parse::<u32>() {
                        question_columns.insert(col, q);
                        max_question = max_question.max(q);
                    }
                }
            }

            if question_columns.is_empty() {
                warn!("no question columns found in '{}'; skipping", grid.name);
                continue;
            }

            for row in &grid.rows[header_idx + 1..] {
                let tokens: Vec<String> = row
                    .iter()
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| normalize_token(c))
                    .collect();

                if tokens.iter().any(|t| t == "ANSWER KEY") {
                    for (&col, &q) in &question_columns {
                        let cell = row.get(col).map(String::as_str).unwrap_or("");
                        if let Some(opt) = normalize_option(cell) {
                            extracted_key.insert(q, opt);
                        }
                    }
                    continue;
                }

                let raw_id = row.get(id_column).map(String::as_str).unwrap_or("");
                let id = normalize_token(raw_id);
                if SENTINEL_IDS.contains(&id.as_str()) {
                    continue;
                }

                let entry = answers.entry(id.clone()).or_insert_with(|| {
                    student_order.push(id.clone());
                    BTreeMap::new()
                });
                for (&col, &q) in &question_columns {
                    let cell = row.get(col).map(String::as_str).unwrap_or("");
                    if let Some(opt) = normalize_option(cell) {
                        entry.insert(q, opt);
                    }
                }
            }
        }

        if processed_sheets == 0 {
            return Err(PipelineError::StructuralParse(format!(
                "no sheets matched class '{class_id}' in {}",
                path.display()
            )));
        }
        if answers.is_empty() {
            return Err(PipelineError::StructuralParse(format!(
                "no student data found for class '{class_id}' in {}",
                path.display()
            )));
        }

        let matrix = ResponseMatrix::from_students(&student_order, &answers, max_question);
        Ok((matrix, extracted_key))
    }
}

/// Lowercase the target and drop the `class_` prefix plus separators, the
/// same normalization applied to sheet names before containment matching.
fn normalize_class_token(class_id: &str) -> String {
    class_id
        .to_lowercase()
        .replacen("class_", "", 1)
        .replace(['_', ' '], "")
}

/// Containment match of the normalized class token against the cleaned
/// sheet name, with a fallback that strips a "class" prefix and matches the
/// numeric suffix (target "class10" matches sheet "10FB").
fn sheet_matches(sheet_name: &str, normalized_target: &str) -> bool {
    let clean = sheet_name.to_lowercase().replace(['_', ' '], "");
    if clean.contains(normalized_target) {
        return true;
    }
    if let Some(suffix) = normalized_target.strip_prefix("class") {
        if !suffix.is_empty() && clean.contains(suffix) {
            return true;
        }
    }
    false
}

/// The header row is the first row containing both "Q1" and "Q2" tokens.
fn find_header_row(grid: &SheetGrid) -> Option<usize> {
    grid.rows.iter().position(|row| {
        let tokens: Vec<String> = row
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| normalize_token(c))
            .collect();
        tokens.iter().any(|t| t == "Q1") && tokens.iter().any(|t| t == "Q2")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_grid(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("extracted_offline_sheet.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_sheet_matches_numeric_fallback() {
        assert!(sheet_matches("10FB", &normalize_class_token("class_10")));
        assert!(sheet_matches("Medical Batch", &normalize_class_token("medical")));
        assert!(!sheet_matches("Instructions", &normalize_class_token("class_10")));
    }

    #[test]
    fn test_transform_extracts_key_and_skips_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        // Header at columns 2,3; key row with sentinel id "0"; junk rows.
        let path = write_grid(
            dir.path(),
            "Exam Report,,,\n\
             CANDIDATE ID,CANDIDATE NAME,Q1,Q2\n\
             0,ANSWER KEY,A,C\n\
             274600,RAVI,A,B\n\
             274601,ANU,,C\n\
             MAX MARKS,,4,4\n\
             AVERAGE,,2.1,1.9\n",
        );
        let (matrix, key) = OfflineTransformer::new()
            .transform(&path, "274")
            .unwrap_or_else(|e| panic!("transform failed: {e}"));

        assert_eq!(key.get(&1).map(String::as_str), Some("A"));
        assert_eq!(key.get(&2).map(String::as_str), Some("C"));
        assert_eq!(matrix.students(), &["274600", "274601"]);
        assert_eq!(matrix.get(1, "274600"), "A");
        assert_eq!(matrix.get(1, "274601"), "");
        assert_eq!(matrix.get(2, "274601"), "C");
        matrix.validate().unwrap();
    }

    #[test]
    fn test_transform_no_students_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(
            dir.path(),
            "ID,NAME,Q1,Q2\n0,ANSWER KEY,A,B\nMAX MARKS,,4,4\n",
        );
        let err = OfflineTransformer::new()
            .transform(&path, "anything")
            .unwrap_err();
        assert!(matches!(err, PipelineError::StructuralParse(_)));
    }

    #[test]
    fn test_transform_no_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(dir.path(), "just,some,cells\nwithout,any,headers\n");
        let err = OfflineTransformer::new()
            .transform(&path, "anything")
            .unwrap_err();
        assert!(matches!(err, PipelineError::StructuralParse(_)));
    }

    #[test]
    fn test_id_column_detected_by_label() {
        let dir = tempfile::tempdir().unwrap();
        // Student id lives in column 1, labeled ROLL NO.
        let path = write_grid(
            dir.path(),
            "SNO,ROLL NO,Q1,Q2\n1,501,B,C\n2,502,A,\n",
        );
        let (matrix, _) = OfflineTransformer::new().transform(&path, "grid").unwrap();
        assert_eq!(matrix.students(), &["501", "502"]);
        assert_eq!(matrix.get(1, "501"), "B");
        assert_eq!(matrix.get(2, "502"), "");
    }
}
