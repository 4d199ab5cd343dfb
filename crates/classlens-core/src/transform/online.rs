//! Online exam-export transformer.
//!
//! Unlike the offline grid, the online layout is a hard-coded structural
//! contract: column A holds the roll number, the header row is the first
//! row whose column A equals "ROLLNO", and question response columns start
//! at column J (index 9) repeating every two columns until the first blank
//! header. Violations fail loudly with an error naming the sheet; nothing
//! is inferred from content. Online sheets never carry an answer key, so
//! the returned key is always empty.

use super::{normalize_option, normalize_token, ResponseTransformer};
use crate::answer_key::AnswerKey;
use crate::error::{PipelineError, Result};
use crate::matrix::ResponseMatrix;
use crate::sheet::load_grids;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// Column A holds the student roll number.
const STUDENT_ID_COL: usize = 0;
/// Column J holds the first question response.
const FIRST_Q_COL: usize = 9;
/// Responses repeat every two columns (J, L, N, ...).
const Q_COL_STEP: usize = 2;

/// Transformer for the online response workbook.
#[derive(Debug, Default)]
pub struct OnlineTransformer;

impl OnlineTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseTransformer for OnlineTransformer {
    fn transform(&self, path: &Path, class_id: &str) -> Result<(ResponseMatrix, AnswerKey)> {
        info!(
            "processing online format {} for class {class_id}",
            path.display()
        );

        let grids = load_grids(path, class_id)?;
        let target = class_id.to_lowercase();

        let mut student_order: Vec<String> = Vec::new();
        let mut answers: HashMap<String, BTreeMap<u32, String>> = HashMap::new();
        let mut max_question = 0u32;
        let mut processed_sheets = 0usize;

        for grid in &grids {
            if !grid.name.to_lowercase().contains(&target) {
                continue;
            }
            processed_sheets += 1;

            let Some(header_idx) = grid
                .rows
                .iter()
                .position(|row| {
                    row.get(STUDENT_ID_COL)
                        .is_some_and(|c| normalize_token(c) == "ROLLNO")
                })
            else {
                return Err(PipelineError::StructuralParse(format!(
                    "could not locate header row with 'RollNo' in sheet '{}'",
                    grid.name
                )));
            };

            let header = &grid.rows[header_idx];
            if FIRST_Q_COL >= header.len() {
                return Err(PipelineError::StructuralParse(format!(
                    "expected first question at column J but sheet '{}' has only {} columns",
                    grid.name,
                    header.len()
                )));
            }
            if header[FIRST_Q_COL].trim().is_empty() {
                return Err(PipelineError::StructuralParse(format!(
                    "column J does not contain question data in sheet '{}'",
                    grid.name
                )));
            }

            // Question columns: J, L, N, ... until the first blank header.
            let mut column_map: Vec<(u32, usize)> = Vec::new();
            let mut question = 1u32;
            let mut col = FIRST_Q_COL;
            while col < header.len() {
                if header[col].trim().is_empty() {
                    break;
                }
                column_map.push((question, col));
                question += 1;
                col += Q_COL_STEP;
            }
            if column_map.is_empty() {
                return Err(PipelineError::StructuralParse(format!(
                    "no question columns detected starting from column J in sheet '{}'",
                    grid.name
                )));
            }

            for row in &grid.rows[header_idx + 1..] {
                let student_id = row
                    .get(STUDENT_ID_COL)
                    .map(|c| c.trim().to_string())
                    .unwrap_or_default();
                if student_id.is_empty() {
                    continue;
                }

                let entry = answers.entry(student_id.clone()).or_insert_with(|| {
                    student_order.push(student_id.clone());
                    BTreeMap::new()
                });
                for &(q, col) in &column_map {
                    let cell = row.get(col).map(String::as_str).unwrap_or("");
                    let option = normalize_option(cell).unwrap_or_default();
                    entry.insert(q, option);
                    max_question = max_question.max(q);
                }
            }
        }

        if processed_sheets == 0 {
            return Err(PipelineError::StructuralParse(format!(
                "no sheets matched target class '{class_id}' in {}",
                path.display()
            )));
        }
        if answers.is_empty() {
            return Err(PipelineError::StructuralParse(format!(
                "no valid student data found in online response for class '{class_id}'"
            )));
        }

        let matrix = ResponseMatrix::from_students(&student_order, &answers, max_question);
        info!("online response matrix built for class {class_id}");
        // The online layout never carries a key row.
        Ok((matrix, AnswerKey::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_grid(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("extracted_online_sheet.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    // Ten leading columns of metadata, then question/score column pairs.
    fn online_fixture() -> String {
        let header = "RollNo,Name,x,x,x,x,x,x,x,Q1,M1,Q2,M2,,\n";
        let title = "Some Export Title,,,,,,,,,,,,,,\n";
        let s1 = "2001,RAVI,x,x,x,x,x,x,x,a,1,B,0,,\n";
        let s2 = "2002,ANU,x,x,x,x,x,x,x,-,0,D,1,,\n";
        format!("{title}{header}{s1}{s2}")
    }

    #[test]
    fn test_transform_fixed_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(dir.path(), &online_fixture());
        let (matrix, key) = OnlineTransformer::new().transform(&path, "2001").unwrap();
        // Grid name falls back to the class id, so the filter passes.
        assert!(key.is_empty());
        assert_eq!(matrix.students(), &["2001", "2002"]);
        assert_eq!(matrix.question_ids(), &[1, 2]);
        assert_eq!(matrix.get(1, "2001"), "A");
        assert_eq!(matrix.get(2, "2001"), "B");
        // Non-option tokens become unattempted.
        assert_eq!(matrix.get(1, "2002"), "");
        assert_eq!(matrix.get(2, "2002"), "D");
        matrix.validate().unwrap();
    }

    #[test]
    fn test_missing_rollno_header_names_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(dir.path(), "id,name\n1,x\n");
        let err = OnlineTransformer::new()
            .transform(&path, "10FB")
            .unwrap_err();
        match err {
            PipelineError::StructuralParse(msg) => assert!(msg.contains("10FB")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_too_few_columns_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(dir.path(), "RollNo,Name,x\n1,x,y\n");
        let err = OnlineTransformer::new().transform(&path, "x").unwrap_err();
        match err {
            PipelineError::StructuralParse(msg) => {
                assert!(msg.contains("column J"), "unexpected message: {msg}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_first_question_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(
            dir.path(),
            "RollNo,a,b,c,d,e,f,g,h,,x,y\n1,a,b,c,d,e,f,g,h,A,x,y\n",
        );
        let err = OnlineTransformer::new().transform(&path, "x").unwrap_err();
        assert!(matches!(err, PipelineError::StructuralParse(_)));
    }
}
