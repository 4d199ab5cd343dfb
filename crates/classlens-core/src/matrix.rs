//! The canonical question × student response matrix.
//!
//! Rows are question ids, columns are student ids, cells are selected
//! options ("A".."D") or empty for unattempted. Transformers build one
//! matrix per source; the runner merges them column-wise, validates the
//! invariants and publishes the result as `ResponseSheet.csv`.

use crate::error::{PipelineError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::warn;

/// Allowed cell values besides the empty string.
pub const VALID_OPTIONS: [&str; 4] = ["A", "B", "C", "D"];

/// Question × student grid of selected options.
#[derive(Debug, Clone)]
pub struct ResponseMatrix {
    question_ids: Vec<u32>,
    students: Vec<String>,
    /// cells[row][col] aligned with `question_ids` × `students`.
    cells: Vec<Vec<String>>,
}

impl ResponseMatrix {
    /// Build a matrix from per-student sparse answers, reindexed to the
    /// sequential range `1..=max_question` with empty fills.
    ///
    /// `order` fixes the column order (first-seen student first); `answers`
    /// maps student id to question id to selected option.
    pub fn from_students(
        order: &[String],
        answers: &HashMap<String, BTreeMap<u32, String>>,
        max_question: u32,
    ) -> Self {
        let question_ids: Vec<u32> = (1..=max_question).collect();
        let cells = question_ids
            .iter()
            .map(|q| {
                order
                    .iter()
                    .map(|s| {
                        answers
                            .get(s)
                            .and_then(|m| m.get(q))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();
        ResponseMatrix {
            question_ids,
            students: order.to_vec(),
            cells,
        }
    }

    pub fn question_ids(&self) -> &[u32] {
        &self.question_ids
    }

    pub fn students(&self) -> &[String] {
        &self.students
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Cell for (question id, student id); empty string when either is
    /// unknown.
    pub fn get(&self, question_id: u32, student_id: &str) -> &str {
        let Some(row) = self.question_ids.iter().position(|&q| q == question_id) else {
            return "";
        };
        let Some(col) = self.students.iter().position(|s| s == student_id) else {
            return "";
        };
        &self.cells[row][col]
    }

    /// Column-wise outer-join concatenation of source matrices.
    ///
    /// The merged row index is the sorted union of question ids with empty
    /// fills; duplicate student columns keep the first occurrence and log a
    /// warning.
    pub fn merge(sources: Vec<ResponseMatrix>) -> Result<ResponseMatrix> {
        if sources.is_empty() {
            return Err(PipelineError::MatrixInvariant(
                "no response matrices produced".to_string(),
            ));
        }

        let union: BTreeSet<u32> = sources
            .iter()
            .flat_map(|m| m.question_ids.iter().copied())
            .collect();
        let question_ids: Vec<u32> = union.into_iter().collect();

        let mut students: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut columns: Vec<Vec<String>> = Vec::new();

        for matrix in &sources {
            for (col, student) in matrix.students.iter().enumerate() {
                if !seen.insert(student.clone()) {
                    warn!(
                        "duplicate student id '{student}' across sources; keeping first occurrence"
                    );
                    continue;
                }
                let column = question_ids
                    .iter()
                    .map(|&q| {
                        matrix
                            .question_ids
                            .iter()
                            .position(|&mq| mq == q)
                            .map(|row| matrix.cells[row][col].clone())
                            .unwrap_or_default()
                    })
                    .collect();
                students.push(student.clone());
                columns.push(column);
            }
        }

        let cells = (0..question_ids.len())
            .map(|row| columns.iter().map(|c| c[row].clone()).collect())
            .collect();

        Ok(ResponseMatrix {
            question_ids,
            students,
            cells,
        })
    }

    /// Hard invariants checked before publication. Any violation is fatal
    /// for the class.
    pub fn validate(&self) -> Result<()> {
        for (i, &q) in self.question_ids.iter().enumerate() {
            let expected = (i + 1) as u32;
            if q != expected {
                return Err(PipelineError::MatrixInvariant(format!(
                    "question ids must be sequential 1..N; found {:?}",
                    self.question_ids
                )));
            }
        }

        let mut seen = HashSet::new();
        for student in &self.students {
            if !seen.insert(student) {
                return Err(PipelineError::MatrixInvariant(format!(
                    "duplicate student id in columns: '{student}'"
                )));
            }
        }

        for (row, cells) in self.cells.iter().enumerate() {
            for cell in cells {
                if !cell.is_empty() && !VALID_OPTIONS.contains(&cell.as_str()) {
                    return Err(PipelineError::MatrixInvariant(format!(
                        "invalid cell value '{cell}' at question {}; allowed: A, B, C, D, empty",
                        self.question_ids[row]
                    )));
                }
            }
        }

        Ok(())
    }

    /// Write the matrix as `ResponseSheet.csv`: first column `question_id`,
    /// one column per student, rows 1..N in order.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["question_id".to_string()];
        header.extend(self.students.iter().cloned());
        writer.write_record(&header)?;
        for (row, &q) in self.question_ids.iter().enumerate() {
            let mut record = vec![q.to_string()];
            record.extend(self.cells[row].iter().cloned());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_rows(
        question_ids: Vec<u32>,
        students: Vec<String>,
        cells: Vec<Vec<String>>,
    ) -> Self {
        ResponseMatrix {
            question_ids,
            students,
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(students: &[&str], rows: &[(u32, &[&str])]) -> ResponseMatrix {
        ResponseMatrix::from_rows(
            rows.iter().map(|(q, _)| *q).collect(),
            students.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|(_, r)| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_from_students_reindexes_and_fills() {
        let order = vec!["S1".to_string(), "S2".to_string()];
        let mut answers = HashMap::new();
        answers.insert(
            "S1".to_string(),
            BTreeMap::from([(1, "A".to_string()), (3, "C".to_string())]),
        );
        answers.insert("S2".to_string(), BTreeMap::from([(2, "B".to_string())]));

        let m = ResponseMatrix::from_students(&order, &answers, 3);
        assert_eq!(m.question_ids(), &[1, 2, 3]);
        assert_eq!(m.get(1, "S1"), "A");
        assert_eq!(m.get(2, "S1"), "");
        assert_eq!(m.get(2, "S2"), "B");
        assert_eq!(m.get(3, "S2"), "");
    }

    #[test]
    fn test_merge_dedupes_first_occurrence() {
        let a = matrix(&["S1", "S2"], &[(1, &["A", "B"]), (2, &["C", "D"])]);
        let b = matrix(&["S1", "S3"], &[(1, &["D", "D"]), (2, &["D", "A"])]);
        let merged = ResponseMatrix::merge(vec![a, b]).unwrap();
        assert_eq!(merged.students(), &["S1", "S2", "S3"]);
        // First-seen S1 column wins.
        assert_eq!(merged.get(1, "S1"), "A");
        assert_eq!(merged.get(2, "S3"), "A");
        merged.validate().unwrap();
    }

    #[test]
    fn test_merge_outer_join_fills_empty() {
        let a = matrix(&["S1"], &[(1, &["A"]), (2, &["B"])]);
        let b = matrix(&["S2"], &[(1, &["C"]), (2, &["D"]), (3, &["A"])]);
        let merged = ResponseMatrix::merge(vec![a, b]).unwrap();
        assert_eq!(merged.question_ids(), &[1, 2, 3]);
        assert_eq!(merged.get(3, "S1"), "");
        assert_eq!(merged.get(3, "S2"), "A");
    }

    #[test]
    fn test_validate_rejects_gap() {
        let m = matrix(&["S1"], &[(1, &["A"]), (3, &["B"])]);
        let err = m.validate().unwrap_err();
        assert!(matches!(err, PipelineError::MatrixInvariant(_)));
    }

    #[test]
    fn test_validate_rejects_nonzero_start() {
        let m = matrix(&["S1"], &[(2, &["A"]), (3, &["B"])]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cell_naming_value() {
        let m = matrix(&["S1"], &[(1, &["E"])]);
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("'E'"));
    }

    #[test]
    fn test_validate_accepts_empty_cells() {
        let m = matrix(&["S1", "S2"], &[(1, &["A", ""]), (2, &["", "D"])]);
        m.validate().unwrap();
    }

    #[test]
    fn test_write_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ResponseSheet.csv");
        let m = matrix(&["S1", "S2"], &[(1, &["A", "B"]), (2, &["", "D"])]);
        m.write_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "question_id,S1,S2");
        assert_eq!(lines.next().unwrap(), "1,A,B");
        assert_eq!(lines.next().unwrap(), "2,,D");
    }
}
