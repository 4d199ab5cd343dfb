//! Phase 0 orchestration: normalize raw response sheets per class.
//!
//! For each class the runner drives sheet extraction, transformation,
//! matrix merge, validation, answer-key resolution and artifact
//! publication. Failures are caught per class and reported in the run
//! summary; sibling classes always continue.

use crate::answer_key::AnswerKeyManager;
use crate::config::{is_spreadsheet_file, Config};
use crate::error::{PipelineError, Result};
use crate::matrix::ResponseMatrix;
use crate::sheet::{workbook_sheet_names, SheetExtractor};
use crate::transform::{OfflineTransformer, OnlineTransformer, ResponseTransformer};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{error, info, warn};

/// Outcome of one class's Phase 0 processing.
#[derive(Debug)]
pub struct ClassOutcome {
    pub class_id: String,
    pub result: Result<()>,
}

/// Per-class outcomes of a whole Phase 0 run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<ClassOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Orchestrates Phase 0 over all discovered classes.
pub struct Phase0Runner<'a> {
    config: &'a Config,
}

impl<'a> Phase0Runner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Phase0Runner { config }
    }

    /// Classes to process: the explicit target override, otherwise the
    /// union of sheet names found in both shared response workbooks.
    pub fn discover_classes(&self) -> Vec<String> {
        if let Some(target) = &self.config.target_class {
            info!("processing only target class: {target}");
            return vec![target.clone()];
        }

        let mut sheets: BTreeSet<String> = BTreeSet::new();
        for path in [
            self.config.online_shared_file(),
            self.config.offline_shared_file(),
        ] {
            if path.exists() {
                match workbook_sheet_names(&path) {
                    Ok(names) => sheets.extend(names),
                    Err(e) => warn!("could not list sheets of {}: {e}", path.display()),
                }
            }
        }
        let classes: Vec<String> = sheets.into_iter().collect();
        info!("discovered classes from sheets: {classes:?}");
        classes
    }

    /// Run Phase 0 for every discovered class, one at a time. A failing
    /// class is logged and skipped, never aborting its siblings.
    pub fn run(&self) -> RunReport {
        info!("=== starting phase 0 ===");
        let mut report = RunReport::default();
        for class_id in self.discover_classes() {
            let result = self.process_class(&class_id);
            match &result {
                Ok(()) => info!("class {class_id} processed successfully"),
                Err(e) => error!("class {class_id} failed: {e}"),
            }
            report.outcomes.push(ClassOutcome { class_id, result });
        }
        info!(
            "=== phase 0 completed: {} ok, {} failed ===",
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// The full per-class pipeline. Every step's failure is terminal for
    /// this class; nothing is retried and nothing partial is published.
    pub fn process_class(&self, class_id: &str) -> Result<()> {
        info!("--- processing class {class_id} ---");

        let uploads_dir = self.config.class_uploads_dir(class_id);

        // Gate: the question paper must exist before any processing. Its
        // absence is a distinct, specifically reported failure.
        let question_paper = uploads_dir.join("QuestionPaper.pdf");
        if !question_paper.exists() {
            return Err(PipelineError::MissingInput(format!(
                "QuestionPaper.pdf not found in {}",
                uploads_dir.display()
            )));
        }

        let norm_dir = self.config.normalized_dir(class_id);
        std::fs::create_dir_all(&norm_dir)?;

        // Extract the class sheet from whichever shared workbooks are
        // enabled and present.
        let online_extracted = norm_dir.join("extracted_online_sheet.csv");
        let mut has_online = false;
        if self.config.response_type.includes_online() {
            let shared = self.config.online_shared_file();
            if shared.exists() {
                has_online = SheetExtractor::extract(&shared, class_id, &online_extracted)?;
            } else {
                warn!("shared online response file not found: {}", shared.display());
            }
        }

        let offline_extracted = norm_dir.join("extracted_offline_sheet.csv");
        let mut has_offline = false;
        if self.config.response_type.includes_offline() {
            let shared = self.config.offline_shared_file();
            if shared.exists() {
                has_offline = SheetExtractor::extract(&shared, class_id, &offline_extracted)?;
            } else {
                warn!(
                    "shared offline response file not found: {}",
                    shared.display()
                );
            }
        }

        if !has_online && !has_offline {
            return Err(PipelineError::MissingInput(format!(
                "expected sheet '{class_id}' not found in response files"
            )));
        }

        // Transform whatever was extracted; any transform failure fails the
        // class.
        let mut matrices: Vec<ResponseMatrix> = Vec::new();
        let mut key_manager = AnswerKeyManager::new();

        if has_online {
            let (matrix, key) = OnlineTransformer::new().transform(&online_extracted, class_id)?;
            matrices.push(matrix);
            if !key.is_empty() {
                key_manager.load_online_key(key);
            }
        }
        if has_offline {
            let (matrix, key) =
                OfflineTransformer::new().transform(&offline_extracted, class_id)?;
            matrices.push(matrix);
            if !key.is_empty() {
                key_manager.load_offline_key(key);
            }
        }

        let matrix = ResponseMatrix::merge(matrices)?;
        matrix.validate()?;

        // The solution key from a prior phase run is optional.
        let solution_file = self.config.output_dir(class_id, "phase1").join("solution.json");
        key_manager.load_solution_key(&solution_file);
        key_manager.resolve()?;

        // Publish the normalized artifacts.
        let response_csv = norm_dir.join("ResponseSheet.csv");
        let key_json = norm_dir.join("answer_key.json");
        let audit_csv = norm_dir.join("answer_key_comparison_report.csv");
        matrix.write_csv(&response_csv)?;
        key_manager.save_key_json(&key_json)?;
        key_manager.generate_report(&audit_csv)?;

        // Copy into the Phase 1 input area, after clearing any raw
        // spreadsheets already present there.
        let input_dir = self.config.input_dir(class_id);
        std::fs::create_dir_all(&input_dir)?;
        clean_input_dir(&input_dir)?;

        std::fs::copy(&response_csv, input_dir.join("ResponseSheet.csv"))?;
        std::fs::copy(&key_json, input_dir.join("answer_key.json"))?;
        std::fs::copy(&audit_csv, input_dir.join("answer_key_comparison_report.csv"))?;
        std::fs::copy(&question_paper, input_dir.join("QuestionPaper.pdf"))?;

        // Solutions PDF is optional; two accepted filenames, normalized to
        // one on the way in.
        let mut found_solutions = false;
        for candidate in ["Solutions.pdf", "Solution.pdf"] {
            let src = uploads_dir.join(candidate);
            if src.exists() {
                std::fs::copy(&src, input_dir.join("Solutions.pdf"))?;
                info!("copied {candidate} to input as Solutions.pdf");
                found_solutions = true;
                break;
            }
        }
        if !found_solutions {
            info!("no solutions PDF found (optional)");
        }

        Ok(())
    }
}

/// Remove raw spreadsheet files so the next phase never sees one.
fn clean_input_dir(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_spreadsheet_file(&path) {
            warn!(
                "removed illegal spreadsheet from phase 1 input: {}",
                path.display()
            );
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseType;

    fn test_config(base: &Path) -> Config {
        Config {
            base_dir: base.to_path_buf(),
            target_class: None,
            response_type: ResponseType::Both,
            model_name: "test".into(),
            api_key: None,
        }
    }

    #[test]
    fn test_discover_with_target_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.target_class = Some("10FB".to_string());
        let runner = Phase0Runner::new(&config);
        assert_eq!(runner.discover_classes(), vec!["10FB".to_string()]);
    }

    #[test]
    fn test_discover_empty_without_workbooks() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runner = Phase0Runner::new(&config);
        assert!(runner.discover_classes().is_empty());
    }

    #[test]
    fn test_missing_question_paper_is_distinct_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runner = Phase0Runner::new(&config);
        let err = runner.process_class("10FB").unwrap_err();
        match err {
            PipelineError::MissingInput(msg) => assert!(msg.contains("QuestionPaper.pdf")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failed_class_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.target_class = Some("ghost".to_string());
        let runner = Phase0Runner::new(&config);
        let report = runner.run();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 0);
    }

    #[test]
    fn test_clean_input_dir_removes_spreadsheets_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.xlsx"), b"x").unwrap();
        std::fs::write(dir.path().join("legacy.XLS"), b"x").unwrap();
        std::fs::write(dir.path().join("ResponseSheet.csv"), b"x").unwrap();
        clean_input_dir(dir.path()).unwrap();
        assert!(!dir.path().join("stale.xlsx").exists());
        assert!(!dir.path().join("legacy.XLS").exists());
        assert!(dir.path().join("ResponseSheet.csv").exists());
    }
}
