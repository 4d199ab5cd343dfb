//! End-to-end exercise of the Phase 0 component chain on extracted grids:
//! transform both layouts, merge, validate, resolve the key, and publish
//! the three artifacts.

use classlens_core::answer_key::AnswerKeyManager;
use classlens_core::config::{Config, ResponseType};
use classlens_core::matrix::ResponseMatrix;
use classlens_core::phase0::Phase0Runner;
use classlens_core::transform::{OfflineTransformer, OnlineTransformer, ResponseTransformer};
use classlens_core::PipelineError;
use std::path::Path;

const CLASS: &str = "10FB";

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Offline OMR grid: key row, two students, totals row.
fn offline_grid() -> &'static str {
    "Exam Export,,,\n\
     CANDIDATE ID,CANDIDATE NAME,Q1,Q2\n\
     0,ANSWER KEY,A,C\n\
     274600,RAVI,A,B\n\
     274601,ANU,,C\n\
     MAX MARKS,,4,4\n"
}

/// Online export: fixed columns, responses at J and L.
fn online_grid() -> &'static str {
    "Export,,,,,,,,,,,,\n\
     RollNo,Name,c,d,e,f,g,h,i,Q1,M1,Q2,M2\n\
     274602,KIRAN,c,d,e,f,g,h,i,B,0,C,1\n"
}

#[test]
fn transform_merge_resolve_and_publish() {
    let dir = tempfile::tempdir().unwrap();

    let offline_path = write_file(dir.path(), "extracted_offline_sheet.csv", offline_grid());
    let online_path = write_file(dir.path(), "extracted_online_sheet.csv", online_grid());

    let (offline_matrix, offline_key) = OfflineTransformer::new()
        .transform(&offline_path, CLASS)
        .unwrap();
    let (online_matrix, online_key) = OnlineTransformer::new()
        .transform(&online_path, CLASS)
        .unwrap();

    // The online layout never yields a key.
    assert!(online_key.is_empty());
    assert_eq!(offline_key.len(), 2);

    let matrix = ResponseMatrix::merge(vec![online_matrix, offline_matrix]).unwrap();
    matrix.validate().unwrap();
    assert_eq!(matrix.question_ids(), &[1, 2]);
    assert_eq!(matrix.students().len(), 3);
    assert_eq!(matrix.get(1, "274600"), "A");
    assert_eq!(matrix.get(2, "274602"), "C");

    let mut manager = AnswerKeyManager::new();
    manager.load_offline_key(offline_key);
    let resolved = manager.resolve().unwrap().clone();
    assert_eq!(resolved.get(&1).map(String::as_str), Some("A"));

    // Publish the three artifacts and read them back.
    let response_csv = dir.path().join("ResponseSheet.csv");
    let key_json = dir.path().join("answer_key.json");
    let report_csv = dir.path().join("answer_key_comparison_report.csv");
    matrix.write_csv(&response_csv).unwrap();
    manager.save_key_json(&key_json).unwrap();
    manager.generate_report(&report_csv).unwrap();

    let sheet = std::fs::read_to_string(&response_csv).unwrap();
    let header = sheet.lines().next().unwrap();
    assert!(header.starts_with("question_id,"));
    assert!(header.contains("274600"));
    assert!(header.contains("274602"));

    let key: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&key_json).unwrap()).unwrap();
    let records = key.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["question_id"], 1);
    assert_eq!(records[0]["correct_option"], "A");

    let report = std::fs::read_to_string(&report_csv).unwrap();
    assert!(report
        .lines()
        .next()
        .unwrap()
        .contains("question_id,offline_key,online_key,solution_key,final_key,match"));
}

#[test]
fn runner_requires_question_paper_before_anything_else() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        base_dir: dir.path().to_path_buf(),
        target_class: Some(CLASS.to_string()),
        response_type: ResponseType::Both,
        model_name: "test".into(),
        api_key: None,
    };

    let runner = Phase0Runner::new(&config);
    let report = runner.run();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.failed(), 1);
    match &report.outcomes[0].result {
        Err(PipelineError::MissingInput(msg)) => assert!(msg.contains("QuestionPaper.pdf")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn runner_fails_when_no_sheet_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        base_dir: dir.path().to_path_buf(),
        target_class: Some(CLASS.to_string()),
        response_type: ResponseType::Both,
        model_name: "test".into(),
        api_key: None,
    };

    // Question paper present, but no shared response workbooks exist.
    let uploads = config.class_uploads_dir(CLASS);
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::write(uploads.join("QuestionPaper.pdf"), b"%PDF-1.4").unwrap();

    let err = Phase0Runner::new(&config).process_class(CLASS).unwrap_err();
    match err {
        PipelineError::MissingInput(msg) => assert!(msg.contains(CLASS)),
        other => panic!("unexpected error: {other}"),
    }
}
