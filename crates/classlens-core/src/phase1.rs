//! Phase 1: question-paper and solution extraction, merge, and scoring.
//!
//! Inputs are the Phase 0 artifacts published under `input/class_<id>/`.
//! A guardrail refuses to run while any raw spreadsheet is still present
//! there. Outputs land under `output/class_<id>/phase1/`:
//! `questionpaper.json`, `solution.json`, `merged.json` and the scored
//! `student_question_analysis.csv` consumed by Phase 2.

use crate::config::{is_spreadsheet_file, Config};
use crate::error::{PipelineError, Result};
use crate::llm::GeminiClient;
use crate::pdf::load_pdf_pages;
use crate::prompts::{QUESTION_EXTRACTION_PROMPT, SOLUTION_EXTRACTION_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Pages shorter than this are skipped to avoid extraction hallucinations.
const MIN_PAGE_CHARS: usize = 50;

/// Placeholder explanation when only an answer key is available.
pub const ANSWER_KEY_ONLY_TEXT: &str = "Answer key provided. No explanation available.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_number: u32,
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub question_number: u32,
    pub correct_option: String,
    pub solution_text: String,
    pub key_concept: String,
    pub question_id: String,
}

/// A question joined with its solution, the unit Phase 2 packets are built
/// from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedQuestion {
    pub question_number: u32,
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub question_id: String,
    pub correct_option: String,
    pub solution_text: String,
    pub key_concept: String,
}

#[derive(Serialize, Deserialize)]
struct QuestionPaper {
    questions: Vec<Question>,
}

/// Drives the four Phase 1 steps for one class.
pub struct Phase1Runner<'a> {
    config: &'a Config,
    client: &'a GeminiClient,
}

impl<'a> Phase1Runner<'a> {
    pub fn new(config: &'a Config, client: &'a GeminiClient) -> Self {
        Phase1Runner { config, client }
    }

    pub fn run(&self, class_id: &str) -> Result<()> {
        info!("=== starting phase 1 for {class_id} ===");
        check_input_purity(&self.config.input_dir(class_id))?;

        let out_dir = self.config.output_dir(class_id, "phase1");
        std::fs::create_dir_all(&out_dir)?;

        self.extract_question_paper(class_id)?;
        self.extract_solutions(class_id)?;
        self.merge(class_id)?;
        self.score_responses(class_id)?;
        info!("=== phase 1 completed for {class_id} ===");
        Ok(())
    }

    /// Extract questions page by page from QuestionPaper.pdf, deduplicate by
    /// question id (keep last) and write `questionpaper.json`.
    pub fn extract_question_paper(&self, class_id: &str) -> Result<()> {
        let input_path = self.config.input_dir(class_id).join("QuestionPaper.pdf");
        info!("processing question paper: {}", input_path.display());

        let mut all_questions: Vec<Question> = Vec::new();
        for (page_num, text) in load_pdf_pages(&input_path)? {
            if text.trim().len() < MIN_PAGE_CHARS {
                warn!(
                    "page {page_num} has insufficient text ({} chars); skipping",
                    text.trim().len()
                );
                continue;
            }
            info!("processing page {page_num}");
            let data = self.client.call_json(QUESTION_EXTRACTION_PROMPT, &text)?;
            for item in unwrap_items(data, "questions") {
                match parse_question(&item) {
                    Some(q) => all_questions.push(q),
                    None => warn!("skipping question without number on page {page_num}"),
                }
            }
        }

        // Dedup keep-last: a question restated on a later page overrides the
        // earlier extraction.
        let mut by_id: BTreeMap<u32, Question> = BTreeMap::new();
        for q in all_questions {
            if by_id.insert(q.question_number, q.clone()).is_some() {
                warn!("duplicate {} detected, overwriting previous entry", q.question_id);
            }
        }
        let questions: Vec<Question> = by_id.into_values().collect();
        info!("extracted {} unique questions", questions.len());

        let out_dir = self.config.output_dir(class_id, "phase1");
        std::fs::create_dir_all(&out_dir)?;
        let out_path = out_dir.join("questionpaper.json");
        let file = std::fs::File::create(&out_path)?;
        serde_json::to_writer_pretty(file, &QuestionPaper { questions })?;
        info!("saved {}", out_path.display());
        Ok(())
    }

    /// Build `solution.json` from whichever solution source the class
    /// uploaded: a bare answer key (CSV or JSON) or a solutions PDF.
    pub fn extract_solutions(&self, class_id: &str) -> Result<()> {
        let class_dir = self.config.input_dir(class_id);
        let out_dir = self.config.output_dir(class_id, "phase1");
        std::fs::create_dir_all(&out_dir)?;
        let out_path = out_dir.join("solution.json");

        let key_candidates = ["AnswerKey.csv", "Solutions.csv", "answer_key.json"];
        let key_file = key_candidates
            .iter()
            .map(|c| class_dir.join(c))
            .find(|p| p.exists());

        let solutions = if let Some(path) = key_file {
            info!(
                "solution detected as answer-key-only ({})",
                path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
            );
            if path.extension().is_some_and(|e| e == "json") {
                load_answer_key_json(&path)?
            } else {
                load_answer_key_csv(&path)?
            }
        } else {
            let pdf_path = class_dir.join("Solutions.pdf");
            if !pdf_path.exists() {
                warn!(
                    "no solutions PDF or answer key found in {}",
                    class_dir.display()
                );
                return Ok(());
            }
            self.extract_solutions_pdf(&pdf_path)?
        };

        info!("extracted {} solutions", solutions.len());
        let file = std::fs::File::create(&out_path)?;
        serde_json::to_writer_pretty(file, &solutions)?;
        info!("saved {}", out_path.display());
        Ok(())
    }

    fn extract_solutions_pdf(&self, pdf_path: &Path) -> Result<Vec<Solution>> {
        info!("processing solutions PDF: {}", pdf_path.display());
        let mut solutions: Vec<Solution> = Vec::new();
        let mut key_only = false;

        for (page_num, text) in load_pdf_pages(pdf_path)? {
            info!("processing page {page_num}");
            let data = match self.client.call_json(SOLUTION_EXTRACTION_PROMPT, &text) {
                Ok(d) => d,
                Err(e) => {
                    // A bad page never aborts the whole document.
                    warn!("failed to extract from page {page_num}: {e}");
                    continue;
                }
            };
            for item in unwrap_items(data, "solutions") {
                let Some(mut sol) = parse_solution(&item) else {
                    warn!("skipping solution without number on page {page_num}");
                    continue;
                };
                if sol.solution_text.trim().is_empty()
                    || sol.solution_text.contains("Answer key provided")
                {
                    sol.solution_text = ANSWER_KEY_ONLY_TEXT.to_string();
                    sol.key_concept = "UNKNOWN".to_string();
                    key_only = true;
                }
                solutions.push(sol);
            }
        }

        if key_only {
            info!("solution detected as answer-key-only (PDF)");
        } else {
            info!("solution detected as detailed");
        }
        Ok(solutions)
    }

    /// Join `questionpaper.json` with `solution.json` into `merged.json`.
    /// Questions without a solution get UNKNOWN placeholders.
    pub fn merge(&self, class_id: &str) -> Result<()> {
        let phase1_dir = self.config.output_dir(class_id, "phase1");
        let qp_path = phase1_dir.join("questionpaper.json");
        let sol_path = phase1_dir.join("solution.json");

        if !qp_path.exists() {
            return Err(PipelineError::MissingInput(format!(
                "question paper JSON not found: {}",
                qp_path.display()
            )));
        }
        if !sol_path.exists() {
            return Err(PipelineError::MissingInput(format!(
                "solution JSON not found: {}",
                sol_path.display()
            )));
        }

        let paper: QuestionPaper = serde_json::from_reader(std::fs::File::open(&qp_path)?)?;
        let solutions: Vec<Solution> = serde_json::from_reader(std::fs::File::open(&sol_path)?)?;
        let sol_map: BTreeMap<&str, &Solution> = solutions
            .iter()
            .map(|s| (s.question_id.as_str(), s))
            .collect();

        let mut merged: Vec<MergedQuestion> = Vec::new();
        for q in &paper.questions {
            let (correct_option, solution_text, key_concept) =
                match sol_map.get(q.question_id.as_str()) {
                    Some(s) => (
                        s.correct_option.clone(),
                        s.solution_text.clone(),
                        s.key_concept.clone(),
                    ),
                    None => {
                        warn!("no solution mapping found for {}", q.question_id);
                        ("UNKNOWN".to_string(), String::new(), String::new())
                    }
                };
            merged.push(MergedQuestion {
                question_number: q.question_number,
                question_text: q.question_text.clone(),
                options: q.options.clone(),
                question_id: q.question_id.clone(),
                correct_option,
                solution_text,
                key_concept,
            });
        }

        info!("merged {} items", merged.len());
        let out_path = phase1_dir.join("merged.json");
        let file = std::fs::File::create(&out_path)?;
        serde_json::to_writer_pretty(file, &merged)?;
        info!("saved {}", out_path.display());
        Ok(())
    }

    /// Score every student response against the merged answer data and write
    /// `student_question_analysis.csv`, the ground-truth table Phase 2
    /// packetizes from.
    pub fn score_responses(&self, class_id: &str) -> Result<()> {
        let phase1_dir = self.config.output_dir(class_id, "phase1");
        let merged: Vec<MergedQuestion> =
            serde_json::from_reader(std::fs::File::open(phase1_dir.join("merged.json"))?)?;
        let merged_map: BTreeMap<&str, &MergedQuestion> = merged
            .iter()
            .map(|m| (m.question_id.as_str(), m))
            .collect();

        let response_path = self.config.input_dir(class_id).join("ResponseSheet.csv");
        let mut reader = csv::Reader::from_path(&response_path)?;
        let students: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(str::to_string)
            .collect();

        // rows[question_id][student index] = selected option
        let mut rows: Vec<(String, Vec<String>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let question_id = format!("Q{}", record.get(0).unwrap_or("").trim());
            let selections = record.iter().skip(1).map(str::to_string).collect();
            rows.push((question_id, selections));
        }

        let mut writer = csv::Writer::from_path(phase1_dir.join("student_question_analysis.csv"))?;
        writer.write_record([
            "student_id",
            "question_id",
            "selected_option",
            "correct_option",
            "attempted",
            "is_correct",
            "difficulty_tag",
            "key_concept",
        ])?;

        for (i, student) in students.iter().enumerate() {
            for (question_id, selections) in &rows {
                let selected = selections.get(i).map(String::as_str).unwrap_or("");
                let (correct, concept) = match merged_map.get(question_id.as_str()) {
                    Some(m) => (m.correct_option.as_str(), m.key_concept.as_str()),
                    None => ("UNKNOWN", ""),
                };
                let attempted = !selected.trim().is_empty();
                let is_correct = attempted && correct != "UNKNOWN" && selected == correct;
                writer.write_record([
                    student.as_str(),
                    question_id.as_str(),
                    selected,
                    correct,
                    bool_label(attempted),
                    bool_label(is_correct),
                    "Unknown",
                    concept,
                ])?;
            }
        }
        writer.flush()?;
        info!(
            "scored {} students x {} questions",
            students.len(),
            rows.len()
        );
        Ok(())
    }
}

/// Guardrail: Phase 1 must never see a raw spreadsheet in its input area.
pub fn check_input_purity(input_dir: &Path) -> Result<()> {
    if !input_dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        if path.is_file() && is_spreadsheet_file(&path) {
            return Err(PipelineError::SchemaMismatch(format!(
                "restricted file found in phase 1 input: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn bool_label(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// The extractor sometimes wraps its array in an object keyed by `wrapper`,
/// or returns a single object; flatten all three shapes.
fn unwrap_items(data: Value, wrapper: &str) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(wrapper) {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(map)],
        },
        _ => Vec::new(),
    }
}

/// Accept a question number as a JSON integer or a numeric/"Q<n>" string.
fn value_to_number(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim().trim_start_matches(['Q', 'q']);
            s.parse().ok()
        }
        _ => None,
    }
}

fn parse_question(item: &Value) -> Option<Question> {
    let number = value_to_number(item.get("question_number")?)?;
    let options = item
        .get("options")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Question {
        question_number: number,
        question_text: item
            .get("question_text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        options,
        question_id: format!("Q{number}"),
    })
}

fn parse_solution(item: &Value) -> Option<Solution> {
    let number = value_to_number(item.get("question_number")?)?;
    let field = |key: &str, default: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    Some(Solution {
        question_number: number,
        correct_option: field("correct_option", "UNKNOWN").trim().to_uppercase(),
        solution_text: field("solution_text", ""),
        key_concept: field("key_concept", ""),
        question_id: format!("Q{number}"),
    })
}

/// Answer key CSV: first row is a header, column A is the question number,
/// column B the correct option.
fn load_answer_key_csv(path: &Path) -> Result<Vec<Solution>> {
    info!("loading answer key from CSV: {}", path.display());
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut solutions = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(number) = record.get(0).and_then(|s| s.trim().parse::<u32>().ok()) else {
            continue;
        };
        let Some(option) = record.get(1).map(|s| s.trim().to_uppercase()) else {
            continue;
        };
        if option.is_empty() {
            continue;
        }
        solutions.push(key_only_solution(number, option));
    }
    Ok(solutions)
}

/// Answer key JSON, the Phase 0 artifact shape: an array of objects with
/// `question_id` (integer or "Q<n>") and `correct_option`.
fn load_answer_key_json(path: &Path) -> Result<Vec<Solution>> {
    info!("loading answer key from JSON: {}", path.display());
    let data: Value = serde_json::from_reader(std::fs::File::open(path)?)?;
    let mut solutions = Vec::new();
    if let Value::Array(items) = data {
        for item in items {
            let Some(number) = item.get("question_id").and_then(value_to_number) else {
                continue;
            };
            let Some(option) = item.get("correct_option").and_then(Value::as_str) else {
                continue;
            };
            solutions.push(key_only_solution(number, option.trim().to_uppercase()));
        }
    }
    Ok(solutions)
}

fn key_only_solution(number: u32, option: String) -> Solution {
    Solution {
        question_number: number,
        correct_option: option,
        solution_text: ANSWER_KEY_ONLY_TEXT.to_string(),
        key_concept: "UNKNOWN".to_string(),
        question_id: format!("Q{number}"),
    }
}
