//! Phase 3: class-level insight synthesis.
//!
//! Reads each class's Phase 2 summary, makes exactly one LLM call per class,
//! parses the reply into three focus zones and three action plans, and
//! writes one manifest row per class. The parser enforces class-level
//! framing: student-level phrasing is rewritten, statistics stripped, and
//! missing items filled with an explicit limitation note.

use crate::config::{class_folder, Config};
use crate::error::{PipelineError, Result};
use crate::llm::GeminiClient;
use crate::prompts::{CLASS_SYNTHESIS_PROMPT, CLASS_SYNTHESIS_SYSTEM};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{error, info, warn};

const MANIFEST_FILE: &str = "class_level_focus_and_action.csv";

const REQUIRED_COLUMNS: [&str; 5] = [
    "student_id",
    "strongest_concepts",
    "weakest_concepts",
    "dominant_mistake_pattern",
    "llm_summary",
];

const PROHIBITED_PHRASES: [&str; 7] = [
    "some students",
    "many students",
    "high performers",
    "low scorers",
    "individual students",
    "few students",
    "most students",
];

const FILLER: &str = "Insufficient class-level signal to derive additional pattern";

static STATISTIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+%|\d+\.\d+|\d+/\d+").unwrap());
static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").unwrap());
static EXTRA_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One manifest row.
#[derive(Debug, Clone)]
pub struct ClassInsights {
    pub class_id: String,
    pub focus_zones: [String; 3],
    pub action_plans: [String; 3],
}

pub struct Phase3Runner<'a> {
    config: &'a Config,
    client: &'a GeminiClient,
}

impl<'a> Phase3Runner<'a> {
    pub fn new(config: &'a Config, client: &'a GeminiClient) -> Self {
        Phase3Runner { config, client }
    }

    /// Classes with a Phase 2 summary present, narrowed by the target
    /// override when one is set.
    pub fn discover_classes(&self) -> Vec<String> {
        let output_root = self.config.output_root();
        let mut available: Vec<String> = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&output_root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if path
                    .join("phase2")
                    .join("student_insight_summary.csv")
                    .exists()
                {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        available.push(name.to_string());
                    }
                }
            }
        }
        available.sort();

        if let Some(target) = &self.config.target_class {
            let folder = class_folder(target);
            if available.contains(&folder) {
                return vec![folder];
            }
            warn!("target class {target} not found or missing phase 2 output");
            return Vec::new();
        }
        available
    }

    /// Synthesize every ready class and write the manifest. A failing class
    /// is dropped from the manifest, not retried.
    pub fn run(&self) -> Result<()> {
        info!("=== starting phase 3: class-level insight synthesis ===");
        let classes = self.discover_classes();
        if classes.is_empty() {
            return Err(PipelineError::MissingInput(
                "no classes ready for phase 3 (missing phase 2 outputs?)".to_string(),
            ));
        }
        info!("classes to process: {classes:?}");

        let mut results = Vec::new();
        for class_id in &classes {
            info!("--- processing class {class_id} ---");
            match self.synthesize_class(class_id) {
                Ok(insights) => {
                    info!("successfully synthesized insights for {class_id}");
                    results.push(insights);
                }
                Err(e) => {
                    error!("failed to process {class_id}: {e}");
                    continue;
                }
            }
        }

        if results.is_empty() {
            warn!("no results generated");
            return Ok(());
        }
        self.save_manifest(&results)?;
        info!("phase 3 complete, output written for {} classes", results.len());
        Ok(())
    }

    /// Single LLM call for one class; no retry loop.
    pub fn synthesize_class(&self, class_id: &str) -> Result<ClassInsights> {
        let csv_content = self.load_class_data(class_id)?;
        let prompt = format!("{CLASS_SYNTHESIS_SYSTEM}\n\n{CLASS_SYNTHESIS_PROMPT}");

        info!("calling model for class {class_id}");
        let response = self.client.call_text(&prompt, &csv_content)?;
        info!("received response for {class_id}, parsing");

        let (focus_zones, action_plans) = parse_synthesis(&response);
        Ok(ClassInsights {
            class_id: class_id.to_string(),
            focus_zones,
            action_plans,
        })
    }

    /// Read and validate the Phase 2 summary, returning it re-serialized to
    /// just the columns the prompt needs.
    pub fn load_class_data(&self, class_id: &str) -> Result<String> {
        let path = self
            .config
            .output_root()
            .join(class_id)
            .join("phase2")
            .join("student_insight_summary.csv");
        if !path.exists() {
            return Err(PipelineError::MissingInput(format!(
                "missing phase 2 output: {}",
                path.display()
            )));
        }
        read_summary_columns(&path)
    }

    fn save_manifest(&self, results: &[ClassInsights]) -> Result<()> {
        let output_root = self.config.output_root();
        std::fs::create_dir_all(&output_root)?;
        let path = output_root.join(MANIFEST_FILE);

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "class_id",
            "focus_zone_1",
            "focus_zone_2",
            "focus_zone_3",
            "action_plan_1",
            "action_plan_2",
            "action_plan_3",
        ])?;
        for r in results {
            writer.write_record([
                r.class_id.as_str(),
                r.focus_zones[0].as_str(),
                r.focus_zones[1].as_str(),
                r.focus_zones[2].as_str(),
                r.action_plans[0].as_str(),
                r.action_plans[1].as_str(),
                r.action_plans[2].as_str(),
            ])?;
        }
        writer.flush()?;
        info!("wrote phase 3 manifest to {}", path.display());
        Ok(())
    }
}

/// Validate the summary schema and project it down to the required columns.
fn read_summary_columns(path: &Path) -> Result<String> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut indices = Vec::with_capacity(REQUIRED_COLUMNS.len());
    for col in REQUIRED_COLUMNS {
        match headers.iter().position(|h| h == col) {
            Some(i) => indices.push(i),
            None => {
                return Err(PipelineError::SchemaMismatch(format!(
                    "missing column '{col}' in {}",
                    path.display()
                )))
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REQUIRED_COLUMNS)?;
    for record in reader.records() {
        let record = record?;
        let row: Vec<&str> = indices
            .iter()
            .map(|&i| record.get(i).unwrap_or(""))
            .collect();
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::SchemaMismatch(e.to_string()))?;
    String::from_utf8(bytes)
        .map_err(|e| PipelineError::SchemaMismatch(format!("non-utf8 CSV content: {e}")))
}

/// Parse the free-text reply into exactly three focus zones and three
/// action plans.
fn parse_synthesis(text: &str) -> ([String; 3], [String; 3]) {
    let sanitized = sanitize_student_phrasing(text);

    let mut focus_zones: Vec<String> = extract_items("Focus Zone", &sanitized)
        .into_iter()
        .map(|t| clean_text(&enhance_focus_zone(&t)))
        .collect();
    let mut action_plans: Vec<String> = extract_items("Action Plan", &sanitized)
        .into_iter()
        .map(|t| clean_text(&enhance_action_plan(&t)))
        .collect();

    focus_zones.truncate(3);
    action_plans.truncate(3);
    while focus_zones.len() < 3 {
        warn!("fewer than 3 focus zones derived, filling placeholder");
        focus_zones.push(FILLER.to_string());
    }
    while action_plans.len() < 3 {
        warn!("fewer than 3 action plans derived, filling placeholder");
        action_plans.push(FILLER.to_string());
    }

    let focus: [String; 3] = focus_zones.try_into().unwrap_or_else(|_| unreachable!());
    let action: [String; 3] = action_plans.try_into().unwrap_or_else(|_| unreachable!());
    (focus, action)
}

/// Replace student-level phrasing with "the class".
fn sanitize_student_phrasing(text: &str) -> String {
    let mut sanitized = text.to_string();
    let mut masked = false;
    for phrase in PROHIBITED_PHRASES {
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase)))
            .expect("static phrase pattern");
        if pattern.is_match(&sanitized) {
            let replaced = pattern.replace_all(&sanitized, "the class").into_owned();
            sanitized = replaced;
            masked = true;
        }
    }
    if masked {
        warn!("sanitized student-level phrasing from LLM output");
    }
    sanitized
}

/// Pull "<prefix> N: value" items, in index order.
fn extract_items(prefix: &str, content: &str) -> Vec<String> {
    let mut items = Vec::new();
    for i in 1..10 {
        let pattern = Regex::new(&format!(r"(?i){} {}:\s*(.*)", regex::escape(prefix), i))
            .expect("static item pattern");
        if let Some(caps) = pattern.captures(content) {
            let value = caps[1].trim().to_string();
            if !value.is_empty() {
                items.push(value);
            }
        }
    }
    items
}

/// Focus zones must be behavior-based: strip statistics and scores.
fn enhance_focus_zone(text: &str) -> String {
    let mut text = text.to_string();
    if STATISTIC.is_match(&text) {
        warn!("focus zone contains statistics: '{text}', rewriting");
        let no_parens = PARENTHETICAL.replace_all(&text, "").into_owned();
        let no_stats = STATISTIC.replace_all(&no_parens, "").into_owned();
        text = no_stats.replace("Accuracy", "").replace("Score", "");
    }
    let text = text.trim();
    if text.is_empty() {
        "Difficulty applying core concepts to scenarios".to_string()
    } else {
        text.to_string()
    }
}

/// Action plans must start with an instructional verb and avoid passive
/// recommendation framing.
fn enhance_action_plan(text: &str) -> String {
    const ALLOWED_VERBS: [&str; 4] = ["Reinforce", "Introduce", "Spend", "Use"];
    const DISALLOWED: [&str; 3] = ["Students should", "It is recommended", "There is a need to"];

    let mut text = text.trim().to_string();
    let first_word = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string();
    if !ALLOWED_VERBS.contains(&first_word.as_str()) {
        warn!("action plan starts with invalid verb: '{first_word}', rewriting");
        if let Some(idx) = text.rfind("should") {
            let tail = text[idx + "should".len()..].trim().to_string();
            text = tail;
        }
        text = format!("Reinforce {text}");
    }
    for d in DISALLOWED {
        let pattern = Regex::new(&format!("(?i){}", regex::escape(d))).expect("static pattern");
        let stripped = pattern.replace_all(&text, "").trim().to_string();
        text = stripped;
    }
    text
}

/// Final pass: drop hedging words and collapse whitespace.
fn clean_text(text: &str) -> String {
    static HEDGING: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(may|might|could be|possibly)\b").unwrap());
    let text = HEDGING.replace_all(text, "");
    EXTRA_SPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let response = "\
Focus Zone 1: Sign errors when rearranging linear equations.
Focus Zone 2: Confusing series and parallel resistance formulas.
Focus Zone 3: Limited signal beyond the two gaps above.

Action Plan 1: Reinforce equation rearrangement with board-worked counterexamples.
Action Plan 2: Use circuit diagrams contrasting series and parallel setups.
Action Plan 3: Spend five minutes rechecking sign conventions before each problem set.";

        let (focus, action) = parse_synthesis(response);
        assert_eq!(focus[0], "Sign errors when rearranging linear equations.");
        assert!(action[0].starts_with("Reinforce"));
        assert!(action[1].starts_with("Use"));
        assert!(action[2].starts_with("Spend"));
    }

    #[test]
    fn test_parse_fills_missing_items() {
        let response = "Focus Zone 1: Only one gap identified.\nAction Plan 1: Use worked examples daily.";
        let (focus, action) = parse_synthesis(response);
        assert_eq!(focus[1], FILLER);
        assert_eq!(focus[2], FILLER);
        assert_eq!(action[1], FILLER);
    }

    #[test]
    fn test_sanitize_student_phrasing() {
        let text = "Many students misread units; Most Students skip steps.";
        let sanitized = sanitize_student_phrasing(text);
        assert_eq!(sanitized, "the class misread units; the class skip steps.");
    }

    #[test]
    fn test_focus_zone_statistics_stripped() {
        let cleaned = enhance_focus_zone("Weak unit conversion (45% accuracy, 0.3 avg)");
        assert!(!cleaned.contains('%'));
        assert!(!cleaned.contains("0.3"));
    }

    #[test]
    fn test_action_plan_verb_enforced() {
        let plan = enhance_action_plan("Teachers should drill free-body diagrams");
        assert!(plan.starts_with("Reinforce"));

        let kept = enhance_action_plan("Introduce a two-step estimation check");
        assert_eq!(kept, "Introduce a two-step estimation check");
    }

    #[test]
    fn test_clean_text_removes_hedging() {
        assert_eq!(
            clean_text("This may  indicate a gap that might persist"),
            "This indicate a gap that persist"
        );
    }

    #[test]
    fn test_read_summary_columns_validates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        std::fs::write(
            &path,
            "student_id,accuracy_percentage,strongest_concepts,weakest_concepts,dominant_mistake_pattern,llm_summary\n\
             274600,80.0,Algebra,Optics,Sign errors,Misses sign flips under time pressure.\n",
        )
        .unwrap();
        let csv_content = read_summary_columns(&path).unwrap();
        assert!(csv_content.starts_with("student_id,strongest_concepts"));
        assert!(!csv_content.contains("accuracy_percentage"));
        assert!(csv_content.contains("274600,Algebra"));

        std::fs::write(&path, "student_id,llm_summary\nx,y\n").unwrap();
        assert!(matches!(
            read_summary_columns(&path).unwrap_err(),
            PipelineError::SchemaMismatch(_)
        ));
    }
}
