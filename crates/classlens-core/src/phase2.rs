//! Phase 2: per-student packetization, LLM diagnosis, insight CSVs.
//!
//! Each student's scored rows are joined with the merged question data into
//! a packet, sent to the model for diagnosis, and the results flattened into
//! `student_question_insights.csv` and `student_insight_summary.csv`.

use crate::config::Config;
use crate::error::Result;
use crate::llm::GeminiClient;
use crate::phase1::MergedQuestion;
use crate::prompts::STUDENT_DIAGNOSIS_PROMPT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Pause between per-student calls to stay under rate limits.
const CALL_PAUSE: Duration = Duration::from_secs(1);

/// One student's complete question-level record, the unit of LLM analysis.
#[derive(Debug, Clone, Serialize)]
pub struct StudentPacket {
    pub student_id: String,
    pub questions: Vec<PacketQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketQuestion {
    pub question_id: String,
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_option: String,
    pub student_selected_option: String,
    pub attempted: bool,
    pub is_correct: bool,
    pub difficulty_tag: String,
    pub key_concept: String,
    pub solution_text: String,
}

/// The model's diagnosis for one student.
#[derive(Debug, Clone, Deserialize)]
pub struct StudentDiagnosis {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub per_question: Vec<QuestionDiagnosis>,
    #[serde(default)]
    pub summary: DiagnosisSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionDiagnosis {
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub mistake_type: String,
    #[serde(default)]
    pub correctness_reason: String,
    #[serde(default)]
    pub confidence_signal: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosisSummary {
    #[serde(default)]
    pub strongest_concepts: Vec<String>,
    #[serde(default)]
    pub weakest_concepts: Vec<String>,
    #[serde(default)]
    pub dominant_mistake_pattern: String,
    #[serde(default)]
    pub overall_summary: String,
}

pub struct Phase2Runner<'a> {
    config: &'a Config,
    client: &'a GeminiClient,
}

impl<'a> Phase2Runner<'a> {
    pub fn new(config: &'a Config, client: &'a GeminiClient) -> Self {
        Phase2Runner { config, client }
    }

    pub fn run(&self, class_id: &str) -> Result<()> {
        info!("=== starting phase 2 for {class_id} ===");
        let packets = self.packetize(class_id)?;
        if packets.is_empty() {
            warn!("no student packets generated for {class_id}");
            return Ok(());
        }
        info!("generated {} packets", packets.len());

        let diagnoses = self.diagnose(&packets);
        if diagnoses.is_empty() {
            warn!("no diagnoses returned for {class_id}");
            return Ok(());
        }
        info!("received diagnoses for {} students", diagnoses.len());

        self.write_csvs(class_id, &diagnoses, &packets)?;
        info!("=== phase 2 completed for {class_id} ===");
        Ok(())
    }

    /// Join the Phase 1 analysis rows with the merged question data into one
    /// packet per student. The analysis CSV is the truth for performance
    /// fields; `merged.json` only contributes static text.
    pub fn packetize(&self, class_id: &str) -> Result<Vec<StudentPacket>> {
        let phase1_dir = self.config.output_dir(class_id, "phase1");
        let merged: Vec<MergedQuestion> =
            serde_json::from_reader(std::fs::File::open(phase1_dir.join("merged.json"))?)?;
        let merged_map: BTreeMap<&str, &MergedQuestion> = merged
            .iter()
            .map(|m| (m.question_id.as_str(), m))
            .collect();

        let analysis_path = phase1_dir.join("student_question_analysis.csv");
        let mut reader = csv::Reader::from_path(&analysis_path)?;

        let mut order: Vec<String> = Vec::new();
        let mut by_student: BTreeMap<String, Vec<PacketQuestion>> = BTreeMap::new();

        for record in reader.deserialize() {
            let row: AnalysisRow = record?;
            let Some(merged_q) = merged_map.get(row.question_id.as_str()) else {
                warn!(
                    "question {} in analysis CSV but not in merged data; skipping",
                    row.question_id
                );
                continue;
            };
            if !by_student.contains_key(&row.student_id) {
                order.push(row.student_id.clone());
            }
            by_student
                .entry(row.student_id.clone())
                .or_default()
                .push(PacketQuestion {
                    question_id: row.question_id,
                    question_text: merged_q.question_text.clone(),
                    options: merged_q.options.clone(),
                    correct_option: row.correct_option,
                    student_selected_option: row.selected_option,
                    attempted: row.attempted == "True",
                    is_correct: row.is_correct == "True",
                    difficulty_tag: row.difficulty_tag,
                    key_concept: row.key_concept,
                    solution_text: merged_q.solution_text.clone(),
                });
        }

        Ok(order
            .into_iter()
            .filter_map(|student_id| {
                let questions = by_student.remove(&student_id)?;
                (!questions.is_empty()).then_some(StudentPacket {
                    student_id,
                    questions,
                })
            })
            .collect())
    }

    /// One LLM call per student. A failed call skips that student and never
    /// stops the run.
    pub fn diagnose(&self, packets: &[StudentPacket]) -> Vec<StudentDiagnosis> {
        let total = packets.len();
        info!("starting LLM analysis for {total} students");

        let mut results = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            info!("[{}/{total}] analyzing student {}", i + 1, packet.student_id);

            let content = match serde_json::to_string_pretty(packet) {
                Ok(c) => c,
                Err(e) => {
                    warn!("could not serialize packet for {}: {e}", packet.student_id);
                    continue;
                }
            };
            let prompt = format!("{STUDENT_DIAGNOSIS_PROMPT}\n\nStudent ID: {}", packet.student_id);

            match self
                .client
                .call_json(&prompt, &content)
                .and_then(|v| Ok(serde_json::from_value::<StudentDiagnosis>(v)?))
            {
                Ok(mut diagnosis) => {
                    if diagnosis.student_id.is_empty() {
                        diagnosis.student_id = packet.student_id.clone();
                    }
                    results.push(diagnosis);
                }
                Err(e) => {
                    warn!("failed to analyze student {}: {e}", packet.student_id);
                    continue;
                }
            }
            std::thread::sleep(CALL_PAUSE);
        }
        results
    }

    /// Flatten diagnoses into the two Phase 2 CSVs.
    pub fn write_csvs(
        &self,
        class_id: &str,
        diagnoses: &[StudentDiagnosis],
        packets: &[StudentPacket],
    ) -> Result<()> {
        let out_dir = self.config.output_dir(class_id, "phase2");
        std::fs::create_dir_all(&out_dir)?;

        // student -> question -> (selected, correct, concept) from the
        // original packets; the diagnosis stays the source for judgment
        // fields only.
        let mut packet_map: BTreeMap<&str, BTreeMap<&str, &PacketQuestion>> = BTreeMap::new();
        for p in packets {
            let entry = packet_map.entry(p.student_id.as_str()).or_default();
            for q in &p.questions {
                entry.insert(q.question_id.as_str(), q);
            }
        }

        let insights_path = out_dir.join("student_question_insights.csv");
        let mut writer = csv::Writer::from_path(&insights_path)?;
        writer.write_record([
            "student_id",
            "question_id",
            "selected_option",
            "correct_option",
            "is_correct",
            "mistake_type",
            "correctness_reason",
            "confidence_signal",
            "key_concept",
        ])?;

        // correct counts per student for the summary pass
        let mut stats: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

        for diagnosis in diagnoses {
            let student = diagnosis.student_id.as_str();
            for item in &diagnosis.per_question {
                let packet_q = packet_map
                    .get(student)
                    .and_then(|m| m.get(item.question_id.as_str()));
                let (selected, correct, concept) = match packet_q {
                    Some(q) => (
                        q.student_selected_option.as_str(),
                        q.correct_option.as_str(),
                        q.key_concept.as_str(),
                    ),
                    None => ("", "", ""),
                };
                writer.write_record([
                    student,
                    item.question_id.as_str(),
                    selected,
                    correct,
                    if item.is_correct { "True" } else { "False" },
                    item.mistake_type.as_str(),
                    item.correctness_reason.as_str(),
                    item.confidence_signal.as_str(),
                    concept,
                ])?;
                let entry = stats.entry(student).or_insert((0, 0));
                entry.0 += 1;
                if item.is_correct {
                    entry.1 += 1;
                }
            }
        }
        writer.flush()?;
        info!("saved question insights: {}", insights_path.display());

        let summary_path = out_dir.join("student_insight_summary.csv");
        let mut writer = csv::Writer::from_path(&summary_path)?;
        writer.write_record([
            "student_id",
            "accuracy_percentage",
            "attempt_percentage",
            "strongest_concepts",
            "weakest_concepts",
            "dominant_mistake_pattern",
            "llm_summary",
        ])?;

        for diagnosis in diagnoses {
            let student = diagnosis.student_id.as_str();
            let (total, correct) = stats.get(student).copied().unwrap_or((0, 0));
            let accuracy = if total > 0 {
                correct as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let (paper_total, attempted) = packet_map
                .get(student)
                .map(|m| {
                    let attempted = m.values().filter(|q| q.attempted).count();
                    (m.len(), attempted)
                })
                .unwrap_or((0, 0));
            let attempt_pct = if paper_total > 0 {
                attempted as f64 / paper_total as f64 * 100.0
            } else {
                0.0
            };

            let accuracy = format!("{accuracy:.2}");
            let attempt_pct = format!("{attempt_pct:.2}");
            let strongest = diagnosis.summary.strongest_concepts.join("; ");
            let weakest = diagnosis.summary.weakest_concepts.join("; ");
            writer.write_record([
                student,
                accuracy.as_str(),
                attempt_pct.as_str(),
                strongest.as_str(),
                weakest.as_str(),
                diagnosis.summary.dominant_mistake_pattern.as_str(),
                diagnosis.summary.overall_summary.as_str(),
            ])?;
        }
        writer.flush()?;
        info!("saved student summary: {}", summary_path.display());
        Ok(())
    }
}

#[derive(Deserialize)]
struct AnalysisRow {
    student_id: String,
    question_id: String,
    selected_option: String,
    correct_option: String,
    attempted: String,
    is_correct: String,
    difficulty_tag: String,
    key_concept: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseType;
    use std::path::Path;

    fn test_config(base: &Path) -> Config {
        Config {
            base_dir: base.to_path_buf(),
            target_class: None,
            response_type: ResponseType::Both,
            model_name: "test".into(),
            api_key: Some("test".into()),
        }
    }

    fn seed_phase1(config: &Config, class_id: &str) {
        let dir = config.output_dir(class_id, "phase1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("merged.json"),
            r#"[{"question_number": 1, "question_text": "What is X?",
                 "options": ["(A) 1", "(B) 2"], "question_id": "Q1",
                 "correct_option": "A", "solution_text": "X is 1.",
                 "key_concept": "Algebra"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("student_question_analysis.csv"),
            "student_id,question_id,selected_option,correct_option,attempted,is_correct,difficulty_tag,key_concept\n\
             274600,Q1,A,A,True,True,Unknown,Algebra\n\
             274601,Q1,,A,False,False,Unknown,Algebra\n\
             274601,Q9,B,UNKNOWN,True,False,Unknown,\n",
        )
        .unwrap();
    }

    #[test]
    fn test_packetize_joins_analysis_with_merged() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        seed_phase1(&config, "10FB");

        let client = GeminiClient::new("k".into(), "m".into());
        let runner = Phase2Runner::new(&config, &client);
        let packets = runner.packetize("10FB").unwrap();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].student_id, "274600");
        let q = &packets[0].questions[0];
        assert_eq!(q.question_text, "What is X?");
        assert!(q.attempted);
        assert!(q.is_correct);
        // Q9 has no merged entry and is dropped.
        assert_eq!(packets[1].questions.len(), 1);
        assert!(!packets[1].questions[0].attempted);
    }

    #[test]
    fn test_write_csvs_flattens_diagnoses() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        seed_phase1(&config, "10FB");

        let client = GeminiClient::new("k".into(), "m".into());
        let runner = Phase2Runner::new(&config, &client);
        let packets = runner.packetize("10FB").unwrap();

        let diagnoses = vec![StudentDiagnosis {
            student_id: "274600".into(),
            per_question: vec![QuestionDiagnosis {
                question_id: "Q1".into(),
                is_correct: true,
                mistake_type: "None".into(),
                correctness_reason: "Applied the definition directly.".into(),
                confidence_signal: "High".into(),
            }],
            summary: DiagnosisSummary {
                strongest_concepts: vec!["Algebra".into()],
                weakest_concepts: vec![],
                dominant_mistake_pattern: "None observed".into(),
                overall_summary: "Consistent on direct recall items.".into(),
            },
        }];

        runner.write_csvs("10FB", &diagnoses, &packets).unwrap();

        let out_dir = config.output_dir("10FB", "phase2");
        let insights =
            std::fs::read_to_string(out_dir.join("student_question_insights.csv")).unwrap();
        assert!(insights.contains("274600,Q1,A,A,True,None"));

        let summary =
            std::fs::read_to_string(out_dir.join("student_insight_summary.csv")).unwrap();
        assert!(summary.contains("274600,100.00,100.00,Algebra"));
    }
}
