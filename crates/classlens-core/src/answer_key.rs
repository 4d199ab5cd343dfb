//! Answer key collection and tiered-agreement resolution.
//!
//! Up to three partial keys exist per class (offline sheet, online sheet,
//! previously extracted solution document). Exactly one becomes
//! authoritative through a fixed decision procedure; if no rule fires the
//! class fails rather than guessing.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// Mapping from question id to correct option letter.
pub type AnswerKey = BTreeMap<u32, String>;

/// Agreement ratio two sources must reach over their shared question ids.
pub const AGREEMENT_THRESHOLD: f64 = 0.95;

/// Provenance of the authoritative key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Offline,
    Online,
    Solution,
}

impl KeySource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeySource::Offline => "OFFLINE",
            KeySource::Online => "ONLINE",
            KeySource::Solution => "SOLUTION",
        }
    }
}

/// One record of the serialized `answer_key.json` artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerKeyRecord {
    pub question_id: u32,
    pub correct_option: String,
}

/// Collects per-source keys and resolves one authoritative key.
#[derive(Debug, Default)]
pub struct AnswerKeyManager {
    offline_key: AnswerKey,
    online_key: AnswerKey,
    solution_key: AnswerKey,
    authoritative_key: AnswerKey,
    source_used: Option<KeySource>,
}

impl AnswerKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_offline_key(&mut self, key: AnswerKey) {
        self.offline_key = key;
    }

    pub fn load_online_key(&mut self, key: AnswerKey) {
        self.online_key = key;
    }

    /// Load the solution key from a prior phase's `solution.json`. Absent or
    /// unparsable files are skipped silently (logged, not fatal): the
    /// solution source is optional.
    pub fn load_solution_key(&mut self, path: &Path) {
        if !path.exists() {
            warn!("solution file not found: {}; skipping", path.display());
            return;
        }
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("could not read solution file {}: {e}", path.display());
                return;
            }
        };
        let items: Vec<serde_json::Value> = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                warn!("could not parse solution file {}: {e}", path.display());
                return;
            }
        };
        for item in items {
            let Some(opt) = item.get("correct_option").and_then(|v| v.as_str()) else {
                continue;
            };
            // question_id appears as 1 or "Q1" depending on the producer.
            let q = match item.get("question_id") {
                Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as u32),
                Some(serde_json::Value::String(s)) => {
                    let s = s.trim().to_ascii_uppercase();
                    s.strip_prefix('Q').unwrap_or(&s).parse::<u32>().ok()
                }
                _ => None,
            };
            if let Some(q) = q {
                self.solution_key
                    .insert(q, opt.trim().to_ascii_uppercase());
            }
        }
    }

    pub fn authoritative_key(&self) -> &AnswerKey {
        &self.authoritative_key
    }

    pub fn source_used(&self) -> Option<KeySource> {
        self.source_used
    }

    /// Apply the authority decision rules, strictly in order; the first
    /// matching rule wins.
    pub fn resolve(&mut self) -> Result<&AnswerKey> {
        if self.offline_key.is_empty()
            && self.online_key.is_empty()
            && self.solution_key.is_empty()
        {
            return Err(PipelineError::AgreementResolution(
                "no answer keys extracted from any source".to_string(),
            ));
        }

        // Rule 1: single-source shortcut among the two sheet sources.
        if !self.offline_key.is_empty() && self.online_key.is_empty() {
            info!("only offline key found; using as authoritative");
            self.authoritative_key = self.offline_key.clone();
            self.source_used = Some(KeySource::Offline);
            return Ok(&self.authoritative_key);
        }
        if !self.online_key.is_empty() && self.offline_key.is_empty() {
            info!("only online key found; using as authoritative");
            self.authoritative_key = self.online_key.clone();
            self.source_used = Some(KeySource::Online);
            return Ok(&self.authoritative_key);
        }

        // Rule 2: offline vs online agreement; offline wins the tie.
        if !self.offline_key.is_empty() && !self.online_key.is_empty() {
            if let Some(accuracy) = agreement(&self.offline_key, &self.online_key) {
                info!("offline vs online agreement: {:.2}%", accuracy * 100.0);
                if accuracy >= AGREEMENT_THRESHOLD {
                    self.authoritative_key = self.offline_key.clone();
                    self.source_used = Some(KeySource::Offline);
                    return Ok(&self.authoritative_key);
                }
                warn!("offline vs online disagreement above 5%; checking next rule");
            }
        }

        // Rule 3: online vs solution agreement.
        if !self.online_key.is_empty() && !self.solution_key.is_empty() {
            if let Some(accuracy) = agreement(&self.online_key, &self.solution_key) {
                info!("online vs solution agreement: {:.2}%", accuracy * 100.0);
                if accuracy >= AGREEMENT_THRESHOLD {
                    self.authoritative_key = self.online_key.clone();
                    self.source_used = Some(KeySource::Online);
                    return Ok(&self.authoritative_key);
                }
            }
        }

        // Rule 4: solution fallback.
        if !self.solution_key.is_empty() {
            info!("falling back to solution key");
            self.authoritative_key = self.solution_key.clone();
            self.source_used = Some(KeySource::Solution);
            return Ok(&self.authoritative_key);
        }

        // Rule 5: fail loudly; the pipeline must not guess.
        Err(PipelineError::AgreementResolution(format!(
            "no authoritative source satisfied the {:.0}% agreement rule",
            AGREEMENT_THRESHOLD * 100.0
        )))
    }

    /// Serialize the authoritative key as a sorted array of
    /// `{question_id, correct_option}` records.
    pub fn save_key_json(&self, path: &Path) -> Result<()> {
        let records: Vec<AnswerKeyRecord> = self
            .authoritative_key
            .iter()
            .map(|(&q, opt)| AnswerKeyRecord {
                question_id: q,
                correct_option: opt.clone(),
            })
            .collect();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &records)?;
        info!("answer key json saved to {}", path.display());
        Ok(())
    }

    /// Emit the per-question audit report comparing all sources against the
    /// resolved key.
    pub fn generate_report(&self, path: &Path) -> Result<()> {
        let all_ids: BTreeSet<u32> = self
            .offline_key
            .keys()
            .chain(self.online_key.keys())
            .chain(self.solution_key.keys())
            .copied()
            .collect();

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "question_id",
            "offline_key",
            "online_key",
            "solution_key",
            "final_key",
            "match",
        ])?;
        for q in all_ids {
            let final_val = self.authoritative_key.get(&q);
            let solution_val = self.solution_key.get(&q);
            let matched = match solution_val {
                Some(sol) => {
                    if final_val == Some(sol) {
                        "True"
                    } else {
                        "False"
                    }
                }
                None => "N/A",
            };
            writer.write_record([
                q.to_string().as_str(),
                self.offline_key.get(&q).map(String::as_str).unwrap_or(""),
                self.online_key.get(&q).map(String::as_str).unwrap_or(""),
                solution_val.map(String::as_str).unwrap_or(""),
                final_val.map(String::as_str).unwrap_or(""),
                matched,
            ])?;
        }
        writer.flush()?;
        info!("audit report saved to {}", path.display());
        Ok(())
    }
}

/// Agreement ratio over the intersection of question ids where both sources
/// have a value. `None` when the intersection is empty (the rule using it
/// then does not fire).
fn agreement(a: &AnswerKey, b: &AnswerKey) -> Option<f64> {
    let mut matches = 0usize;
    let mut common = 0usize;
    for (q, va) in a {
        if let Some(vb) = b.get(q) {
            common += 1;
            if va == vb {
                matches += 1;
            }
        }
    }
    if common == 0 {
        None
    } else {
        Some(matches as f64 / common as f64)
    }
}
