//! classlens-core - academic assessment pipeline
//!
//! Normalizes heterogeneous exam response sheets into a canonical
//! student-by-question matrix with a resolved answer key (Phase 0), then
//! enriches it: question/solution extraction from PDFs (Phase 1),
//! per-student diagnosis (Phase 2), and class-level insight synthesis
//! (Phase 3).
//!
//! Phase 0 is fully offline and deterministic; the later phases call an
//! LLM completion service. Every phase operates per class and reports
//! per-class failures without aborting siblings.

pub mod answer_key;
pub mod config;
pub mod error;
pub mod llm;
pub mod matrix;
pub mod pdf;
pub mod phase0;
pub mod phase1;
pub mod phase2;
pub mod phase3;
pub mod prompts;
pub mod sheet;
pub mod transform;

pub use answer_key::{AnswerKey, AnswerKeyManager, AnswerKeyRecord, KeySource};
pub use config::{Config, ResponseType};
pub use error::{PipelineError, Result};
pub use llm::GeminiClient;
pub use matrix::ResponseMatrix;
pub use phase0::{ClassOutcome, Phase0Runner, RunReport};
pub use phase1::Phase1Runner;
pub use phase2::Phase2Runner;
pub use phase3::Phase3Runner;
pub use sheet::SheetExtractor;
pub use transform::{OfflineTransformer, OnlineTransformer, ResponseTransformer};
