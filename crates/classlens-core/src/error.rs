//! Error types for the assessment pipeline.
//!
//! Every failure inside a class's processing is one of these variants so the
//! orchestrator can log it with context and move on to the next class.

use thiserror::Error;

/// Error types that can occur while normalizing and enriching exam data.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required input document or workbook is absent.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// A header/column pattern was not found in an expected sheet layout.
    #[error("structural parse error: {0}")]
    StructuralParse(String),

    /// No answer-key resolution rule was satisfied.
    #[error("answer key resolution failed: {0}")]
    AgreementResolution(String),

    /// Post-merge matrix validation failed.
    #[error("matrix invariant violation: {0}")]
    MatrixInvariant(String),

    /// A downstream artifact does not match its expected schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The spreadsheet reader rejected a workbook.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    /// The LLM completion service failed or returned unusable output.
    #[error("llm error: {0}")]
    Llm(String),

    /// PDF text extraction failed.
    #[error("pdf error: {0}")]
    Pdf(String),

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;
