//! Pipeline configuration.
//!
//! The configuration is an explicit value threaded through every phase call.
//! Nothing in the pipeline mutates shared settings while classes iterate.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// Which response transformer(s) Phase 0 runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Online,
    Offline,
    Both,
}

impl ResponseType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(ResponseType::Online),
            "OFFLINE" => Ok(ResponseType::Offline),
            "BOTH" => Ok(ResponseType::Both),
            other => Err(PipelineError::SchemaMismatch(format!(
                "invalid RESPONSE_TYPE '{other}', expected ONLINE, OFFLINE or BOTH"
            ))),
        }
    }

    pub fn includes_online(self) -> bool {
        matches!(self, ResponseType::Online | ResponseType::Both)
    }

    pub fn includes_offline(self) -> bool {
        matches!(self, ResponseType::Offline | ResponseType::Both)
    }
}

impl Default for ResponseType {
    fn default() -> Self {
        ResponseType::Both
    }
}

/// Directory layout and run options for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory holding all pipeline areas.
    pub base_dir: PathBuf,
    /// Process only this class instead of auto-discovering all.
    pub target_class: Option<String>,
    /// Which transformer(s) run in Phase 0.
    pub response_type: ResponseType,
    /// LLM model name for the enrichment phases.
    pub model_name: String,
    /// API key for the LLM completion service, if configured.
    pub api_key: Option<String>,
}

impl Config {
    /// Build a configuration from a base directory plus environment overrides
    /// (`TARGET_CLASS`, `RESPONSE_TYPE`, `GEMINI_API_KEY`, `MODEL_NAME`).
    pub fn from_env(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let target_class = std::env::var("TARGET_CLASS")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "None");
        let response_type = match std::env::var("RESPONSE_TYPE") {
            Ok(s) => ResponseType::parse(&s)?,
            Err(_) => ResponseType::default(),
        };
        let model_name = std::env::var("MODEL_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "gemini-3.0-flash".to_string());
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            base_dir: base_dir.into(),
            target_class,
            response_type,
            model_name,
            api_key,
        })
    }

    /// Raw client uploads: shared response workbooks and per-class PDFs.
    pub fn client_uploads_dir(&self) -> PathBuf {
        self.base_dir.join("client_uploads")
    }

    /// Shared multi-sheet workbook of online exam exports.
    pub fn online_shared_file(&self) -> PathBuf {
        self.client_uploads_dir()
            .join("responses")
            .join("Response_Online.xlsx")
    }

    /// Shared multi-sheet workbook of offline OMR-style sheets.
    pub fn offline_shared_file(&self) -> PathBuf {
        self.client_uploads_dir()
            .join("responses")
            .join("Response_Offline.xlsx")
    }

    /// Normalized Phase 0 output area for one class.
    pub fn normalized_dir(&self, class_id: &str) -> PathBuf {
        self.base_dir
            .join("normalized_inputs")
            .join(class_folder(class_id))
    }

    /// Phase 1 input area for one class (published Phase 0 artifacts).
    pub fn input_dir(&self, class_id: &str) -> PathBuf {
        self.base_dir.join("input").join(class_folder(class_id))
    }

    /// Raw uploads folder for one class.
    pub fn class_uploads_dir(&self, class_id: &str) -> PathBuf {
        self.client_uploads_dir().join(class_folder(class_id))
    }

    /// Per-class output area for a downstream phase, e.g. "phase1".
    pub fn output_dir(&self, class_id: &str, phase: &str) -> PathBuf {
        self.base_dir
            .join("output")
            .join(class_folder(class_id))
            .join(phase)
    }

    /// Root of the output tree (Phase 3 writes its manifest here).
    pub fn output_root(&self) -> PathBuf {
        self.base_dir.join("output")
    }
}

/// Classes are stored under a `class_<name>` folder.
pub fn class_folder(class_id: &str) -> String {
    if class_id.starts_with("class_") {
        class_id.to_string()
    } else {
        format!("class_{class_id}")
    }
}

/// True when a directory entry looks like a raw spreadsheet file.
pub fn is_spreadsheet_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_type_parse() {
        assert_eq!(ResponseType::parse("both").unwrap(), ResponseType::Both);
        assert_eq!(
            ResponseType::parse(" ONLINE ").unwrap(),
            ResponseType::Online
        );
        assert_eq!(
            ResponseType::parse("offline").unwrap(),
            ResponseType::Offline
        );
        assert!(ResponseType::parse("SOMETIMES").is_err());
    }

    #[test]
    fn test_class_folder() {
        assert_eq!(class_folder("10FB"), "class_10FB");
        assert_eq!(class_folder("class_medical"), "class_medical");
    }

    #[test]
    fn test_is_spreadsheet_file() {
        assert!(is_spreadsheet_file(Path::new("a/Response.xlsx")));
        assert!(is_spreadsheet_file(Path::new("legacy.XLS")));
        assert!(!is_spreadsheet_file(Path::new("ResponseSheet.csv")));
        assert!(!is_spreadsheet_file(Path::new("QuestionPaper.pdf")));
    }

    #[test]
    fn test_directory_layout() {
        let config = Config {
            base_dir: PathBuf::from("/data"),
            target_class: None,
            response_type: ResponseType::Both,
            model_name: "m".into(),
            api_key: None,
        };
        assert_eq!(
            config.normalized_dir("10FB"),
            PathBuf::from("/data/normalized_inputs/class_10FB")
        );
        assert_eq!(
            config.input_dir("10FB"),
            PathBuf::from("/data/input/class_10FB")
        );
        assert_eq!(
            config.online_shared_file(),
            PathBuf::from("/data/client_uploads/responses/Response_Online.xlsx")
        );
    }
}
