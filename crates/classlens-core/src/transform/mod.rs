//! Response transformers: raw sheet layouts to the canonical matrix.
//!
//! Two concrete strategies exist, selected by configuration: the offline
//! OMR-style grid and the fixed-column online export. Both implement the
//! same capability: `transform(path, class_id)` yielding a response matrix
//! plus whatever partial answer key the layout carries.

mod offline;
mod online;

pub use offline::OfflineTransformer;
pub use online::OnlineTransformer;

use crate::answer_key::AnswerKey;
use crate::error::Result;
use crate::matrix::ResponseMatrix;
use std::path::Path;

/// Common interface over the raw-layout strategies.
pub trait ResponseTransformer {
    /// Read a raw response file (workbook or extracted grid) and return the
    /// student × question matrix plus the extracted partial answer key.
    ///
    /// Fails when the input cannot be parsed, no matching sheet or header
    /// row is found, no question columns are detected, or no student rows
    /// remain after filtering.
    fn transform(&self, path: &Path, class_id: &str) -> Result<(ResponseMatrix, AnswerKey)>;
}

/// Uppercase, whitespace-trimmed view of a raw cell.
pub(crate) fn normalize_token(cell: &str) -> String {
    cell.trim().to_ascii_uppercase()
}

/// Keep only valid option letters; everything else is unattempted.
pub(crate) fn normalize_option(cell: &str) -> Option<String> {
    let token = normalize_token(cell);
    match token.as_str() {
        "A" | "B" | "C" | "D" => Some(token),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_option() {
        assert_eq!(normalize_option(" a "), Some("A".to_string()));
        assert_eq!(normalize_option("D"), Some("D".to_string()));
        assert_eq!(normalize_option("E"), None);
        assert_eq!(normalize_option(""), None);
        assert_eq!(normalize_option("N/A"), None);
    }
}
