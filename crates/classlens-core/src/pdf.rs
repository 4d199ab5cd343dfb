//! Page-wise PDF text extraction.

use crate::error::{PipelineError, Result};
use std::path::Path;
use tracing::debug;

/// Extract text per page, returning `(page_number, text)` pairs with pages
/// numbered from 1.
///
/// Extraction runs under `catch_unwind` because the parser can panic on
/// malformed documents; a panic is reported as a normal error.
pub fn load_pdf_pages(path: &Path) -> Result<Vec<(usize, String)>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(format!(
            "PDF not found: {}",
            path.display()
        )));
    }

    let path_clone = path.to_path_buf();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_by_pages(&path_clone)
    }));

    match result {
        Ok(Ok(pages)) => {
            debug!("extracted {} pages from {}", pages.len(), path.display());
            Ok(pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| (i + 1, text))
                .collect())
        }
        Ok(Err(e)) => Err(PipelineError::Pdf(format!(
            "failed to extract text from {}: {e}",
            path.display()
        ))),
        Err(_) => Err(PipelineError::Pdf(format!(
            "text extraction panicked on malformed PDF: {}",
            path.display()
        ))),
    }
}
