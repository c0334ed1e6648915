use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Text does not fit on a single page ({lines} lines)")]
    Overflow { lines: usize },
    #[error("Failed to encode document: {0}")]
    Encode(String),
}

/// Turns the corrected invoice text into a downloadable document.
pub trait ExportRenderer: Send + Sync {
    fn render(&self, source_text: &str) -> Result<Vec<u8>, RenderError>;

    /// Suggested file name for the produced document.
    fn file_name(&self) -> &str {
        "facture.pdf"
    }
}
