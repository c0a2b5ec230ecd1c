use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Source of raw paper text. Implementations may wrap PDF parsers or OCR.
pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;

    /// Full text with one newline after every page.
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let pages = self.extract_pages(path)?;
        let mut text = String::new();
        for page in pages {
            text.push_str(&page.text);
            text.push('\n');
        }

        if text.trim().is_empty() {
            return Err(IngestError::EmptyText(path.display().to_string()));
        }
        Ok(text)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }
}
