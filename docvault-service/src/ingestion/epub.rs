//! EPUB text extraction.

use std::io::Cursor;

use tracing::debug;

use super::markup::strip_html_tags;
use super::office::extraction_error;
use crate::error::ProcessingError;

/// Chapter text in spine (reading) order, chapters separated by blank lines.
pub fn extract_epub(data: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = epub::doc::EpubDoc::from_reader(Cursor::new(data.to_vec()))
        .map_err(|e| extraction_error(format!("Failed to open EPUB: {}", e)))?;

    let mut chapters = Vec::new();
    loop {
        if let Some((content, _mime)) = archive.get_current_str() {
            let text = strip_html_tags(&content);
            if !text.is_empty() {
                chapters.push(text);
            }
        }
        if !archive.go_next() {
            break;
        }
    }

    debug!(chapters = chapters.len(), "EPUB extracted");

    Ok(chapters.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_epub() {
        assert!(matches!(
            extract_epub(b"not an epub"),
            Err(ProcessingError::TextExtraction { page: None, .. })
        ));
    }
}
