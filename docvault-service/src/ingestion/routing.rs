//! Decides whether a document goes through OCR after text extraction.

/// Images always need OCR. PDFs need it when their text layer is missing or
/// shorter than `min_text_length` characters once trimmed (likely a scan).
/// Nothing else is sent to OCR.
pub fn needs_ocr(mime_type: &str, extracted_text: Option<&str>, min_text_length: usize) -> bool {
    if mime_type.starts_with("image/") {
        return true;
    }

    if mime_type == "application/pdf" {
        return match extracted_text {
            None => true,
            Some(text) => text.trim().chars().count() < min_text_length,
        };
    }

    false
}
