//! Format dispatch for text extraction.
//!
//! Extraction never fails outward: errors and empty results are reported
//! through the method label so the pipeline can always carry on.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{epub, markup, office, pdf};
use crate::error::{ProcessingError, format_error_chain_ref};

const OCTET_STREAM: &str = "application/octet-stream";

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Types that normally carry extractable text
const TEXT_BASED_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    DOCX_MIME,
    "application/vnd.ms-excel",
    XLSX_MIME,
    "application/vnd.ms-powerpoint",
    PPTX_MIME,
    "text/plain",
    "text/html",
    "text/xml",
    "application/rtf",
];

/// Result of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    pub text: Option<String>,
    /// Extractor label, `no_text_found`, `error: <cause>` or `unsupported: <mime>`
    pub method: String,
}

impl ExtractionOutcome {
    fn unsupported(mime_type: &str) -> Self {
        Self {
            text: None,
            method: format!("unsupported: {}", mime_type),
        }
    }

    /// Leading label without any cause, for metrics
    pub fn method_kind(&self) -> &str {
        self.method
            .split_once(':')
            .map_or(self.method.as_str(), |(kind, _)| kind)
    }
}

/// Extracts text from raw document bytes
pub trait TextExtractor: Send + Sync {
    /// Blocking; callers run it off the async runtime
    fn extract(&self, data: &[u8], filename: &str, mime_type: &str) -> ExtractionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    PlainText,
    Html,
    Xml,
    Markdown,
    Docx,
    Pptx,
    Xlsx,
    OpenDocument,
    Epub,
    Rtf,
}

impl Format {
    fn from_mime(mime_type: &str) -> Option<Self> {
        let format = match mime_type {
            "application/pdf" => Format::Pdf,
            "text/html" | "application/xhtml+xml" => Format::Html,
            "text/xml" | "application/xml" => Format::Xml,
            "text/markdown" | "text/x-markdown" => Format::Markdown,
            "application/rtf" | "text/rtf" => Format::Rtf,
            DOCX_MIME => Format::Docx,
            PPTX_MIME => Format::Pptx,
            XLSX_MIME => Format::Xlsx,
            "application/vnd.oasis.opendocument.text"
            | "application/vnd.oasis.opendocument.spreadsheet"
            | "application/vnd.oasis.opendocument.presentation" => Format::OpenDocument,
            "application/epub+zip" => Format::Epub,
            other if other.starts_with("text/") => Format::PlainText,
            _ => return None,
        };
        Some(format)
    }

    fn label(self) -> &'static str {
        match self {
            Format::Pdf => "pdf_text_layer",
            Format::PlainText => "plain_text",
            Format::Html => "html",
            Format::Xml => "xml",
            Format::Markdown => "markdown",
            Format::Docx => "docx",
            Format::Pptx => "pptx",
            Format::Xlsx => "xlsx",
            Format::OpenDocument => "opendocument",
            Format::Epub => "epub",
            Format::Rtf => "rtf",
        }
    }

    fn extract(self, data: &[u8]) -> Result<String, ProcessingError> {
        match self {
            Format::Pdf => pdf::extract_text_layer(data),
            Format::PlainText => Ok(String::from_utf8_lossy(data).into_owned()),
            Format::Html => Ok(markup::strip_html_tags(&String::from_utf8_lossy(data))),
            Format::Xml => markup::extract_xml_text(&String::from_utf8_lossy(data)),
            Format::Markdown => markup::extract_markdown_text(&String::from_utf8_lossy(data)),
            Format::Docx => office::extract_docx(data),
            Format::Pptx => office::extract_pptx(data),
            Format::Xlsx => office::extract_xlsx(data),
            Format::OpenDocument => office::extract_opendocument(data),
            Format::Epub => epub::extract_epub(data),
            Format::Rtf => Ok(markup::extract_rtf_text(&String::from_utf8_lossy(data))),
        }
    }
}

/// Dispatches on MIME type to the built-in format extractors
#[derive(Debug, Default)]
pub struct FormatExtractor;

impl TextExtractor for FormatExtractor {
    fn extract(&self, data: &[u8], filename: &str, mime_type: &str) -> ExtractionOutcome {
        let mime_type = resolve_mime_type(Some(mime_type), filename);
        info!(filename = %filename, mime_type = %mime_type, size = data.len(), "Extracting text");

        let Some(format) = Format::from_mime(&mime_type) else {
            debug!(mime_type = %mime_type, "No extractor for type");
            return record(ExtractionOutcome::unsupported(&mime_type), &mime_type);
        };

        let outcome = match format.extract(data) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    warn!(filename = %filename, method = format.label(), "No text extracted");
                    ExtractionOutcome {
                        text: None,
                        method: "no_text_found".to_string(),
                    }
                } else {
                    info!(
                        filename = %filename,
                        method = format.label(),
                        chars = text.chars().count(),
                        "Extracted text"
                    );
                    ExtractionOutcome {
                        text: Some(text.to_string()),
                        method: format.label().to_string(),
                    }
                }
            }
            Err(e) => {
                let cause = format_error_chain_ref(&e);
                warn!(filename = %filename, method = format.label(), error = %cause, "Text extraction failed");
                ExtractionOutcome {
                    text: None,
                    method: format!("error: {}", cause),
                }
            }
        };

        record(outcome, &mime_type)
    }
}

fn record(outcome: ExtractionOutcome, mime_type: &str) -> ExtractionOutcome {
    metrics::counter!(
        "docvault_extractions_total",
        "method_kind" => outcome.method_kind().to_string(),
        "text_based" => is_text_based(mime_type).to_string()
    )
    .increment(1);
    outcome
}

/// Whether the type normally carries extractable text. A hint for logs and
/// metrics only; dispatch does not depend on it.
pub fn is_text_based(mime_type: &str) -> bool {
    TEXT_BASED_TYPES.contains(&mime_type)
}

/// Canonical lowercase MIME essence (parameters dropped). Missing or generic
/// types are guessed from the filename extension.
pub fn resolve_mime_type(declared: Option<&str>, filename: &str) -> String {
    let declared = declared
        .and_then(|m| m.parse::<mime::Mime>().ok())
        .map(|m| m.essence_str().to_ascii_lowercase());

    match declared {
        Some(m) if m != OCTET_STREAM => m,
        _ => mime_guess::from_path(filename)
            .first()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}
