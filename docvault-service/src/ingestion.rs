//! Content ingestion: hashing, format-aware text extraction, and the OCR
//! fallback with its routing decision.

pub mod epub;
pub mod extract;
pub mod hash;
pub mod markup;
pub mod ocr;
pub mod office;
pub mod pdf;
pub mod routing;

pub use extract::{ExtractionOutcome, FormatExtractor, TextExtractor, is_text_based, resolve_mime_type};
pub use hash::{ContentFingerprint, compute_content_hash, hash_stream};
pub use ocr::{OcrEngine, OcrStage, PageRasterizer, TesseractCli};
pub use pdf::PdfiumRasterizer;
pub use routing::needs_ocr;
