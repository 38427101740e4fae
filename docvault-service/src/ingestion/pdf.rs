//! PDF text layer extraction and page rasterization via pdfium.

use std::io::Cursor;
use std::ops::ControlFlow;

use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::ocr::PageRasterizer;
use crate::error::ProcessingError;

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    // Try local paths first, then system
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::TextExtraction {
            page: None,
            source: Box::new(std::io::Error::other(format!(
                "Failed to load PDFium library: {:?}",
                e
            ))),
        })?;

    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    data: &'a [u8],
) -> Result<PdfDocument<'a>, ProcessingError> {
    pdfium
        .load_pdf_from_byte_slice(data, None)
        .map_err(|e| ProcessingError::TextExtraction {
            page: None,
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to load PDF: {:?}", e),
            )),
        })
}

/// Text layer of every page, non-empty pages joined with a blank line.
///
/// A page whose text object cannot be read is skipped; scanned pages simply
/// contribute nothing and are left to OCR.
pub fn extract_text_layer(data: &[u8]) -> Result<String, ProcessingError> {
    let pdfium = create_pdfium()?;
    let document = load_document(&pdfium, data)?;

    let mut pages = Vec::new();
    for (page_index, page) in document.pages().iter().enumerate() {
        let page_num = page_index + 1;
        match page.text() {
            Ok(text) => {
                let page_text = text.all().trim().to_string();
                if !page_text.is_empty() {
                    pages.push(page_text);
                }
            }
            Err(e) => {
                warn!(page = page_num, error = ?e, "Failed to get text object for page");
            }
        }
    }

    debug!(
        pages = document.pages().len(),
        pages_with_text = pages.len(),
        "PDF text layer extracted"
    );

    Ok(pages.join("\n\n"))
}

/// Renders PDF pages to PNG with pdfium
pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn render_pages(
        &self,
        data: &[u8],
        width: u32,
        on_page: &mut dyn FnMut(usize, Result<Vec<u8>, ProcessingError>) -> ControlFlow<()>,
    ) -> Result<usize, ProcessingError> {
        let target_width = i32::try_from(width).map_err(|_| ProcessingError::Ocr {
            message: format!("Render width {} is out of range", width),
        })?;

        // One bind and one parse for the whole document
        let pdfium = create_pdfium()?;
        let document = load_document(&pdfium, data)?;
        let config = PdfRenderConfig::new().set_target_width(target_width);

        let pages = document.pages();
        let page_count = pages.len() as usize;
        for (index, page) in pages.iter().enumerate() {
            let rendered = render_png(&page, &config).map_err(|message| ProcessingError::Rasterize {
                page: u32::try_from(index + 1).unwrap_or(u32::MAX),
                message,
            });
            if on_page(index, rendered).is_break() {
                debug!(page = index + 1, "Page rendering stopped early");
                break;
            }
        }

        Ok(page_count)
    }
}

fn render_png(page: &PdfPage<'_>, config: &PdfRenderConfig) -> Result<Vec<u8>, String> {
    let bitmap = page
        .render_with_config(config)
        .map_err(|e| format!("Failed to render page: {}", e))?;

    let mut png = Cursor::new(Vec::new());
    bitmap
        .as_image()
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| format!("Failed to encode PNG: {}", e))?;

    Ok(png.into_inner())
}
