//! OCR fallback: rasterize pages and recognize text.
//!
//! Everything here is blocking and is driven from `spawn_blocking` by the
//! pipeline. Failures degrade to less text, never to an error. Work stops
//! between pages, and a running `tesseract` child is killed, once the run's
//! cancellation token fires.

use std::io::Cursor;
use std::ops::ControlFlow;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::error::{ProcessingError, format_error_chain_ref};

/// How often a running recognizer is checked for exit or cancellation
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Text recognition over a single PNG image
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        png: &[u8],
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProcessingError>;
}

/// Renders the pages of a paginated document to PNG
pub trait PageRasterizer: Send + Sync {
    /// Open the document once and hand each page to `on_page` in order, with
    /// its PNG or the error for that page alone. Stops when `on_page` breaks.
    /// Fails only when the document cannot be opened; returns the page count.
    fn render_pages(
        &self,
        data: &[u8],
        width: u32,
        on_page: &mut dyn FnMut(usize, Result<Vec<u8>, ProcessingError>) -> ControlFlow<()>,
    ) -> Result<usize, ProcessingError>;
}

/// Runs the `tesseract` executable in a private temp directory.
///
/// Output goes to files rather than pipes so the child can be polled and
/// killed without risking a full pipe buffer.
pub struct TesseractCli {
    command: String,
}

impl TesseractCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the configured executable can be started at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(
        &self,
        png: &[u8],
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProcessingError> {
        let workdir = tempfile::Builder::new()
            .prefix("docvault-ocr-")
            .tempdir()
            .map_err(ProcessingError::Io)?;
        let input = workdir.path().join("page.png");
        let output_base = workdir.path().join("out");
        let stderr_path = workdir.path().join("stderr.log");

        std::fs::write(&input, png).map_err(ProcessingError::Io)?;
        let stderr = std::fs::File::create(&stderr_path).map_err(ProcessingError::Io)?;

        let mut child = Command::new(&self.command)
            .arg(&input)
            .arg(&output_base)
            .arg("-l")
            .arg(language)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| ProcessingError::Ocr {
                message: format!("Failed to run {}: {}", self.command, e),
            })?;

        let status = loop {
            if let Some(status) = child.try_wait().map_err(ProcessingError::Io)? {
                break status;
            }
            if cancel.is_cancelled() {
                // kill fails only if the child already exited; wait reaps it either way
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessingError::Ocr {
                    message: format!("{} killed: run cancelled", self.command),
                });
            }
            std::thread::sleep(CHILD_POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(ProcessingError::Ocr {
                message: format!("{} exited with {}: {}", self.command, status, stderr.trim()),
            });
        }

        std::fs::read_to_string(output_base.with_extension("txt")).map_err(ProcessingError::Io)
    }
}

/// OCR fallback stage
pub struct OcrStage {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl OcrStage {
    pub fn new(engine: Arc<dyn OcrEngine>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { engine, rasterizer }
    }

    /// Recognize text in an image or a PDF. `None` means nothing was found
    /// or the run was cancelled.
    pub fn extract(
        &self,
        data: &[u8],
        mime_type: &str,
        config: &OcrConfig,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if mime_type.starts_with("image/") {
            self.extract_image(data, &config.language, cancel)
        } else if mime_type == "application/pdf" {
            self.extract_pages(data, config, cancel)
        } else {
            warn!(mime_type = %mime_type, "OCR requested for a type it cannot handle");
            None
        }
    }

    fn extract_image(
        &self,
        data: &[u8],
        language: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let png = match normalize_to_png(data) {
            Ok(png) => png,
            Err(e) => {
                warn!(error = %e, "Failed to decode image for OCR");
                return None;
            }
        };

        match self.engine.recognize(&png, language, cancel) {
            Ok(text) => non_empty(&text),
            Err(e) => {
                warn!(error = %format_error_chain_ref(&e), "OCR failed on image");
                None
            }
        }
    }

    fn extract_pages(
        &self,
        data: &[u8],
        config: &OcrConfig,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let mut pages = Vec::new();
        let mut on_page = |index: usize, png: Result<Vec<u8>, ProcessingError>| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }

            let page_num = index + 1;
            let recognized =
                png.and_then(|png| self.engine.recognize(&png, &config.language, cancel));

            match recognized {
                Ok(text) => {
                    if let Some(text) = non_empty(&text) {
                        pages.push(text);
                    } else {
                        debug!(page = page_num, "OCR found no text on page");
                    }
                }
                Err(_) if cancel.is_cancelled() => return ControlFlow::Break(()),
                Err(e) => {
                    metrics::counter!("docvault_ocr_pages_failed_total").increment(1);
                    warn!(
                        page = page_num,
                        error = %format_error_chain_ref(&e),
                        "OCR failed for page, continuing"
                    );
                }
            }
            ControlFlow::Continue(())
        };

        match self
            .rasterizer
            .render_pages(data, config.render_width, &mut on_page)
        {
            Ok(page_count) => info!(pages = page_count, "OCR pass over document pages finished"),
            Err(e) => {
                warn!(error = %format_error_chain_ref(&e), "Failed to open document for OCR");
                return None;
            }
        }

        if cancel.is_cancelled() {
            info!("OCR stopped: run cancelled");
            return None;
        }

        if pages.is_empty() {
            None
        } else {
            Some(pages.join("\n\n"))
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Decode any supported image format and re-encode it as PNG
fn normalize_to_png(data: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)?;
    Ok(png.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Returns a fixed text per page marker byte, failing for selected markers
    pub(crate) struct FakeEngine {
        pub texts: HashMap<u8, String>,
        pub fail_on: Vec<u8>,
        pub calls: Mutex<Vec<u8>>,
    }

    impl FakeEngine {
        pub(crate) fn new(texts: &[(u8, &str)]) -> Self {
            Self {
                texts: texts.iter().map(|(k, v)| (*k, v.to_string())).collect(),
                fail_on: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl OcrEngine for FakeEngine {
        fn recognize(
            &self,
            png: &[u8],
            _language: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, ProcessingError> {
            // Pages rendered by FakeRasterizer are a single marker byte; real
            // images are keyed by 0
            let marker = if png.len() == 1 { png[0] } else { 0 };
            self.calls.lock().unwrap().push(marker);
            if self.fail_on.contains(&marker) {
                return Err(ProcessingError::Ocr {
                    message: format!("engine crashed on {}", marker),
                });
            }
            Ok(self.texts.get(&marker).cloned().unwrap_or_default())
        }
    }

    /// Renders page `i` as the single byte `i + 1`
    pub(crate) struct FakeRasterizer {
        pub pages: usize,
        pub fail_render: Vec<usize>,
        pub opened: Mutex<usize>,
    }

    impl FakeRasterizer {
        pub(crate) fn new(pages: usize) -> Self {
            Self {
                pages,
                fail_render: Vec::new(),
                opened: Mutex::new(0),
            }
        }
    }

    impl PageRasterizer for FakeRasterizer {
        fn render_pages(
            &self,
            data: &[u8],
            _width: u32,
            on_page: &mut dyn FnMut(usize, Result<Vec<u8>, ProcessingError>) -> ControlFlow<()>,
        ) -> Result<usize, ProcessingError> {
            if !data.starts_with(b"%PDF") {
                return Err(ProcessingError::Ocr {
                    message: "not a PDF".to_string(),
                });
            }
            *self.opened.lock().unwrap() += 1;

            for index in 0..self.pages {
                let rendered = if self.fail_render.contains(&index) {
                    Err(ProcessingError::Rasterize {
                        page: index as u32 + 1,
                        message: "render failed".to_string(),
                    })
                } else {
                    Ok(vec![index as u8 + 1])
                };
                if on_page(index, rendered).is_break() {
                    break;
                }
            }
            Ok(self.pages)
        }
    }

    fn stage(engine: FakeEngine, rasterizer: FakeRasterizer) -> OcrStage {
        OcrStage::new(Arc::new(engine), Arc::new(rasterizer))
    }

    fn extract(stage: &OcrStage, data: &[u8], mime_type: &str) -> Option<String> {
        stage.extract(data, mime_type, &OcrConfig::default(), &CancellationToken::new())
    }

    pub(crate) fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::new(4, 4);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_failed_page_is_skipped_and_order_kept() {
        let mut engine = FakeEngine::new(&[(1, "page one"), (2, "page two"), (3, "page three")]);
        engine.fail_on = vec![2];
        let rasterizer = Arc::new(FakeRasterizer::new(3));
        let stage = OcrStage::new(Arc::new(engine), rasterizer.clone());

        let text = extract(&stage, b"%PDF-1.7", "application/pdf");
        assert_eq!(text.as_deref(), Some("page one\n\npage three"));
        // All pages came from a single opened document
        assert_eq!(*rasterizer.opened.lock().unwrap(), 1);
    }

    #[test]
    fn test_render_failure_is_skipped() {
        let engine = FakeEngine::new(&[(1, "one"), (2, "two"), (3, "three")]);
        let mut rasterizer = FakeRasterizer::new(3);
        rasterizer.fail_render = vec![0];
        let stage = stage(engine, rasterizer);

        let text = extract(&stage, b"%PDF-1.7", "application/pdf");
        assert_eq!(text.as_deref(), Some("two\n\nthree"));
    }

    #[test]
    fn test_no_text_on_any_page_is_none() {
        let engine = FakeEngine::new(&[(1, "   "), (2, "\n")]);
        let stage = stage(engine, FakeRasterizer::new(2));

        assert!(extract(&stage, b"%PDF-1.7", "application/pdf").is_none());
    }

    #[test]
    fn test_unopenable_document_is_none() {
        let stage = stage(FakeEngine::new(&[]), FakeRasterizer::new(2));
        assert!(extract(&stage, b"garbage", "application/pdf").is_none());
    }

    #[test]
    fn test_cancelled_run_recognizes_nothing() {
        let engine = Arc::new(FakeEngine::new(&[(1, "one"), (2, "two")]));
        let stage = OcrStage::new(engine.clone(), Arc::new(FakeRasterizer::new(2)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let text = stage.extract(b"%PDF-1.7", "application/pdf", &OcrConfig::default(), &cancel);
        assert!(text.is_none());
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_image_is_recognized_once() {
        let engine = Arc::new(FakeEngine::new(&[(0, " Scanned receipt ")]));
        let stage = OcrStage::new(engine.clone(), Arc::new(FakeRasterizer::new(0)));

        let text = extract(&stage, &tiny_png(), "image/png");
        assert_eq!(text.as_deref(), Some("Scanned receipt"));
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_undecodable_image_is_none() {
        let stage = stage(FakeEngine::new(&[(0, "never")]), FakeRasterizer::new(0));
        assert!(extract(&stage, b"not an image", "image/jpeg").is_none());
    }

    #[test]
    fn test_other_types_are_none() {
        let stage = stage(FakeEngine::new(&[(0, "never")]), FakeRasterizer::new(1));
        assert!(extract(&stage, b"hello", "text/plain").is_none());
    }

    // `sh` runs the "image" as a script with the output base as $1, which
    // stands in for a recognizer writing `$1.txt`
    #[cfg(unix)]
    #[test]
    fn test_cli_reads_recognizer_output_file() {
        let cli = TesseractCli::new("sh");
        let text = cli
            .recognize(
                b"printf 'recognized words' > \"$1.txt\"",
                "eng",
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(text, "recognized words");
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_reports_failed_exit() {
        let cli = TesseractCli::new("sh");
        let err = cli
            .recognize(b"echo 'bad language' >&2; exit 3", "xx", &CancellationToken::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad language"), "{}", message);
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_child_is_killed_on_cancel() {
        let cli = TesseractCli::new("sh");
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let err = cli.recognize(b"sleep 30", "eng", &cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("cancelled"), "{}", err);
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        assert!(!TesseractCli::new("/nonexistent/docvault-tesseract").is_available());
    }
}
