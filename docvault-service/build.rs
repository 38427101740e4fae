fn main() {
    // Nothing is linked at build time. PDFium is bound at runtime from:
    // 1. Current directory
    // 2. vendor/pdfium/lib/
    // 3. System library paths
    // Tesseract is invoked as an external executable (`ocr.tesseract_cmd`).
    println!("cargo:rerun-if-changed=build.rs");
}
