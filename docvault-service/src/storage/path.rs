//! Object path scheme: `documents/{year}/{month}/{document_id}/v{n}{ext}`.
//!
//! Objects are grouped by upload month and colocated per document, so a time
//! range or a single document can be listed without a secondary index.

use chrono::{DateTime, Datelike, Utc};

use crate::error::StorageError;

const ROOT: &str = "documents";
const MAX_EXTENSION_LEN: usize = 16;

/// Build the object path for one version of a document
pub fn storage_path(
    document_id: &str,
    version_number: i64,
    uploaded_at: DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "{ROOT}/{}/{:02}/{}/v{}{}",
        uploaded_at.year(),
        uploaded_at.month(),
        document_id,
        version_number,
        file_extension(filename)
    )
}

/// Lowercased extension including the dot, or empty. Extensions with anything
/// but ASCII letters and digits are dropped so paths stay URL-safe.
pub fn file_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Reject anything that could escape the store root
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidPath {
        path: path.to_string(),
    };

    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }

    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_storage_path_format() {
        let uploaded = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(
            storage_path("D", 1, uploaded, "report.pdf"),
            "documents/2024/03/D/v1.pdf"
        );
        assert_eq!(
            storage_path("D", 12, uploaded, "Scan.JPEG"),
            "documents/2024/03/D/v12.jpeg"
        );
    }

    #[test]
    fn test_storage_path_without_extension() {
        let uploaded = Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(
            storage_path("abc", 2, uploaded, "README"),
            "documents/2023/11/abc/v2"
        );
    }

    #[test]
    fn test_file_extension_rejects_odd_characters() {
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension("weird.p df"), "");
        assert_eq!(file_extension(".hidden"), "");
        assert_eq!(file_extension("x.docx"), ".docx");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("documents/2024/03/D/v1.pdf").is_ok());
        assert!(validate_path("../etc/passwd").is_err());
        assert!(validate_path("/abs/path").is_err());
        assert!(validate_path("documents//v1").is_err());
        assert!(validate_path("documents\\v1").is_err());
        assert!(validate_path("").is_err());
    }
}
