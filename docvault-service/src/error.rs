use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Version {version_number} not found for document {document_id}")]
    VersionNotFound {
        document_id: String,
        version_number: i64,
    },

    #[error("Document with same content already exists: {existing_id}")]
    DuplicateContent { existing_id: String },

    #[error("Version {version_number} of document {document_id} was taken by a concurrent upload")]
    VersionConflict {
        document_id: String,
        version_number: i64,
    },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Content store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed for {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Invalid storage path: {path}")]
    InvalidPath { path: String },

    #[error(
        "Storage path collision at {path}: existing object is {existing_len} bytes, new object is {new_len} bytes"
    )]
    PathCollision {
        path: String,
        existing_len: u64,
        new_len: u64,
    },

    #[error("Length mismatch writing {path}: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid signature for {path}")]
    InvalidSignature { path: String },

    #[error("Signed URL for {path} has expired")]
    Expired { path: String },
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to extract text{}", page_suffix(.page))]
    TextExtraction {
        /// Set when the failure belongs to a single page
        page: Option<u32>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("OCR failed: {message}")]
    Ocr { message: String },

    #[error("Failed to rasterize page {page}: {message}")]
    Rasterize { page: u32, message: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("IO error")]
    Io(#[source] std::io::Error),

    #[error("Processing cancelled for document {document_id}")]
    Cancelled { document_id: String },

    #[error("Processing timed out after {secs}s")]
    Timeout { secs: u64 },
}

fn page_suffix(page: &Option<u32>) -> String {
    page.map(|page| format!(" from page {}", page))
        .unwrap_or_default()
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. }
            | ServiceError::VersionNotFound { .. }
            | ServiceError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::DuplicateContent { .. } | ServiceError::VersionConflict { .. } => {
                StatusCode::CONFLICT
            }
            ServiceError::InvalidRequest { .. }
            | ServiceError::Storage(StorageError::InvalidPath { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(StorageError::InvalidSignature { .. })
            | ServiceError::Storage(StorageError::Expired { .. }) => StatusCode::FORBIDDEN,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::VersionNotFound { .. } => "version_not_found",
            ServiceError::DuplicateContent { .. } => "duplicate_content",
            ServiceError::VersionConflict { .. } => "version_conflict",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(StorageError::Io { .. }) => "storage_io_error",
            ServiceError::Storage(StorageError::NotFound { .. }) => "object_not_found",
            ServiceError::Storage(StorageError::InvalidPath { .. }) => "invalid_storage_path",
            ServiceError::Storage(StorageError::PathCollision { .. }) => "storage_path_collision",
            ServiceError::Storage(StorageError::LengthMismatch { .. }) => "storage_length_mismatch",
            ServiceError::Storage(StorageError::InvalidSignature { .. }) => "invalid_signature",
            ServiceError::Storage(StorageError::Expired { .. }) => "signature_expired",
            ServiceError::Processing(ProcessingError::TextExtraction { .. }) => {
                "text_extraction_error"
            }
            ServiceError::Processing(ProcessingError::Ocr { .. }) => "ocr_error",
            ServiceError::Processing(ProcessingError::Rasterize { .. }) => "rasterize_error",
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::Processing(ProcessingError::Cancelled { .. }) => "processing_cancelled",
            ServiceError::Processing(ProcessingError::Timeout { .. }) => "processing_timeout",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        if status.is_server_error() {
            tracing::error!(code = %code, error = %format_error_chain_ref(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            details: None,
            retry_after_secs: matches!(self, ServiceError::VersionConflict { .. }).then_some(1),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and every `source()` below it as `outer: inner: root`.
pub fn format_error_chain_ref(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        current = source.source();
    }
    message
}
