//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Processing status for documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Stored and waiting for a worker
    Pending,
    /// A pipeline run is in progress
    Processing,
    /// The last run finished every stage
    Completed,
    /// The last run failed; `processing_error` holds the cause
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => ProcessingStatus::Processing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Pending,
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub file_hash: String,
    /// Object store path of the current version's bytes
    pub storage_path: String,
    pub current_version_id: Option<String>,
    pub owner_id: String,
    pub processing_status: ProcessingStatus,
    pub processing_progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching `Document::from_row`
pub(crate) const DOCUMENT_COLUMNS: &str = "id, title, original_filename, mime_type, file_size, file_hash, \
     storage_path, current_version_id, owner_id, processing_status, processing_progress, \
     processing_stage, processing_error, uploaded_at, updated_at";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let file_size: i64 = row.get(4)?;
        let processing_status_str: String = row.get(9)?;
        let processing_progress: i64 = row.get(10)?;
        let uploaded_at_str: String = row.get(13)?;
        let updated_at_str: String = row.get(14)?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            original_filename: row.get(2)?,
            mime_type: row.get(3)?,
            file_size: file_size as u64,
            file_hash: row.get(5)?,
            storage_path: row.get(6)?,
            current_version_id: row.get(7)?,
            owner_id: row.get(8)?,
            processing_status: ProcessingStatus::from_str(&processing_status_str),
            processing_progress: processing_progress.clamp(0, 100) as u8,
            processing_stage: row.get(11)?,
            processing_error: row.get(12)?,
            uploaded_at: parse_timestamp(&uploaded_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// Immutable stored revision of a document's bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub version_number: i64,
    pub storage_path: String,
    pub file_size: u64,
    pub file_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const VERSION_COLUMNS: &str = "id, document_id, version_number, storage_path, file_size, file_hash, \
     change_summary, created_by, created_at";

impl DocumentVersion {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let file_size: i64 = row.get(4)?;
        let created_at_str: String = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            version_number: row.get(2)?,
            storage_path: row.get(3)?,
            file_size: file_size as u64,
            file_hash: row.get(5)?,
            change_summary: row.get(6)?,
            created_by: row.get(7)?,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Text produced by a successful pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub id: String,
    pub document_id: String,
    pub version_id: String,
    pub extracted_text: Option<String>,
    pub ocr_applied: bool,
    pub extraction_method: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedText {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let ocr_applied: i64 = row.get(4)?;
        let extracted_at_str: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            version_id: row.get(2)?,
            extracted_text: row.get(3)?,
            ocr_applied: ocr_applied != 0,
            extraction_method: row.get(5)?,
            extracted_at: parse_timestamp(&extracted_at_str),
        })
    }
}

/// Filter and paging for document listings
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    pub owner_id: Option<String>,
    pub search: Option<String>,
    /// 1-indexed
    pub page: u32,
    pub page_size: u32,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            owner_id: None,
            search: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of a document listing
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub documents: Vec<Document>,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
