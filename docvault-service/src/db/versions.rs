//! Document version operations.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::{DocumentVersion, VERSION_COLUMNS};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

impl Database {
    pub(super) fn insert_version_row(
        conn: &Connection,
        version: &DocumentVersion,
    ) -> ServiceResult<()> {
        conn.execute(
            r#"
            INSERT INTO document_versions (id, document_id, version_number, storage_path, file_size, file_hash, change_summary, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                version.id,
                version.document_id,
                version.version_number,
                version.storage_path,
                version.file_size as i64,
                version.file_hash,
                version.change_summary,
                version.created_by,
                version.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if is_version_number_conflict(&e) {
                ServiceError::VersionConflict {
                    document_id: version.document_id.clone(),
                    version_number: version.version_number,
                }
            } else {
                DatabaseError::Query(e).into()
            }
        })?;

        Ok(())
    }

    /// Versions of a document in ascending version order
    pub fn list_versions(&self, document_id: &str) -> ServiceResult<Vec<DocumentVersion>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM document_versions WHERE document_id = ?1 ORDER BY version_number ASC"
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], DocumentVersion::from_row)
            .map_err(DatabaseError::Query)?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(versions)
    }

    /// Get a single version by its ID
    pub fn get_version(&self, version_id: &str) -> ServiceResult<Option<DocumentVersion>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM document_versions WHERE id = ?1"),
            params![version_id],
            DocumentVersion::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// The number the next version of this document will get
    pub fn next_version_number(&self, document_id: &str) -> ServiceResult<i64> {
        let conn = self.conn();

        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(version_number) FROM document_versions WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(max.unwrap_or(0) + 1)
    }

    /// Insert a new version and make it the document's current one. The
    /// document's content fields follow the new version and it goes back to
    /// `pending` so the pipeline picks it up.
    pub fn insert_version_and_set_current(
        &self,
        version: &DocumentVersion,
        mime_type: &str,
    ) -> ServiceResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        Self::insert_version_row(&tx, version)?;

        let rows = tx
            .execute(
                "UPDATE documents SET current_version_id = ?1, storage_path = ?2, file_size = ?3, file_hash = ?4, mime_type = ?5, \
                 processing_status = 'pending', processing_progress = 0, processing_stage = NULL, processing_error = NULL, updated_at = ?6 \
                 WHERE id = ?7",
                params![
                    version.id,
                    version.storage_path,
                    version.file_size as i64,
                    version.file_hash,
                    mime_type,
                    Utc::now().to_rfc3339(),
                    version.document_id,
                ],
            )
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }
}

/// `UNIQUE(document_id, version_number)` rejected the row
fn is_version_number_conflict(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains("document_versions.version_number")
        }
        _ => false,
    }
}
