//! Document CRUD and processing-state operations.
//!
//! Progress and status writes are plain field updates (last writer wins);
//! overlapping runs for the same document are tolerated rather than locked out.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{
    DOCUMENT_COLUMNS, Document, DocumentPage, DocumentQuery, DocumentVersion, ProcessingStatus,
};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert a new document together with its first version and point the
    /// document at it, all in one transaction.
    pub fn insert_document_with_version(
        &self,
        doc: &Document,
        version: &DocumentVersion,
    ) -> ServiceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            INSERT INTO documents (id, title, original_filename, mime_type, file_size, file_hash, storage_path, current_version_id, owner_id, processing_status, processing_progress, processing_stage, processing_error, uploaded_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                doc.id,
                doc.title,
                doc.original_filename,
                doc.mime_type,
                doc.file_size as i64,
                doc.file_hash,
                doc.storage_path,
                doc.owner_id,
                doc.processing_status.as_str(),
                doc.processing_progress as i64,
                doc.processing_stage,
                doc.processing_error,
                doc.uploaded_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Self::insert_version_row(&tx, version)?;

        tx.execute(
            "UPDATE documents SET current_version_id = ?1 WHERE id = ?2",
            params![version.id, doc.id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Find the document that already owns this content fingerprint, either as
    /// its current bytes or as any earlier version.
    pub fn get_document_id_by_hash(&self, file_hash: &str) -> ServiceResult<Option<String>> {
        let conn = self.conn();

        conn.query_row(
            "SELECT id FROM documents WHERE file_hash = ?1 \
             UNION SELECT document_id FROM document_versions WHERE file_hash = ?1 \
             LIMIT 1",
            params![file_hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List documents newest first, optionally filtered by owner and a
    /// case-insensitive substring of title or original filename.
    pub fn list_documents(&self, query: &DocumentQuery) -> ServiceResult<DocumentPage> {
        let conn = self.conn();

        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, 100);
        let offset = (page as i64 - 1) * page_size as i64;
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(&s.to_lowercase())));

        // NULL parameters disable their filter
        let filter = "(?1 IS NULL OR owner_id = ?1) \
                      AND (?2 IS NULL OR fold_case(title) LIKE ?2 ESCAPE '\\' OR fold_case(original_filename) LIKE ?2 ESCAPE '\\')";

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM documents WHERE {filter}"),
                params![query.owner_id, pattern],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {filter} \
                 ORDER BY uploaded_at DESC, id LIMIT ?3 OFFSET ?4"
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![query.owner_id, pattern, page_size as i64, offset],
                Document::from_row,
            )
            .map_err(DatabaseError::Query)?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(DocumentPage {
            total: total as u64,
            page,
            page_size,
            documents,
        })
    }

    /// Delete a document; versions and extracted text cascade
    pub fn delete_document(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Enter `processing` at 0% for a new run
    pub fn start_processing(&self, document_id: &str) -> ServiceResult<bool> {
        self.set_processing_state(
            document_id,
            ProcessingStatus::Processing,
            0,
            None,
            None,
        )
    }

    /// Record a stage checkpoint
    pub fn update_progress(
        &self,
        document_id: &str,
        stage: &str,
        progress: u8,
    ) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE documents SET processing_stage = ?1, processing_progress = ?2, updated_at = ?3 WHERE id = ?4",
                params![stage, progress as i64, Utc::now().to_rfc3339(), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Terminal success: `completed` at 100%
    pub fn complete_processing(&self, document_id: &str) -> ServiceResult<bool> {
        self.set_processing_state(
            document_id,
            ProcessingStatus::Completed,
            100,
            Some("completed"),
            None,
        )
    }

    /// Terminal failure: `failed` at 0% with the cause preserved
    pub fn fail_processing(&self, document_id: &str, error: &str) -> ServiceResult<bool> {
        self.set_processing_state(
            document_id,
            ProcessingStatus::Failed,
            0,
            None,
            Some(error),
        )
    }

    /// Put a document back in the queue state
    pub fn reset_to_pending(&self, document_id: &str) -> ServiceResult<bool> {
        self.set_processing_state(document_id, ProcessingStatus::Pending, 0, None, None)
    }

    fn set_processing_state(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        progress: u8,
        stage: Option<&str>,
        error: Option<&str>,
    ) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE documents SET processing_status = ?1, processing_progress = ?2, processing_stage = ?3, processing_error = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    status.as_str(),
                    progress as i64,
                    stage,
                    error,
                    Utc::now().to_rfc3339(),
                    document_id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark every document stuck in `processing` as failed. Used at startup,
    /// when no run can still be alive.
    pub fn fail_stale_processing(&self, error: &str) -> ServiceResult<usize> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE documents SET processing_status = 'failed', processing_progress = 0, processing_stage = NULL, processing_error = ?1, updated_at = ?2 \
                 WHERE processing_status = 'processing'",
                params![error, Utc::now().to_rfc3339()],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// IDs of documents waiting for a run (oldest first)
    pub fn get_pending_document_ids(&self) -> ServiceResult<Vec<String>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id FROM documents WHERE processing_status = 'pending' ORDER BY uploaded_at ASC",
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(DatabaseError::Query)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(ids)
    }
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    pub(crate) fn sample_document(id: &str, hash: &str, uploaded_at: DateTime<Utc>) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Title {id}"),
            original_filename: format!("{id}.pdf"),
            mime_type: "application/pdf".to_string(),
            file_size: 42,
            file_hash: hash.to_string(),
            storage_path: format!("documents/2024/03/{id}/v1.pdf"),
            current_version_id: None,
            owner_id: "owner-1".to_string(),
            processing_status: ProcessingStatus::Pending,
            processing_progress: 0,
            processing_stage: None,
            processing_error: None,
            uploaded_at,
            updated_at: uploaded_at,
        }
    }

    pub(crate) fn sample_version(doc: &Document) -> DocumentVersion {
        DocumentVersion {
            id: format!("{}-v1", doc.id),
            document_id: doc.id.clone(),
            version_number: 1,
            storage_path: doc.storage_path.clone(),
            file_size: doc.file_size,
            file_hash: doc.file_hash.clone(),
            change_summary: Some("Initial upload".to_string()),
            created_by: doc.owner_id.clone(),
            created_at: doc.uploaded_at,
        }
    }

    pub(crate) fn insert_sample(db: &Database, id: &str, hash: &str) -> Document {
        let doc = sample_document(id, hash, Utc::now());
        db.insert_document_with_version(&doc, &sample_version(&doc))
            .unwrap();
        db.get_document(id).unwrap().unwrap()
    }

    #[test]
    fn test_insert_sets_current_version() {
        let db = Database::open_in_memory().unwrap();
        let doc = insert_sample(&db, "d1", "h1");

        assert_eq!(doc.current_version_id.as_deref(), Some("d1-v1"));
        assert_eq!(doc.processing_status, ProcessingStatus::Pending);
        assert_eq!(db.get_document_id_by_hash("h1").unwrap().as_deref(), Some("d1"));
        assert!(db.get_document_id_by_hash("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_hash_is_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        insert_sample(&db, "d1", "same");

        let dup = sample_document("d2", "same", Utc::now());
        assert!(
            db.insert_document_with_version(&dup, &sample_version(&dup))
                .is_err()
        );
        // The failed transaction left nothing behind
        assert!(db.get_document("d2").unwrap().is_none());
        assert!(db.list_versions("d2").unwrap().is_empty());
    }

    #[test]
    fn test_list_documents_pagination_and_search() {
        let db = Database::open_in_memory().unwrap();
        for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
            let uploaded = Utc.with_ymd_and_hms(2024, 3, 1 + i as u32, 0, 0, 0).unwrap();
            let mut doc = sample_document(name, &format!("hash-{name}"), uploaded);
            doc.title = format!("Report {}", name.to_uppercase());
            db.insert_document_with_version(&doc, &sample_version(&doc))
                .unwrap();
        }

        let first = db
            .list_documents(&DocumentQuery {
                page_size: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.total, 3);
        let ids: Vec<_> = first.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["gamma", "beta"]);

        let second = db
            .list_documents(&DocumentQuery {
                page: 2,
                page_size: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0].id, "alpha");

        let search = db
            .list_documents(&DocumentQuery {
                search: Some("report be".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(search.total, 1);
        assert_eq!(search.documents[0].id, "beta");

        let other_owner = db
            .list_documents(&DocumentQuery {
                owner_id: Some("someone-else".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(other_owner.total, 0);
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let db = Database::open_in_memory().unwrap();
        let mut doc = sample_document("d1", "h1", Utc::now());
        doc.title = "École Notes".to_string();
        db.insert_document_with_version(&doc, &sample_version(&doc))
            .unwrap();

        for search in ["école", "ÉCOLE", "notes"] {
            let page = db
                .list_documents(&DocumentQuery {
                    search: Some(search.to_string()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(page.total, 1, "search {search}");
        }
    }

    #[test]
    fn test_processing_state_transitions() {
        let db = Database::open_in_memory().unwrap();
        insert_sample(&db, "d1", "h1");

        db.start_processing("d1").unwrap();
        db.update_progress("d1", "fetch", 10).unwrap();
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Processing);
        assert_eq!(doc.processing_progress, 10);
        assert_eq!(doc.processing_stage.as_deref(), Some("fetch"));

        db.fail_processing("d1", "boom").unwrap();
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        assert_eq!(doc.processing_progress, 0);
        assert_eq!(doc.processing_error.as_deref(), Some("boom"));

        db.reset_to_pending("d1").unwrap();
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Pending);
        assert!(doc.processing_error.is_none());
    }

    #[test]
    fn test_fail_stale_processing_and_pending_ids() {
        let db = Database::open_in_memory().unwrap();
        insert_sample(&db, "stuck", "h1");
        insert_sample(&db, "waiting", "h2");
        db.start_processing("stuck").unwrap();

        assert_eq!(db.fail_stale_processing("restarted").unwrap(), 1);
        let stuck = db.get_document("stuck").unwrap().unwrap();
        assert_eq!(stuck.processing_status, ProcessingStatus::Failed);
        assert_eq!(db.get_pending_document_ids().unwrap(), vec!["waiting"]);
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        insert_sample(&db, "d1", "h1");

        assert!(db.delete_document("d1").unwrap());
        assert!(!db.delete_document("d1").unwrap());
        assert!(db.list_versions("d1").unwrap().is_empty());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
