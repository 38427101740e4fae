//! Extraction result storage. Rows are only ever inserted; the newest row for
//! a (document, version) pair is the authoritative one.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::ExtractedText;
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    pub fn insert_extracted_text(&self, text: &ExtractedText) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            r#"
            INSERT INTO document_text (id, document_id, version_id, extracted_text, ocr_applied, extraction_method, extracted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                text.id,
                text.document_id,
                text.version_id,
                text.extracted_text,
                text.ocr_applied as i64,
                text.extraction_method,
                text.extracted_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Most recent extraction for a specific version of a document
    pub fn get_latest_extracted_text(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> ServiceResult<Option<ExtractedText>> {
        let conn = self.conn();

        conn.query_row(
            "SELECT id, document_id, version_id, extracted_text, ocr_applied, extraction_method, extracted_at \
             FROM document_text WHERE document_id = ?1 AND version_id = ?2 \
             ORDER BY extracted_at DESC, rowid DESC LIMIT 1",
            params![document_id, version_id],
            ExtractedText::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Number of extraction rows stored for a document
    pub fn count_extracted_text(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_text WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::tests::insert_sample;
    use chrono::Utc;

    fn row(id: &str, text: &str) -> ExtractedText {
        ExtractedText {
            id: id.to_string(),
            document_id: "d1".to_string(),
            version_id: "d1-v1".to_string(),
            extracted_text: Some(text.to_string()),
            ocr_applied: false,
            extraction_method: "plain_text".to_string(),
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_row_wins() {
        let db = Database::open_in_memory().unwrap();
        insert_sample(&db, "d1", "h1");

        db.insert_extracted_text(&row("t1", "first")).unwrap();
        db.insert_extracted_text(&row("t2", "second")).unwrap();

        let latest = db.get_latest_extracted_text("d1", "d1-v1").unwrap().unwrap();
        assert_eq!(latest.extracted_text.as_deref(), Some("second"));
        assert_eq!(db.count_extracted_text("d1").unwrap(), 2);
        assert!(db.get_latest_extracted_text("d1", "other").unwrap().is_none());
    }
}
