//! New versions of an existing document.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Document, DocumentVersion};
use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::resolve_mime_type;
use crate::service::DocVaultService;
use crate::storage::storage_path;

impl DocVaultService {
    /// Store new bytes as the next version of a document and enqueue it.
    ///
    /// The bytes must not duplicate any existing document or version. The
    /// document's current version, path, size, hash and MIME type move to the
    /// new version and it goes back to `pending`.
    pub async fn upload_version<R>(
        &self,
        document_id: &str,
        reader: R,
        filename: &str,
        mime_type: Option<&str>,
        change_summary: Option<&str>,
        user_id: &str,
    ) -> ServiceResult<Document>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
    {
        let document = self.require_document(document_id)?;

        let mime_type = resolve_mime_type(mime_type, filename);
        let (reader, fingerprint) = self.accept_content(reader).await?;

        // Concurrent uploads to one document must not pick the same number
        let version_guard = self.lock_versions(document_id).await;

        let version_number = self.db.next_version_number(document_id)?;
        let now = Utc::now();
        let path = storage_path(document_id, version_number, now, filename);

        // No row references this number yet, so anything stored there is an
        // orphan from an earlier failed attempt and must not be taken as ours
        if self.store.exists(&path).await? {
            warn!(path = %path, "Replacing orphaned object at next version path");
            self.store.delete(&path).await?;
        }

        self.store_content(&path, reader, &fingerprint, &mime_type)
            .await?;

        let version = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version_number,
            storage_path: path.clone(),
            file_size: fingerprint.byte_count,
            file_hash: fingerprint.sha256.clone(),
            change_summary: change_summary
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created_by: user_id.to_string(),
            created_at: now,
        };

        match self.db.insert_version_and_set_current(&version, &mime_type) {
            Ok(true) => {}
            Ok(false) => {
                // Deleted while the bytes were being stored
                self.discard_object(&path).await;
                return Err(ServiceError::DocumentNotFound {
                    document_id: document_id.to_string(),
                });
            }
            Err(e) => {
                self.discard_object(&path).await;
                return Err(self.duplicate_or(&fingerprint, e));
            }
        }
        drop(version_guard);

        // A run on the old bytes must not overwrite the new version's state
        self.cancel_document_processing(document_id);

        metrics::counter!("docvault_uploads_total").increment(1);
        info!(
            doc_id = %document_id,
            version = version_number,
            previous_hash = %document.file_hash,
            bytes = fingerprint.byte_count,
            "New document version uploaded"
        );

        self.queue.enqueue(document_id).await;

        self.require_document(document_id)
    }

    /// Versions of a document ordered by version number
    pub fn list_versions(&self, document_id: &str) -> ServiceResult<Vec<DocumentVersion>> {
        self.require_document(document_id)?;
        self.db.list_versions(document_id)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;
    use chrono::Utc;

    use crate::db::ProcessingStatus;
    use crate::error::ServiceError;
    use crate::ingestion::compute_content_hash;
    use crate::service::testing::{TestHarness, YieldingReader};
    use crate::storage::{ContentStore, bytes_stream, storage_path};

    #[tokio::test]
    async fn test_new_version_becomes_current_and_pending() {
        let harness = TestHarness::new();
        let doc = harness.upload(b"first draft", "notes.txt", "text/plain").await;
        harness.service.run_pipeline(&doc.id).await;
        harness.drain_queue();

        let updated = harness
            .service
            .upload_version(
                &doc.id,
                Cursor::new(b"second draft, longer".to_vec()),
                "notes.md",
                None,
                Some("  Rewrote intro  "),
                "editor-1",
            )
            .await
            .unwrap();

        assert_eq!(updated.processing_status, ProcessingStatus::Pending);
        assert_eq!(updated.processing_progress, 0);
        assert_eq!(updated.mime_type, "text/markdown");
        assert_eq!(updated.file_size, 20);
        assert!(updated.storage_path.ends_with(&format!("/{}/v2.md", doc.id)));
        assert_ne!(updated.current_version_id, doc.current_version_id);

        let versions = harness.service.list_versions(&doc.id).unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(versions[1].change_summary.as_deref(), Some("Rewrote intro"));
        assert_eq!(versions[1].created_by, "editor-1");

        // Both objects are kept
        assert_eq!(harness.store.object_count(), 2);
        assert_eq!(harness.drain_queue(), vec![doc.id.clone()]);
    }

    #[tokio::test]
    async fn test_version_with_existing_bytes_is_duplicate() {
        let harness = TestHarness::new();
        let doc = harness.upload(b"original", "a.txt", "text/plain").await;

        let err = harness
            .service
            .upload_version(
                &doc.id,
                Cursor::new(b"original".to_vec()),
                "a.txt",
                Some("text/plain"),
                None,
                "owner-1",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::DuplicateContent { existing_id } if existing_id == doc.id));
        assert_eq!(harness.service.list_versions(&doc.id).unwrap().len(), 1);
        assert_eq!(harness.store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_version_for_unknown_document() {
        let harness = TestHarness::new();
        let err = harness
            .service
            .upload_version(
                "missing",
                Cursor::new(b"bytes".to_vec()),
                "a.txt",
                None,
                None,
                "owner-1",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
        assert_eq!(harness.store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_versions_get_distinct_numbers() {
        let harness = TestHarness::new();
        let doc = harness.upload(b"original", "a.txt", "text/plain").await;
        harness.drain_queue();

        let (first, second) = tokio::join!(
            harness.service.upload_version(
                &doc.id,
                YieldingReader::new(b"AAAAAAAA"),
                "a.txt",
                Some("text/plain"),
                None,
                "editor-a",
            ),
            harness.service.upload_version(
                &doc.id,
                YieldingReader::new(b"BBBBBBBB"),
                "a.txt",
                Some("text/plain"),
                None,
                "editor-b",
            ),
        );
        first.unwrap();
        second.unwrap();

        let versions = harness.service.list_versions(&doc.id).unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        // Every version's object holds exactly the bytes its hash describes
        for version in &versions {
            let stored = harness.store.get_bytes(&version.storage_path).unwrap();
            assert_eq!(compute_content_hash(&stored).sha256, version.file_hash);
        }

        let current = harness.service.db.get_document(&doc.id).unwrap().unwrap();
        assert!(harness.store.get_bytes(&current.storage_path).is_some());
        assert_eq!(current.storage_path, versions[2].storage_path);
    }

    #[tokio::test]
    async fn test_orphan_at_next_version_path_is_replaced() {
        let harness = TestHarness::new();
        let doc = harness.upload(b"original", "a.txt", "text/plain").await;

        // Same length as the upload below, different bytes
        let orphan_path = storage_path(&doc.id, 2, Utc::now(), "a.txt");
        harness
            .store
            .put(
                &orphan_path,
                bytes_stream(Bytes::from_static(b"stale!!!")),
                8,
                "text/plain",
            )
            .await
            .unwrap();

        let updated = harness
            .service
            .upload_version(
                &doc.id,
                Cursor::new(b"fresh!!!".to_vec()),
                "a.txt",
                Some("text/plain"),
                None,
                "owner-1",
            )
            .await
            .unwrap();

        assert_eq!(updated.storage_path, orphan_path);
        assert_eq!(
            &harness.store.get_bytes(&orphan_path).unwrap()[..],
            b"fresh!!!"
        );
    }
}
