//! Document upload with content deduplication.

use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Document, DocumentVersion, ProcessingStatus};
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::ingestion::{ContentFingerprint, hash_stream, resolve_mime_type};
use crate::service::DocVaultService;
use crate::storage::storage_path;

impl DocVaultService {
    /// Store a new document and enqueue it for processing.
    ///
    /// The reader is hashed once, rewound, and streamed into the store. The
    /// returned document is `pending`; clients poll its status for progress.
    pub async fn upload_document<R>(
        &self,
        reader: R,
        filename: &str,
        mime_type: Option<&str>,
        title: Option<&str>,
        owner_id: &str,
    ) -> ServiceResult<Document>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
    {
        let mime_type = resolve_mime_type(mime_type, filename);
        let (reader, fingerprint) = self.accept_content(reader).await?;

        let doc_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let path = storage_path(&doc_id, 1, now, filename);

        self.store_content(&path, reader, &fingerprint, &mime_type)
            .await?;

        let version = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            document_id: doc_id.clone(),
            version_number: 1,
            storage_path: path.clone(),
            file_size: fingerprint.byte_count,
            file_hash: fingerprint.sha256.clone(),
            change_summary: Some("Initial upload".to_string()),
            created_by: owner_id.to_string(),
            created_at: now,
        };

        let document = Document {
            id: doc_id.clone(),
            title: title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(filename)
                .to_string(),
            original_filename: filename.to_string(),
            mime_type,
            file_size: fingerprint.byte_count,
            file_hash: fingerprint.sha256.clone(),
            storage_path: path.clone(),
            current_version_id: Some(version.id.clone()),
            owner_id: owner_id.to_string(),
            processing_status: ProcessingStatus::Pending,
            processing_progress: 0,
            processing_stage: None,
            processing_error: None,
            uploaded_at: now,
            updated_at: now,
        };

        if let Err(e) = self.db.insert_document_with_version(&document, &version) {
            self.discard_object(&path).await;
            return Err(self.duplicate_or(&fingerprint, e));
        }

        metrics::counter!("docvault_uploads_total").increment(1);
        info!(
            doc_id = %doc_id,
            filename = %filename,
            mime_type = %document.mime_type,
            bytes = fingerprint.byte_count,
            "Document uploaded"
        );

        self.queue.enqueue(&doc_id).await;

        Ok(document)
    }

    /// Hash the reader, enforce the size limit and the global unique-hash
    /// rule, then rewind it for storing. Nothing is mutated before this
    /// returns `Ok`.
    pub(super) async fn accept_content<R>(
        &self,
        mut reader: R,
    ) -> ServiceResult<(R, ContentFingerprint)>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let fingerprint = hash_stream(&mut reader)
            .await
            .map_err(ProcessingError::Io)?;

        let max_size = self.runtime_config.dynamic().limits.max_document_size_bytes;
        if fingerprint.byte_count > max_size {
            return Err(ProcessingError::FileTooLarge {
                size: fingerprint.byte_count,
                max: max_size,
            }
            .into());
        }

        if let Some(existing_id) = self.db.get_document_id_by_hash(&fingerprint.sha256)? {
            metrics::counter!("docvault_duplicate_uploads_total").increment(1);
            info!(
                existing_id = %existing_id,
                hash = %fingerprint.sha256,
                "Rejected duplicate upload"
            );
            return Err(ServiceError::DuplicateContent { existing_id });
        }

        reader
            .seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(ProcessingError::Io)?;

        debug!(hash = %fingerprint.sha256, bytes = fingerprint.byte_count, "Content accepted");
        Ok((reader, fingerprint))
    }

    /// Stream accepted content into the store at `path`
    pub(super) async fn store_content<R>(
        &self,
        path: &str,
        reader: R,
        fingerprint: &ContentFingerprint,
        mime_type: &str,
    ) -> ServiceResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.store
            .put(
                path,
                ReaderStream::new(reader).boxed(),
                fingerprint.byte_count,
                mime_type,
            )
            .await?;
        Ok(())
    }

    /// Remove an object whose record never made it into the database
    pub(super) async fn discard_object(&self, path: &str) {
        if let Err(e) = self.store.delete(path).await {
            metrics::counter!("docvault_storage_divergence_total").increment(1);
            warn!(
                path = %path,
                error = %format_error_chain_ref(&e),
                "Failed to remove orphaned object"
            );
        }
    }

    /// A concurrent upload of the same bytes can win the race between the
    /// duplicate check and the insert; report that as a duplicate.
    pub(super) fn duplicate_or(
        &self,
        fingerprint: &ContentFingerprint,
        error: ServiceError,
    ) -> ServiceError {
        match self.db.get_document_id_by_hash(&fingerprint.sha256) {
            Ok(Some(existing_id)) => ServiceError::DuplicateContent { existing_id },
            _ => error,
        }
    }
}
