//! Document read, delete, download and reprocess operations.

use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Document, DocumentPage, DocumentQuery, DocumentVersion, ExtractedText};
use crate::error::{ServiceError, ServiceResult, format_error_chain_ref};
use crate::service::DocVaultService;

/// A document together with its version history
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub versions: Vec<DocumentVersion>,
}

/// Time-limited retrieval URL for a document's current bytes
#[derive(Debug, Clone, Serialize)]
pub struct DownloadUrl {
    pub url: String,
    pub expires_in_secs: u64,
}

impl DocVaultService {
    /// Load a document or fail with `DocumentNotFound`
    pub(crate) fn require_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    pub fn get_document(&self, document_id: &str) -> ServiceResult<DocumentDetail> {
        let document = self.require_document(document_id)?;
        let versions = self.db.list_versions(document_id)?;
        Ok(DocumentDetail { document, versions })
    }

    pub fn list_documents(&self, query: &DocumentQuery) -> ServiceResult<DocumentPage> {
        self.db.list_documents(query)
    }

    /// Delete a document, its versions' objects and its extracted text.
    ///
    /// Store failures are logged and counted; the record is removed anyway.
    pub async fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        self.require_document(document_id)?;

        // Cancel any in-progress processing first
        if self.cancel_document_processing(document_id) {
            info!(doc_id = %document_id, "Cancelled in-progress processing for deleted document");
        }

        let versions = self.db.list_versions(document_id)?;
        let mut removed = 0usize;
        for version in &versions {
            match self.store.delete(&version.storage_path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    metrics::counter!("docvault_storage_divergence_total").increment(1);
                    warn!(
                        doc_id = %document_id,
                        path = %version.storage_path,
                        error = %format_error_chain_ref(&e),
                        "Failed to delete stored object; record will be removed anyway"
                    );
                }
            }
        }

        if !self.db.delete_document(document_id)? {
            return Err(ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            });
        }
        self.forget_version_lock(document_id);

        info!(
            doc_id = %document_id,
            versions = versions.len(),
            objects_removed = removed,
            "Deleted document"
        );
        Ok(())
    }

    /// Pre-signed URL for the current version's bytes
    pub fn download_url(&self, document_id: &str) -> ServiceResult<DownloadUrl> {
        let document = self.require_document(document_id)?;
        let ttl = self.runtime_config.dynamic().storage.presign_ttl();
        let url = self.store.presigned_url(&document.storage_path, ttl)?;
        Ok(DownloadUrl {
            url,
            expires_in_secs: ttl.as_secs(),
        })
    }

    /// Latest extracted text for the current version, if any was produced
    pub fn get_extracted_text(&self, document_id: &str) -> ServiceResult<Option<ExtractedText>> {
        let document = self.require_document(document_id)?;
        let Some(version_id) = document.current_version_id.as_deref() else {
            return Ok(None);
        };
        self.db.get_latest_extracted_text(document_id, version_id)
    }

    /// Put a document back to `pending` and enqueue a new run
    pub async fn reprocess_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.require_document(document_id)?;

        // A run already in flight would race the new one
        self.cancel_document_processing(document_id);
        self.db.reset_to_pending(document_id)?;
        self.queue.enqueue(document_id).await;

        info!(doc_id = %document_id, "Document queued for reprocessing");
        self.require_document(document_id)
    }
}
