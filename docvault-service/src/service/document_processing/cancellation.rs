//! Cancellation token management for pipeline runs.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ProcessingError, ServiceResult};
use crate::service::DocVaultService;

/// In-flight runs keyed by document id, tagged with the owning run's id
pub(crate) type ProcessingTokens = DashMap<String, (Uuid, CancellationToken)>;

/// Registration of one pipeline run. Dropping it deregisters the run, but
/// only while the map still holds this run's token and not a newer one.
pub(crate) struct ProcessingRun {
    tokens: Arc<ProcessingTokens>,
    document_id: String,
    run_id: Uuid,
    pub token: CancellationToken,
}

impl Drop for ProcessingRun {
    fn drop(&mut self) {
        let removed = self
            .tokens
            .remove_if(&self.document_id, |_, (run_id, _)| *run_id == self.run_id);
        if removed.is_none() {
            debug!(doc_id = %self.document_id, "Run token already replaced or cancelled");
        }
    }
}

impl DocVaultService {
    /// Register a cancellation token for a document being processed.
    /// A newer run for the same document replaces the older run's token.
    /// The token is a child of `supervisor`, so cancelling that cancels the run.
    pub(crate) fn register_processing_token(
        &self,
        document_id: &str,
        supervisor: &CancellationToken,
    ) -> ProcessingRun {
        let run_id = Uuid::new_v4();
        let token = supervisor.child_token();
        self.processing_cancellation_tokens
            .insert(document_id.to_string(), (run_id, token.clone()));
        ProcessingRun {
            tokens: self.processing_cancellation_tokens.clone(),
            document_id: document_id.to_string(),
            run_id,
            token,
        }
    }

    /// Cancel processing for a document if in progress.
    pub(crate) fn cancel_document_processing(&self, document_id: &str) -> bool {
        if let Some((_, (_, token))) = self.processing_cancellation_tokens.remove(document_id) {
            token.cancel();
            info!(doc_id = %document_id, "Document processing cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Check if processing should continue for a document.
    pub(crate) fn check_cancellation(
        &self,
        document_id: &str,
        token: &CancellationToken,
    ) -> ServiceResult<()> {
        if token.is_cancelled() {
            Err(ProcessingError::Cancelled {
                document_id: document_id.to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}
