//! The document processing pipeline.
//!
//! A run moves a document through the declared stages, persisting a progress
//! checkpoint after each one. Every error inside the run is caught here and
//! recorded on the document; callers only ever see a `PipelineOutcome`.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::stages::{Stage, StageContext};
use crate::db::{Document, ExtractedText};
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::ingestion::{is_text_based, needs_ocr};
use crate::service::DocVaultService;

/// Separates text-layer output from OCR output when both exist
pub const OCR_MERGE_DELIMITER: &str = "\n\n--- OCR Text ---\n\n";

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed {
        text_persisted: bool,
        ocr_applied: bool,
    },
    /// No document with that id; nothing was touched
    NotFound,
    Failed {
        error: String,
    },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Completed { .. } => "completed",
            PipelineOutcome::NotFound => "not_found",
            PipelineOutcome::Failed { .. } => "failed",
        }
    }
}

struct RunSummary {
    text_persisted: bool,
    ocr_applied: bool,
}

impl DocVaultService {
    /// Run the pipeline once for a document. Safe to call with unknown ids.
    pub async fn run_pipeline(&self, document_id: &str) -> PipelineOutcome {
        self.run_pipeline_under(document_id, &CancellationToken::new())
            .await
    }

    /// Run the pipeline with a token that cancels it along with `supervisor`.
    ///
    /// A cancelled run writes nothing further: whoever cancelled it (delete,
    /// reprocess, a new version, or the supervisor) owns the document's state.
    pub(crate) async fn run_pipeline_under(
        &self,
        document_id: &str,
        supervisor: &CancellationToken,
    ) -> PipelineOutcome {
        let document = match self.db.get_document(document_id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(doc_id = %document_id, "Pipeline run requested for unknown document");
                return PipelineOutcome::NotFound;
            }
            Err(e) => return self.record_failure(document_id, &e),
        };

        // Registered before entering `processing` so a cancel cannot slip in between
        let run = self.register_processing_token(document_id, supervisor);
        if let Err(e) = self.db.start_processing(document_id) {
            return self.record_failure(document_id, &e);
        }

        info!(
            doc_id = %document_id,
            title = %document.title,
            mime_type = %document.mime_type,
            "Starting document processing"
        );

        let summary = match self.run_stages(&document, &run.token).await {
            Ok(summary) => summary,
            Err(e) if is_cancellation(&e) || run.token.is_cancelled() => {
                let message = format_error_chain_ref(&e);
                info!(doc_id = %document_id, "Run cancelled, leaving document state untouched");
                return PipelineOutcome::Failed { error: message };
            }
            Err(e) => return self.record_failure(document_id, &e),
        };

        if let Err(e) = self.db.complete_processing(document_id) {
            return self.record_failure(document_id, &e);
        }

        info!(
            doc_id = %document_id,
            text_persisted = summary.text_persisted,
            ocr_applied = summary.ocr_applied,
            "Document processing completed"
        );

        PipelineOutcome::Completed {
            text_persisted: summary.text_persisted,
            ocr_applied: summary.ocr_applied,
        }
    }

    async fn run_stages(
        &self,
        document: &Document,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<RunSummary> {
        let doc_id = document.id.as_str();
        let config = self.runtime_config.snapshot();

        // Fetch
        self.check_cancellation(doc_id, cancel_token)?;
        let data = self.store.get(&document.storage_path).await?;
        debug!(doc_id = %doc_id, bytes = data.len(), "Fetched document bytes");
        self.checkpoint(doc_id, Stage::Fetch, cancel_token)?;

        // Text extraction
        self.check_cancellation(doc_id, cancel_token)?;
        let extraction = {
            let extractor = self.extractor.clone();
            let data = data.clone();
            let filename = document.original_filename.clone();
            let mime_type = document.mime_type.clone();
            tokio::task::spawn_blocking(move || extractor.extract(&data, &filename, &mime_type))
                .await
                .map_err(|e| ServiceError::Internal {
                    message: format!("Text extraction task failed: {}", e),
                })?
        };
        self.checkpoint(doc_id, Stage::TextExtraction, cancel_token)?;

        // Routing and OCR
        self.check_cancellation(doc_id, cancel_token)?;
        let mut text = extraction.text;
        let mut method = extraction.method;
        let mut ocr_applied = false;

        let ocr_needed = needs_ocr(
            &document.mime_type,
            text.as_deref(),
            config.ocr.min_text_length,
        );
        info!(
            doc_id = %doc_id,
            mime_type = %document.mime_type,
            text_based = is_text_based(&document.mime_type),
            method = %method,
            ocr_needed,
            ocr_enabled = config.ocr.enabled,
            "OCR routing decision"
        );

        if ocr_needed && config.ocr.enabled {
            if let Some(ocr_text) = self
                .run_ocr(data, document, &config.ocr, cancel_token)
                .await?
            {
                // Without extracted text the label names a failure, not a method
                (text, method) = match text {
                    Some(original) => (
                        Some(format!("{}{}{}", original, OCR_MERGE_DELIMITER, ocr_text)),
                        format!("{}+ocr", method),
                    ),
                    None => (Some(ocr_text), "ocr".to_string()),
                };
                ocr_applied = true;
            }
        }
        self.checkpoint(doc_id, Stage::Ocr, cancel_token)?;

        // Persist text
        let text = text.filter(|t| !t.trim().is_empty());
        let text_persisted = match &text {
            Some(text) => {
                let version_id =
                    document
                        .current_version_id
                        .clone()
                        .ok_or_else(|| ServiceError::Internal {
                            message: format!("Document {} has no current version", doc_id),
                        })?;

                self.db.insert_extracted_text(&ExtractedText {
                    id: Uuid::new_v4().to_string(),
                    document_id: doc_id.to_string(),
                    version_id,
                    extracted_text: Some(text.clone()),
                    ocr_applied,
                    extraction_method: method.clone(),
                    extracted_at: Utc::now(),
                })?;
                info!(
                    doc_id = %doc_id,
                    method = %method,
                    chars = text.chars().count(),
                    "Extracted text saved"
                );
                true
            }
            None => {
                info!(doc_id = %doc_id, method = %method, "No text produced");
                false
            }
        };

        // Reserved stages
        let ctx = StageContext {
            document,
            text: text.as_deref(),
        };
        for stage in Stage::RESERVED {
            self.check_cancellation(doc_id, cancel_token)?;
            self.hooks.run(stage, &ctx).await?;
            self.checkpoint(doc_id, stage, cancel_token)?;
        }
        self.check_cancellation(doc_id, cancel_token)?;

        Ok(RunSummary {
            text_persisted,
            ocr_applied,
        })
    }

    async fn run_ocr(
        &self,
        data: Bytes,
        document: &Document,
        ocr_config: &crate::config::OcrConfig,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<Option<String>> {
        let ocr = self.ocr.clone();
        let mime_type = document.mime_type.clone();
        let ocr_config = ocr_config.clone();
        let cancel = cancel_token.clone();

        let ocr_text = tokio::task::spawn_blocking(move || {
            ocr.extract(&data, &mime_type, &ocr_config, &cancel)
        })
        .await
            .map_err(|e| ServiceError::Internal {
                message: format!("OCR task failed: {}", e),
        })?;
        self.check_cancellation(&document.id, cancel_token)?;

        match &ocr_text {
            Some(text) => info!(
                doc_id = %document.id,
                chars = text.chars().count(),
                "OCR produced text"
            ),
            None => info!(doc_id = %document.id, "OCR produced no text"),
        }

        Ok(ocr_text.filter(|t| !t.trim().is_empty()))
    }

    /// Persist a stage checkpoint unless the run was cancelled meanwhile
    fn checkpoint(
        &self,
        document_id: &str,
        stage: Stage,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<()> {
        self.check_cancellation(document_id, cancel_token)?;
        self.db
            .update_progress(document_id, stage.name(), stage.checkpoint())?;
        debug!(
            doc_id = %document_id,
            stage = stage.name(),
            progress = stage.checkpoint(),
            "Stage checkpoint"
        );
        Ok(())
    }

    /// Record a failed run on the document and build the outcome
    fn record_failure(&self, document_id: &str, error: &ServiceError) -> PipelineOutcome {
        let message = format_error_chain_ref(error);
        warn!(doc_id = %document_id, error = %message, "Document processing failed");
        self.mark_failed(document_id, &message);
        PipelineOutcome::Failed { error: message }
    }

    /// Persist the failed state, logging if even that does not work
    pub(crate) fn mark_failed(&self, document_id: &str, message: &str) {
        if let Err(update_err) = self.db.fail_processing(document_id, message) {
            warn!(
                doc_id = %document_id,
                original_error = %message,
                update_error = %format_error_chain_ref(&update_err),
                "Failed to mark document as failed"
            );
        }
    }
}

fn is_cancellation(error: &ServiceError) -> bool {
    matches!(
        error,
        ServiceError::Processing(ProcessingError::Cancelled { .. })
    )
}
