//! Work queue and the supervised worker pool that drains it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::processing::PipelineOutcome;
use crate::error::{ProcessingError, ServiceError, format_error_chain_ref};
use crate::service::DocVaultService;

/// Sending side of the bounded document work queue
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<String>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a document for a pipeline run. Waits while the queue is full.
    pub async fn enqueue(&self, document_id: &str) {
        if self.tx.send(document_id.to_string()).await.is_err() {
            // Stays pending; the next startup sweep picks it up
            warn!(doc_id = %document_id, "Work queue closed, document left pending");
        }
    }
}

impl DocVaultService {
    /// Start the document processing workers.
    /// This should be called once on server startup.
    pub fn start_worker_pool(
        service: Arc<DocVaultService>,
        mut receiver: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let concurrency = service
                .runtime_config
                .static_config
                .worker
                .concurrency
                .max(1);
            let semaphore = Arc::new(Semaphore::new(concurrency));
            info!(concurrency, "Document processing workers started");

            while let Some(document_id) = receiver.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let service = service.clone();
                tokio::spawn(async move {
                    service.supervise_run(&document_id).await;
                    drop(permit);
                });
            }

            info!("Work queue closed, document processing workers stopped");
        })
    }

    /// Run the pipeline in its own task under the configured time limit.
    ///
    /// A run that times out is cancelled and given a grace period to stop,
    /// then aborted. The task has ended before the document is forced to
    /// `failed`, so no late write from the run can follow that.
    pub async fn supervise_run(self: &Arc<Self>, document_id: &str) -> PipelineOutcome {
        let pipeline = self.runtime_config.dynamic().pipeline.clone();
        let limit = pipeline.run_timeout();
        let started = Instant::now();

        let supervisor = CancellationToken::new();
        let service = self.clone();
        let id = document_id.to_string();
        let run_token = supervisor.clone();
        let mut handle =
            tokio::spawn(async move { service.run_pipeline_under(&id, &run_token).await });

        let outcome = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                let message = format!("Pipeline run aborted: {}", join_error);
                error!(doc_id = %document_id, error = %message, "Pipeline run panicked");
                self.force_failed(document_id, message)
            }
            Err(_) => {
                supervisor.cancel();
                let finished = match tokio::time::timeout(pipeline.cancel_grace(), &mut handle).await
                {
                    Ok(result) => result.ok(),
                    Err(_) => {
                        handle.abort();
                        let _ = (&mut handle).await;
                        warn!(doc_id = %document_id, "Pipeline run ignored cancellation, aborted");
                        None
                    }
                };
                if let Some(outcome @ PipelineOutcome::Completed { .. }) = finished {
                    // Already past its last cancellation point
                    return self.record_run(outcome, started);
                }

                let message = format_error_chain_ref(&ServiceError::from(
                    ProcessingError::Timeout {
                        secs: limit.as_secs(),
                    },
                ));
                warn!(
                    doc_id = %document_id,
                    limit_secs = limit.as_secs(),
                    "Pipeline run timed out"
                );
                self.force_failed(document_id, message)
            }
        };

        self.record_run(outcome, started)
    }

    fn record_run(&self, outcome: PipelineOutcome, started: Instant) -> PipelineOutcome {
        metrics::counter!("docvault_pipeline_runs_total", "outcome" => outcome.label())
            .increment(1);
        metrics::histogram!("docvault_pipeline_run_seconds")
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    fn force_failed(&self, document_id: &str, message: String) -> PipelineOutcome {
        self.mark_failed(document_id, &message);
        PipelineOutcome::Failed { error: message }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::db::ProcessingStatus;
    use crate::error::ServiceResult;
    use crate::service::testing::{SlowHook, TestHarness};
    use crate::service::{Stage, StageContext, StageHook};

    struct PanickingHook;

    #[async_trait]
    impl StageHook for PanickingHook {
        async fn run(&self, _stage: Stage, _ctx: &StageContext<'_>) -> ServiceResult<()> {
            panic!("hook exploded");
        }
    }

    #[tokio::test]
    async fn test_enqueue_delivers_in_order() {
        let (queue, mut rx) = WorkQueue::new(4);
        queue.enqueue("a").await;
        queue.enqueue("b").await;
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_enqueue_on_closed_queue_does_not_panic() {
        let (queue, rx) = WorkQueue::new(1);
        drop(rx);
        queue.enqueue("a").await;
    }

    #[tokio::test]
    async fn test_timed_out_run_is_forced_failed() {
        let harness = TestHarness::with_hook(Arc::new(SlowHook {
            delay: Duration::from_secs(30),
        }));
        let mut updates = std::collections::HashMap::new();
        updates.insert("pipeline.run_timeout_secs".to_string(), serde_json::json!(1));
        updates.insert("pipeline.cancel_grace_secs".to_string(), serde_json::json!(0));
        harness.service.update_settings(updates).unwrap();

        let doc = harness.upload(b"slow words", "slow.txt", "text/plain").await;
        let outcome = harness.service.supervise_run(&doc.id).await;

        let PipelineOutcome::Failed { error } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(error.contains("timed out"), "{}", error);

        let stored = harness.service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(stored.processing_progress, 0);
        assert!(stored.processing_error.unwrap().contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_run_writes_nothing_after_timeout() {
        let harness = TestHarness::with_hook(Arc::new(SlowHook {
            delay: Duration::from_millis(1500),
        }));
        let mut updates = std::collections::HashMap::new();
        updates.insert("pipeline.run_timeout_secs".to_string(), serde_json::json!(1));
        updates.insert("pipeline.cancel_grace_secs".to_string(), serde_json::json!(5));
        harness.service.update_settings(updates).unwrap();

        let doc = harness.upload(b"slow words", "slow.txt", "text/plain").await;
        let outcome = harness.service.supervise_run(&doc.id).await;
        assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

        // The hook wakes inside the grace period and sees the cancelled token
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let stored = harness.service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(stored.processing_progress, 0);
        assert!(stored.processing_error.unwrap().contains("timed out"));
        assert!(
            !harness
                .service
                .processing_cancellation_tokens
                .contains_key(&doc.id)
        );
    }

    #[tokio::test]
    async fn test_panicking_run_is_forced_failed() {
        let harness = TestHarness::with_hook(Arc::new(PanickingHook));
        let doc = harness.upload(b"fragile", "f.txt", "text/plain").await;

        let outcome = harness.service.supervise_run(&doc.id).await;
        assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

        let stored = harness.service.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_worker_pool_processes_uploads() {
        let harness = TestHarness::new();
        let pool = DocVaultService::start_worker_pool(
            harness.service.clone(),
            harness.take_receiver(),
        );

        let first = harness.upload(b"first file", "1.txt", "text/plain").await;
        let second = harness.upload(b"second file", "2.txt", "text/plain").await;

        for id in [&first.id, &second.id] {
            let mut status = ProcessingStatus::Pending;
            for _ in 0..200 {
                status = harness
                    .service
                    .db
                    .get_document(id)
                    .unwrap()
                    .unwrap()
                    .processing_status;
                if status == ProcessingStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(status, ProcessingStatus::Completed);
        }

        pool.abort();
    }
}
