//! Startup recovery for runs that did not survive a restart.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ServiceResult;
use crate::service::DocVaultService;

/// Recorded on documents whose run was cut short by a restart
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

/// What the startup sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Documents moved from `processing` to `failed`
    pub interrupted: usize,
    /// Pending documents put back on the queue
    pub requeued: Vec<String>,
}

impl DocVaultService {
    /// Fail documents left in `processing` and re-enqueue everything still
    /// `pending`. Call once at startup, before the API accepts requests.
    /// Start the workers first: requeueing a backlog larger than the queue
    /// blocks until they drain it.
    pub async fn recover_interrupted(&self) -> ServiceResult<RecoveryReport> {
        let interrupted = self.db.fail_stale_processing(INTERRUPTED_MESSAGE)?;
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted documents as failed");
        }

        let requeued = self.db.get_pending_document_ids()?;
        for id in &requeued {
            self.queue.enqueue(id).await;
        }

        info!(
            interrupted,
            requeued = requeued.len(),
            "Startup recovery sweep finished"
        );

        Ok(RecoveryReport {
            interrupted,
            requeued,
        })
    }
}
