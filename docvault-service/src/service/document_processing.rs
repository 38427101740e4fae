//! Document lifecycle: upload, versioning, the processing pipeline, and the
//! worker pool that drives it.
//!
//! This module coordinates document lifecycle operations:
//! - Upload with dedup and new versions
//! - The staged pipeline run and its outcome
//! - Background workers with supervision
//! - Startup recovery
//! - Cancellation management
//! - CRUD operations

mod cancellation;
mod crud;
mod processing;
mod recovery;
mod stages;
mod upload;
mod versions;
mod workers;

pub(crate) use cancellation::ProcessingTokens;
pub use crud::{DocumentDetail, DownloadUrl};
pub use processing::PipelineOutcome;
pub use stages::{NoopStageHook, Stage, StageContext, StageHook};
pub use workers::WorkQueue;
