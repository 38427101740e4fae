//! Declared pipeline stages and the extension point for reserved stages.

use async_trait::async_trait;

use crate::db::Document;
use crate::error::ServiceResult;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    TextExtraction,
    Ocr,
    Embedding,
    Metadata,
    Indexing,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Fetch,
        Stage::TextExtraction,
        Stage::Ocr,
        Stage::Embedding,
        Stage::Metadata,
        Stage::Indexing,
    ];

    /// Stages run through `StageHook`
    pub const RESERVED: [Stage; 3] = [Stage::Embedding, Stage::Metadata, Stage::Indexing];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::TextExtraction => "text_extraction",
            Stage::Ocr => "ocr",
            Stage::Embedding => "embedding",
            Stage::Metadata => "metadata",
            Stage::Indexing => "indexing",
        }
    }

    /// Share of overall progress this stage accounts for
    pub fn weight(self) -> u8 {
        match self {
            Stage::Fetch => 10,
            Stage::TextExtraction => 20,
            Stage::Ocr => 20,
            Stage::Embedding => 15,
            Stage::Metadata => 15,
            Stage::Indexing => 10,
        }
    }

    /// Progress recorded once this stage is done: the sum of the weights of
    /// every stage up to and including it
    pub fn checkpoint(self) -> u8 {
        Stage::ALL
            .iter()
            .take_while(|stage| **stage != self)
            .map(|stage| stage.weight())
            .sum::<u8>()
            + self.weight()
    }
}

/// What a reserved stage gets to see
pub struct StageContext<'a> {
    pub document: &'a Document,
    /// Text persisted by this run, if any
    pub text: Option<&'a str>,
}

/// Extension point for the embedding, metadata and indexing stages.
///
/// The default does nothing; an error fails the run like any other stage.
#[async_trait]
pub trait StageHook: Send + Sync {
    async fn run(&self, stage: Stage, ctx: &StageContext<'_>) -> ServiceResult<()> {
        let _ = (stage, ctx);
        Ok(())
    }
}

/// Hook that leaves every reserved stage empty
pub struct NoopStageHook;

impl StageHook for NoopStageHook {}
