//! Test fixtures: an in-memory store, scripted collaborators, and a harness
//! that wires them into a `DocVaultService`.

use std::collections::HashMap;
use std::io::{Cursor, SeekFrom};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::mpsc;

use super::{DocVaultService, Stage, StageContext, StageHook, WorkQueue};
use crate::config::{DynamicConfig, RuntimeConfig, test_static_config};
use crate::db::{Database, Document};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::ingestion::ocr::tests::{FakeEngine, FakeRasterizer};
use crate::ingestion::{ExtractionOutcome, FormatExtractor, OcrStage, TextExtractor};
use crate::storage::{ByteStream, ContentStore, ObjectMeta, bytes_stream};

/// `ContentStore` over a map, with the same put rules as the filesystem store
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    pub fail_delete: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn get_bytes(&self, path: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, _)| data.clone())
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Drop an object behind the service's back
    pub(crate) fn remove_silently(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(
        &self,
        path: &str,
        mut body: ByteStream,
        length: u64,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let existing_len = self
            .objects
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, _)| data.len() as u64);
        match existing_len {
            Some(existing_len) if existing_len == length => return Ok(path.to_string()),
            Some(existing_len) => {
                return Err(StorageError::PathCollision {
                    path: path.to_string(),
                    existing_len,
                    new_len: length,
                });
            }
            None => {}
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| StorageError::Io {
                path: path.to_string(),
                source,
            })?;
            buffer.extend_from_slice(&chunk);
        }
        if buffer.len() as u64 != length {
            return Err(StorageError::LengthMismatch {
                path: path.to_string(),
                expected: length,
                actual: buffer.len() as u64,
            });
        }

        self.objects.lock().unwrap().insert(
            path.to_string(),
            (buffer.freeze(), content_type.to_string()),
        );
        Ok(path.to_string())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        self.get_bytes(path).ok_or_else(|| StorageError::NotFound {
            path: path.to_string(),
        })
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream, StorageError> {
        Ok(bytes_stream(self.get(path).await?))
    }

    async fn stat(&self, path: &str) -> Result<ObjectMeta, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, content_type)| ObjectMeta {
                length: data.len() as u64,
                content_type: content_type.clone(),
            })
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                path: path.to_string(),
                source: std::io::Error::other("store unavailable"),
            });
        }
        Ok(self.objects.lock().unwrap().remove(path).is_some())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    fn presigned_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{}?ttl={}", path, ttl.as_secs()))
    }
}

/// In-memory reader that returns `Pending` before every real read, so two
/// uploads polled together interleave
pub(crate) struct YieldingReader {
    inner: Cursor<Vec<u8>>,
    ready: bool,
}

impl YieldingReader {
    pub(crate) fn new(data: &[u8]) -> Self {
        Self {
            inner: Cursor::new(data.to_vec()),
            ready: false,
        }
    }
}

impl AsyncRead for YieldingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for YieldingReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

/// Returns the same outcome for every input
pub(crate) struct ScriptedExtractor {
    outcome: ExtractionOutcome,
}

impl ScriptedExtractor {
    pub(crate) fn new(outcome: ExtractionOutcome) -> Self {
        Self { outcome }
    }
}

impl TextExtractor for ScriptedExtractor {
    fn extract(&self, _data: &[u8], _filename: &str, _mime_type: &str) -> ExtractionOutcome {
        self.outcome.clone()
    }
}

/// Fails one reserved stage
pub(crate) struct FailingHook {
    stage: Stage,
}

#[async_trait]
impl StageHook for FailingHook {
    async fn run(&self, stage: Stage, _ctx: &StageContext<'_>) -> ServiceResult<()> {
        if stage == self.stage {
            return Err(ServiceError::Internal {
                message: format!("{} hook failed", stage.name()),
            });
        }
        Ok(())
    }
}

/// Sleeps in every reserved stage
pub(crate) struct SlowHook {
    pub delay: Duration,
}

#[async_trait]
impl StageHook for SlowHook {
    async fn run(&self, _stage: Stage, _ctx: &StageContext<'_>) -> ServiceResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

struct NoHooks;

impl StageHook for NoHooks {}

/// Three scanned pages; the second one fails recognition
fn default_engine() -> FakeEngine {
    let mut engine = FakeEngine::new(&[(1, "page one"), (2, "page two"), (3, "page three")]);
    engine.fail_on = vec![2];
    engine
}

pub(crate) struct TestHarness {
    pub service: Arc<DocVaultService>,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<FakeEngine>,
    receiver: Mutex<Option<mpsc::Receiver<String>>>,
    _data_dir: TempDir,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        Self::build(Arc::new(FormatExtractor), Arc::new(NoHooks), default_engine())
    }

    pub(crate) fn with_engine(engine: FakeEngine) -> Self {
        Self::build(Arc::new(FormatExtractor), Arc::new(NoHooks), engine)
    }

    pub(crate) fn with_extractor(extractor: ScriptedExtractor) -> Self {
        Self::build(Arc::new(extractor), Arc::new(NoHooks), default_engine())
    }

    pub(crate) fn with_failing_hook(stage: Stage) -> Self {
        Self::build(
            Arc::new(FormatExtractor),
            Arc::new(FailingHook { stage }),
            default_engine(),
        )
    }

    pub(crate) fn with_hook(hooks: Arc<dyn StageHook>) -> Self {
        Self::build(Arc::new(FormatExtractor), hooks, default_engine())
    }

    fn build(
        extractor: Arc<dyn TextExtractor>,
        hooks: Arc<dyn StageHook>,
        engine: FakeEngine,
    ) -> Self {
        let data_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let runtime_config = Arc::new(RuntimeConfig::new(
            test_static_config(data_dir.path()),
            DynamicConfig::default(),
        ));

        let store = Arc::new(MemoryStore::default());

        let engine = Arc::new(engine);
        let ocr = Arc::new(OcrStage::new(engine.clone(), Arc::new(FakeRasterizer::new(3))));

        let (queue, receiver) = WorkQueue::new(64);

        let service = Arc::new(DocVaultService::new(
            db,
            runtime_config,
            store.clone(),
            extractor,
            ocr,
            hooks,
            queue,
        ));

        Self {
            service,
            store,
            engine,
            receiver: Mutex::new(Some(receiver)),
            _data_dir: data_dir,
        }
    }

    /// Upload through the service, panicking on error
    pub(crate) async fn upload(&self, data: &[u8], filename: &str, mime_type: &str) -> Document {
        self.service
            .upload_document(
                Cursor::new(data.to_vec()),
                filename,
                Some(mime_type),
                None,
                "owner-1",
            )
            .await
            .unwrap()
    }

    /// Document ids currently sitting in the work queue
    pub(crate) fn drain_queue(&self) -> Vec<String> {
        let mut guard = self.receiver.lock().unwrap();
        let Some(receiver) = guard.as_mut() else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        while let Ok(id) = receiver.try_recv() {
            ids.push(id);
        }
        ids
    }

    /// Hand the queue's receiving end to a worker pool
    pub(crate) fn take_receiver(&self) -> mpsc::Receiver<String> {
        self.receiver.lock().unwrap().take().unwrap()
    }
}
