//! Object storage for document bytes.
//!
//! The `ContentStore` trait is the only owner of byte lifetime; database rows
//! hold paths into it. `FilesystemStore` is the bundled implementation.

pub mod filesystem;
pub mod path;
pub mod presign;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub use filesystem::FilesystemStore;
pub use path::storage_path;
pub use presign::UrlSigner;

/// Streamed object body
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Stored alongside each object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub length: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Write `length` bytes from `body` at `path`.
    ///
    /// Fails with `PathCollision` if an object of a different length already
    /// lives at `path`, and with `LengthMismatch` if the stream does not yield
    /// exactly `length` bytes. Re-putting the same length is a no-op.
    async fn put(
        &self,
        path: &str,
        body: ByteStream,
        length: u64,
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn get(&self, path: &str) -> Result<Bytes, StorageError>;

    async fn get_stream(&self, path: &str) -> Result<ByteStream, StorageError>;

    async fn stat(&self, path: &str) -> Result<ObjectMeta, StorageError>;

    /// Returns whether an object was removed
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Time-limited retrieval URL for `path`
    fn presigned_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Wrap an in-memory buffer as a single-chunk body
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data: Bytes = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
