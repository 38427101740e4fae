//! Local filesystem content store.
//!
//! Layout: `{root}/{path}` for the bytes plus `{root}/{path}.meta.json` for the
//! content type and length. Writes land in a temp file that is renamed into
//! place only after the full, correctly sized body has been synced.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::path::validate_path;
use super::{ByteStream, ContentStore, ObjectMeta, UrlSigner};
use crate::error::StorageError;

const META_SUFFIX: &str = ".meta.json";

pub struct FilesystemStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    /// Create the root and run a write/read/delete round trip so permission
    /// problems surface at startup instead of on the first upload.
    pub async fn validate(&self) -> Result<(), StorageError> {
        let check_path = ".health-check/check.bin";
        let full = self.root.join(check_path);
        let io_err = |source| StorageError::Io {
            path: check_path.to_string(),
            source,
        };

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        fs::write(&full, b"docvault-health-check")
            .await
            .map_err(io_err)?;
        let read_back = fs::read(&full).await.map_err(io_err)?;
        fs::remove_file(&full).await.map_err(io_err)?;
        if let Some(parent) = full.parent() {
            let _ = fs::remove_dir(parent).await;
        }

        if read_back != b"docvault-health-check" {
            return Err(io_err(std::io::Error::other("read-back mismatch")));
        }

        Ok(())
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn meta_path(full: &std::path::Path) -> PathBuf {
        let mut meta = full.as_os_str().to_owned();
        meta.push(META_SUFFIX);
        PathBuf::from(meta)
    }

    async fn existing_len(full: &std::path::Path) -> Option<u64> {
        fs::metadata(full).await.ok().map(|m| m.len())
    }

    async fn write_body(
        path: &str,
        temp: &std::path::Path,
        mut body: ByteStream,
        length: u64,
    ) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_string(),
            source,
        };

        let mut file = fs::File::create(temp).await.map_err(io_err)?;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(io_err)?;
            written += chunk.len() as u64;
            if written > length {
                // Keep counting is pointless; the body is already too long
                return Err(StorageError::LengthMismatch {
                    path: path.to_string(),
                    expected: length,
                    actual: written,
                });
            }
            file.write_all(&chunk).await.map_err(io_err)?;
        }

        if written != length {
            return Err(StorageError::LengthMismatch {
                path: path.to_string(),
                expected: length,
                actual: written,
            });
        }

        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FilesystemStore {
    async fn put(
        &self,
        path: &str,
        body: ByteStream,
        length: u64,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let full = self.full_path(path)?;
        let io_err = |source| StorageError::Io {
            path: path.to_string(),
            source,
        };

        if let Some(existing_len) = Self::existing_len(&full).await {
            if existing_len != length {
                warn!(
                    storage_path = %path,
                    existing_len,
                    new_len = length,
                    "Refusing to overwrite object with different length"
                );
                return Err(StorageError::PathCollision {
                    path: path.to_string(),
                    existing_len,
                    new_len: length,
                });
            }
            debug!(storage_path = %path, "Object already present with same length");
            return Ok(path.to_string());
        }

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp = full.with_file_name(format!(
            ".{}.{}.tmp",
            full.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("object"),
            uuid::Uuid::new_v4()
        ));

        if let Err(e) = Self::write_body(path, &temp, body, length).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        let meta = ObjectMeta {
            length,
            content_type: content_type.to_string(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        fs::write(Self::meta_path(&full), meta_json)
            .await
            .map_err(io_err)?;

        fs::rename(&temp, &full).await.map_err(|e| {
            warn!(storage_path = %path, error = %e, "Failed to move object into place");
            io_err(e)
        })?;

        debug!(storage_path = %path, size = length, "Stored object");
        Ok(path.to_string())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let full = self.full_path(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(StorageError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream, StorageError> {
        let full = self.full_path(path)?;
        match fs::File::open(&full).await {
            Ok(file) => Ok(ReaderStream::new(file).boxed()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(StorageError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn stat(&self, path: &str) -> Result<ObjectMeta, StorageError> {
        let full = self.full_path(path)?;
        let Some(length) = Self::existing_len(&full).await else {
            return Err(StorageError::NotFound {
                path: path.to_string(),
            });
        };

        // A missing or unreadable sidecar only loses the content type
        let content_type = match fs::read(Self::meta_path(&full)).await {
            Ok(raw) => serde_json::from_slice::<ObjectMeta>(&raw)
                .map(|m| m.content_type)
                .unwrap_or_else(|_| mime::APPLICATION_OCTET_STREAM.to_string()),
            Err(_) => mime::APPLICATION_OCTET_STREAM.to_string(),
        };

        Ok(ObjectMeta {
            length,
            content_type,
        })
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.full_path(path)?;

        let removed = match fs::remove_file(&full).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.to_string(),
                    source,
                });
            }
        };
        let _ = fs::remove_file(Self::meta_path(&full)).await;

        // Drop the per-document directory once its last version is gone
        if let Some(parent) = full.parent() {
            let _ = fs::remove_dir(parent).await;
        }

        Ok(removed)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.full_path(path)?;
        fs::try_exists(&full).await.map_err(|source| StorageError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn presigned_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        Ok(self.signer.sign(path, ttl))
    }
}
