//! Content hashing for deduplication.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8192;

/// SHA-256 digest plus the number of bytes it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentFingerprint {
    /// 64-char lowercase hex
    pub sha256: String,
    pub byte_count: u64,
}

/// Hash a reader to the end in fixed-size chunks.
///
/// Never seeks; callers that need the bytes again must rewind themselves.
pub async fn hash_stream<R>(mut reader: R) -> std::io::Result<ContentFingerprint>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut byte_count: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        byte_count += bytes_read as u64;
    }

    Ok(ContentFingerprint {
        sha256: format!("{:x}", hasher.finalize()),
        byte_count,
    })
}

/// Compute the fingerprint of a byte slice.
///
/// Useful when content is already in memory.
pub fn compute_content_hash(content: &[u8]) -> ContentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(content);
    ContentFingerprint {
        sha256: format!("{:x}", hasher.finalize()),
        byte_count: content.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_hash_stream_known_digest() {
        let fingerprint = hash_stream(&b"hello world"[..]).await.unwrap();
        assert_eq!(fingerprint.sha256, HELLO_WORLD_SHA256);
        assert_eq!(fingerprint.byte_count, 11);
    }

    #[test]
    fn test_compute_content_hash() {
        let fingerprint = compute_content_hash(b"hello world");
        assert_eq!(fingerprint.sha256, HELLO_WORLD_SHA256);
        assert_eq!(fingerprint.byte_count, 11);
    }

    #[tokio::test]
    async fn test_hash_stream_across_partial_reads() {
        // Reads arrive split at arbitrary boundaries
        let reader = tokio_test::io::Builder::new()
            .read(b"hel")
            .read(b"lo wo")
            .read(b"rld")
            .build();

        let fingerprint = hash_stream(reader).await.unwrap();
        assert_eq!(fingerprint, compute_content_hash(b"hello world"));
    }

    #[tokio::test]
    async fn test_file_and_content_hash_match() {
        let content = vec![7u8; CHUNK_SIZE * 3 + 17];
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let reader = tokio::fs::File::open(file.path()).await.unwrap();
        let streamed = hash_stream(reader).await.unwrap();

        assert_eq!(streamed, compute_content_hash(&content));
        assert_eq!(streamed.byte_count, content.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let fingerprint = hash_stream(&b""[..]).await.unwrap();
        assert_eq!(fingerprint.byte_count, 0);
        assert_eq!(
            fingerprint.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
