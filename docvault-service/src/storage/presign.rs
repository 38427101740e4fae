//! HMAC-SHA256 signed, expiring object URLs.
//!
//! URL form: `{base}/objects/{path}?expires={unix_secs}&signature={sig}` where
//! `sig` is the unpadded URL-safe base64 MAC of `"{path}\n{expires}"`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ServiceError, ServiceResult, StorageError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: &[u8], base_url: &str) -> ServiceResult<Self> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| ServiceError::Config {
            message: format!("Invalid signing secret: {}", e),
        })?;

        Ok(Self {
            mac,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Signed URL valid for `ttl` from now
    pub fn sign(&self, path: &str, ttl: Duration) -> String {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        self.sign_until(path, expires)
    }

    /// Signed URL valid until the given unix timestamp
    pub fn sign_until(&self, path: &str, expires: i64) -> String {
        format!(
            "{}/objects/{}?expires={}&signature={}",
            self.base_url,
            path,
            expires,
            self.signature(path, expires)
        )
    }

    /// Check a signature taken from a request against the current time
    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> Result<(), StorageError> {
        self.verify_at(path, expires, signature, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StorageError::InvalidSignature {
                path: path.to_string(),
            })?;

        // verify_slice compares in constant time
        self.keyed(path, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature {
                path: path.to_string(),
            })?;

        if now > expires {
            return Err(StorageError::Expired {
                path: path.to_string(),
            });
        }

        Ok(())
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.keyed(path, expires).finalize().into_bytes())
    }

    fn keyed(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}
