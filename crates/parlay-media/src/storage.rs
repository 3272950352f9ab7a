//! Object storage seam used by the uploader and by remote playback.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("Storage returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Storage request timed out")]
    Timeout,
}

/// Response of a public object fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub status: u16,
    pub bytes: Bytes,
}

impl FetchedObject {
    /// A 2xx with a non-empty body.
    pub fn is_retrievable(&self) -> bool {
        (200..300).contains(&self.status) && !self.bytes.is_empty()
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Public URL of an object. Deterministic: `{public_base}/{bucket}/{path}`.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn fetch_public_object(&self, url: &str) -> Result<FetchedObject, StorageError>;
}

pub fn public_object_url(public_base: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/{}/{}",
        public_base.trim_end_matches('/'),
        bucket.trim_matches('/'),
        path.trim_start_matches('/')
    )
}
