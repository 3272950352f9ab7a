//! Upload of media attachments to object storage with post-upload
//! verification.
//!
//! Storage is eventually consistent: a freshly written object may not be
//! publicly readable yet. Verification is therefore bounded and diagnostic.
//! Exhausting it leaves the asset uploaded and only logs the outcome.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlay_shared::constants::{
    DEFAULT_AUDIO_BUCKET, DEFAULT_IMAGE_BUCKET, DEFAULT_UPLOAD_TIMEOUT_MS,
    DEFAULT_VERIFY_ATTEMPTS, DEFAULT_VERIFY_DELAY_MS, DEFAULT_VERIFY_TIMEOUT_MS, MAX_MEDIA_SIZE,
};
use parlay_shared::{ChatError, MediaKind};

use crate::asset::{content_type_for, AssetState, MediaAsset};
use crate::codec;
use crate::error::{MediaError, Result};
use crate::storage::{ObjectStorage, StorageError};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub audio_bucket: String,
    pub image_bucket: String,
    pub upload_timeout: Duration,
    /// Maximum number of verification fetches.
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    /// Timeout of a single verification fetch.
    pub verify_timeout: Duration,
    pub max_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            audio_bucket: DEFAULT_AUDIO_BUCKET.to_string(),
            image_bucket: DEFAULT_IMAGE_BUCKET.to_string(),
            upload_timeout: Duration::from_millis(DEFAULT_UPLOAD_TIMEOUT_MS),
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_delay: Duration::from_millis(DEFAULT_VERIFY_DELAY_MS),
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS),
            max_size: MAX_MEDIA_SIZE,
        }
    }
}

impl UploadConfig {
    pub fn bucket_for(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Audio => &self.audio_bucket,
            MediaKind::Image => &self.image_bucket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub url: String,
    /// Whether a verification fetch succeeded.
    pub verified: bool,
    /// Verification fetches performed.
    pub attempts: u32,
}

pub struct MediaUploader {
    storage: Arc<dyn ObjectStorage>,
    config: UploadConfig,
}

impl MediaUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: UploadConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `asset` and return its public URL.
    ///
    /// Accepts assets in `Captured` state, or `Failed` for a user-initiated
    /// retry after an upload error.
    pub async fn upload(&self, asset: &mut MediaAsset) -> Result<UploadReceipt> {
        match asset.state() {
            AssetState::Captured | AssetState::Failed => {}
            other => {
                return Err(MediaError::InvalidState(format!(
                    "cannot upload asset in state {other:?}"
                )))
            }
        }

        let bytes = match asset.read_bytes().await {
            Ok(b) => b,
            Err(e) => {
                asset.set_state(AssetState::Failed);
                return Err(e);
            }
        };
        if let Err(e) = self.validate(asset.kind(), &bytes) {
            warn!(asset = %asset.id(), error = %e, "Rejecting invalid media");
            asset.set_state(AssetState::Failed);
            asset.release_local();
            return Err(e);
        }

        asset.set_state(AssetState::Uploading);
        let bucket = self.config.bucket_for(asset.kind()).to_string();
        let extension = asset.extension();
        let path = format!("{}.{}", Uuid::new_v4(), extension);
        let content_type = content_type_for(asset.kind(), &extension);
        let size = bytes.len();

        let upload = self
            .storage
            .upload_object(&bucket, &path, Bytes::from(bytes), content_type);
        let result = match timeout(self.config.upload_timeout, upload).await {
            Ok(r) => r,
            Err(_) => Err(StorageError::Timeout),
        };
        if let Err(e) = result {
            warn!(asset = %asset.id(), bucket = %bucket, error = %e, "Upload failed");
            // local bytes are kept for a manual retry
            asset.set_state(AssetState::Failed);
            return Err(MediaError::UploadFailed(e.to_string()));
        }

        let url = self.storage.public_url(&bucket, &path);
        info!(asset = %asset.id(), %url, size, "Media uploaded");
        asset.set_remote_url(url.clone());

        asset.set_state(AssetState::Verifying);
        let (verified, attempts) = self.verify(&url).await;
        if !verified {
            let diagnostic = ChatError::VerificationInconclusive { attempts };
            warn!(asset = %asset.id(), %url, "{diagnostic}");
        }

        asset.set_state(AssetState::Uploaded);
        asset.release_local();

        Ok(UploadReceipt {
            url,
            verified,
            attempts,
        })
    }

    fn validate(&self, kind: MediaKind, bytes: &[u8]) -> Result<()> {
        codec::check_size(bytes.len())?;
        if bytes.len() > self.config.max_size {
            return Err(MediaError::InvalidMedia(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                self.config.max_size
            )));
        }
        if kind == MediaKind::Audio {
            codec::probe_wav_duration(bytes)?;
        }
        Ok(())
    }

    /// Fetch the public URL until it is retrievable or attempts run out.
    async fn verify(&self, url: &str) -> (bool, u32) {
        let max = self.config.verify_attempts.max(1);
        for attempt in 1..=max {
            match timeout(self.config.verify_timeout, self.storage.fetch_public_object(url)).await
            {
                Ok(Ok(object)) if object.is_retrievable() => {
                    debug!(%url, attempt, "Upload verified");
                    return (true, attempt);
                }
                Ok(Ok(object)) => {
                    debug!(
                        %url,
                        attempt,
                        status = object.status,
                        len = object.bytes.len(),
                        "Object not retrievable yet"
                    );
                }
                Ok(Err(e)) => debug!(%url, attempt, error = %e, "Verification fetch failed"),
                Err(_) => debug!(%url, attempt, "Verification fetch timed out"),
            }
            if attempt < max {
                sleep(self.config.verify_delay).await;
            }
        }
        (false, max)
    }
}
