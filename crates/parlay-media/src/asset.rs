//! Media attachments and their lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempPath;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use parlay_shared::{MediaKind, MediaRef};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetState {
    Capturing,
    Captured,
    Uploading,
    Verifying,
    Uploaded,
    Failed,
}

#[derive(Debug)]
enum LocalMedia {
    /// Owned temp file, deleted on release.
    Temp(TempPath),
    /// A file the user picked. Never deleted by us.
    File(PathBuf),
    Released,
}

/// One image or audio attachment on its way to object storage.
#[derive(Debug)]
pub struct MediaAsset {
    id: Uuid,
    kind: MediaKind,
    local: LocalMedia,
    state: Arc<watch::Sender<AssetState>>,
    remote_url: Option<String>,
}

impl MediaAsset {
    /// An audio clip that is still being recorded into `temp`.
    pub fn capturing(temp: TempPath) -> Self {
        Self::with_local(MediaKind::Audio, LocalMedia::Temp(temp), AssetState::Capturing)
    }

    /// A captured clip or selected attachment owned as a temp file.
    pub fn from_temp(kind: MediaKind, temp: TempPath) -> Self {
        Self::with_local(kind, LocalMedia::Temp(temp), AssetState::Captured)
    }

    /// An attachment the user selected from their own files.
    pub fn from_file(kind: MediaKind, path: impl Into<PathBuf>) -> Self {
        Self::with_local(kind, LocalMedia::File(path.into()), AssetState::Captured)
    }

    fn with_local(kind: MediaKind, local: LocalMedia, state: AssetState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            id: Uuid::new_v4(),
            kind,
            local,
            state: Arc::new(tx),
            remote_url: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn state(&self) -> AssetState {
        *self.state.borrow()
    }

    /// Progress stream for the presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<AssetState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: AssetState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(asset = %self.id, from = ?previous, to = ?state, "Asset state changed");
        }
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub(crate) fn set_remote_url(&mut self, url: String) {
        self.remote_url = Some(url);
    }

    /// The reference to put in a message, once uploaded.
    pub fn media_ref(&self) -> Option<MediaRef> {
        match (self.state(), &self.remote_url) {
            (AssetState::Uploaded, Some(url)) => Some(MediaRef {
                kind: self.kind,
                url: url.clone(),
            }),
            _ => None,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.local {
            LocalMedia::Temp(p) => Some(&**p),
            LocalMedia::File(p) => Some(p.as_path()),
            LocalMedia::Released => None,
        }
    }

    /// File extension for the uploaded object, taken from the local file when
    /// it has a sensible one.
    pub fn extension(&self) -> String {
        self.local_path()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .filter(|e| !e.is_empty() && e.len() <= 5 && e != "tmp")
            .unwrap_or_else(|| self.kind.extension().to_string())
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        let path = self
            .local_path()
            .ok_or_else(|| MediaError::InvalidState("local media already released".into()))?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Delete owned temp storage. User-selected files are left alone.
    pub fn release_local(&mut self) {
        if let LocalMedia::Temp(_) = &self.local {
            debug!(asset = %self.id, "Releasing temp media");
        }
        // TempPath deletes its file on drop
        self.local = LocalMedia::Released;
    }
}

/// MIME type for an object extension, falling back to the kind default.
pub fn content_type_for(kind: MediaKind, extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        _ => kind.content_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_with(bytes: &[u8], suffix: &str) -> TempPath {
        let file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        std::fs::write(file.path(), bytes).unwrap();
        file.into_temp_path()
    }

    #[tokio::test]
    async fn test_release_deletes_temp_file() {
        let temp = temp_with(b"data", ".wav");
        let path = temp.to_path_buf();
        let mut asset = MediaAsset::from_temp(MediaKind::Audio, temp);
        assert_eq!(asset.read_bytes().await.unwrap(), b"data");

        asset.release_local();
        assert!(!path.exists());
        assert!(asset.read_bytes().await.is_err());
    }

    #[test]
    fn test_release_keeps_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.PNG");
        std::fs::write(&path, b"png").unwrap();

        let mut asset = MediaAsset::from_file(MediaKind::Image, &path);
        assert_eq!(asset.extension(), "png");
        asset.release_local();
        assert!(path.exists());
    }

    #[test]
    fn test_state_changes_are_observable() {
        let asset = MediaAsset::from_file(MediaKind::Image, "/tmp/x.jpg");
        let rx = asset.subscribe();
        asset.set_state(AssetState::Uploading);
        assert_eq!(*rx.borrow(), AssetState::Uploading);
    }

    #[test]
    fn test_media_ref_requires_upload() {
        let mut asset = MediaAsset::from_file(MediaKind::Image, "/tmp/x.jpg");
        asset.set_remote_url("https://cdn/x.jpg".into());
        assert!(asset.media_ref().is_none());
        asset.set_state(AssetState::Uploaded);
        assert_eq!(asset.media_ref().unwrap().url, "https://cdn/x.jpg");
    }

    #[test]
    fn test_temp_extension_falls_back_to_kind() {
        let asset = MediaAsset::from_temp(MediaKind::Audio, temp_with(b"", ""));
        assert_eq!(asset.extension(), "wav");
        assert_eq!(content_type_for(MediaKind::Audio, "wav"), "audio/wav");
        assert_eq!(content_type_for(MediaKind::Image, "bin"), "image/jpeg");
    }
}
