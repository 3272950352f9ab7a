//! # parlay-media
//!
//! Voice message and image attachment pipeline: exclusive audio device
//! leasing, session negotiation, WAV capture, upload with verification and
//! playback. Device access goes through small traits with cpal
//! implementations in [`audio`].

pub mod asset;
pub mod audio;
pub mod codec;
pub mod lease;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod storage;
pub mod uploader;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

mod error;

pub use asset::{AssetState, MediaAsset};
pub use audio::{CpalCapture, CpalOutput, CpalSessionPlatform};
pub use error::{MediaError, Result};
pub use lease::{AudioHardware, AudioLease, LeaseKind};
pub use playback::{MediaSource, PlaybackConfig, PlaybackController, PlaybackState, PlaybackStatus};
pub use recorder::{MediaRecorder, RecorderState};
pub use session::{AudioSessionNegotiator, SessionConfig, SessionPlatform};
pub use storage::{FetchedObject, ObjectStorage, StorageError};
pub use uploader::{MediaUploader, UploadConfig, UploadReceipt};
