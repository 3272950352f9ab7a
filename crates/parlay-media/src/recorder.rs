//! Voice message capture.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use parlay_shared::constants::{RECORDING_CHANNELS, RECORDING_SAMPLE_RATE};

use crate::asset::{AssetState, MediaAsset};
use crate::codec;
use crate::error::{MediaError, Result};
use crate::lease::AudioLease;
use crate::session::AudioSessionNegotiator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

/// PCM handed back by a finished capture stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Opens input streams on the audio device.
pub trait CaptureBackend: Send + Sync {
    /// `sample_rate` and `channels` are preferences. The stream reports
    /// the format it actually used in its `CapturedAudio`.
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CaptureStream>>;
}

pub trait CaptureStream: Send {
    /// Stop capturing and return everything recorded.
    fn finish(self: Box<Self>) -> Result<CapturedAudio>;
}

struct ActiveRecording {
    // dropped after the stream is finished
    lease: AudioLease,
    stream: Box<dyn CaptureStream>,
    asset: MediaAsset,
    started: Instant,
}

/// Records one clip at a time into a WAV temp file.
pub struct MediaRecorder {
    negotiator: Arc<AudioSessionNegotiator>,
    backend: Arc<dyn CaptureBackend>,
    sample_rate: u32,
    channels: u16,
    state: RecorderState,
    active: Option<ActiveRecording>,
}

impl MediaRecorder {
    pub fn new(negotiator: Arc<AudioSessionNegotiator>, backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            negotiator,
            backend,
            sample_rate: RECORDING_SAMPLE_RATE,
            channels: RECORDING_CHANNELS,
            state: RecorderState::Idle,
            active: None,
        }
    }

    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started.elapsed())
    }

    /// State of the clip being recorded.
    pub fn asset_state(&self) -> Option<AssetState> {
        self.active.as_ref().map(|a| a.asset.state())
    }

    /// Begin capturing. A no-op while already recording.
    pub fn start(&mut self) -> Result<RecorderState> {
        if self.is_recording() {
            debug!("Recorder already running");
            return Ok(self.state);
        }

        let (lease, config) = self.negotiator.acquire_capture()?;

        let temp = tempfile::Builder::new()
            .prefix("voice-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        // on error the lease and temp file are dropped here
        let stream = self
            .backend
            .open(self.sample_rate, self.channels)
            .map_err(|e| {
                warn!(error = %e, "Capture device refused to open");
                match e {
                    MediaError::ResourceUnavailable(m) => MediaError::ResourceUnavailable(m),
                    other => MediaError::ResourceUnavailable(other.to_string()),
                }
            })?;

        let asset = MediaAsset::capturing(temp);
        info!(asset = %asset.id(), session = %config, "Recording started");

        self.active = Some(ActiveRecording {
            lease,
            stream,
            asset,
            started: Instant::now(),
        });
        self.state = RecorderState::Recording;
        Ok(self.state)
    }

    /// End capture and encode the clip. The lease is released whether or
    /// not encoding succeeds.
    pub fn stop(&mut self) -> Result<MediaAsset> {
        let active = self.active.take().ok_or(MediaError::NotRecording)?;
        self.state = RecorderState::Stopped;

        let ActiveRecording {
            lease,
            stream,
            asset,
            started,
        } = active;

        let captured = match stream.finish() {
            Ok(c) => c,
            Err(e) => {
                warn!(asset = %asset.id(), error = %e, "Capture stream failed");
                asset.set_state(AssetState::Failed);
                return Err(e);
            }
        };
        drop(lease);

        let path: PathBuf = asset
            .local_path()
            .ok_or_else(|| MediaError::InvalidState("recording has no temp file".into()))?
            .to_path_buf();
        let size = match codec::encode_wav(
            &captured.samples,
            captured.sample_rate,
            captured.channels,
            &path,
        ) {
            Ok(size) => size,
            Err(e) => {
                asset.set_state(AssetState::Failed);
                return Err(e);
            }
        };

        asset.set_state(AssetState::Captured);
        info!(
            asset = %asset.id(),
            size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recording stopped"
        );
        Ok(asset)
    }

    /// Discard the current recording, deleting its temp file.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.stream.finish() {
                debug!(error = %e, "Capture stream errored during cancel");
            }
            info!(asset = %active.asset.id(), "Recording cancelled");
        }
        self.state = RecorderState::Idle;
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        self.cancel();
    }
}
