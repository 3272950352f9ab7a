//! Playback of voice messages from a local file or a remote URL.
//!
//! Loading walks an ordered list of strategies and keeps the first that
//! yields playable audio. Nothing with zero duration is ever reported as
//! ready.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tempfile::TempPath;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::codec::{self, frames_to_duration, DecodedAudio};
use crate::error::{MediaError, Result};
use crate::session::{AudioSessionNegotiator, PlaybackSession};
use crate::storage::ObjectStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Local(PathBuf),
    /// A remote object, optionally with the file it was uploaded from.
    Remote {
        url: String,
        original: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub position: Duration,
    pub duration: Duration,
    pub error: Option<String>,
}

impl PlaybackStatus {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub download_timeout: Duration,
    /// How often position is published while playing.
    pub progress_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(15),
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// Opens output streams on the audio device.
pub trait OutputBackend: Send + Sync {
    /// Start rendering `audio`. The stream advances `cursor` (an index into
    /// `audio.samples`) as samples are consumed.
    fn start(
        &self,
        audio: Arc<DecodedAudio>,
        cursor: Arc<AtomicUsize>,
    ) -> Result<Box<dyn PlaybackSink>>;
}

pub trait PlaybackSink: Send {
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn stop(&mut self);
    /// An asynchronous stream failure, if one occurred.
    fn error(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadStrategy {
    /// Download the remote bytes into a temp file and decode that.
    RemoteTempFile,
    /// Decode the file the remote object was uploaded from.
    OriginalFile,
    /// Decode the downloaded bytes directly.
    InMemory,
    LocalFile,
}

impl LoadStrategy {
    fn for_source(source: &MediaSource) -> Vec<Self> {
        match source {
            MediaSource::Local(_) => vec![Self::LocalFile],
            MediaSource::Remote { original, .. } => {
                let mut order = vec![Self::RemoteTempFile];
                if original.is_some() {
                    order.push(Self::OriginalFile);
                }
                order.push(Self::InMemory);
                order
            }
        }
    }
}

struct Loaded {
    audio: Arc<DecodedAudio>,
    // keeps the downloaded temp file alive while loaded
    _temp: Option<TempPath>,
}

struct ActivePlayback {
    session: PlaybackSession,
    sink: Box<dyn PlaybackSink>,
}

type ActiveSlot = Arc<Mutex<Option<ActivePlayback>>>;

pub struct PlaybackController {
    negotiator: Arc<AudioSessionNegotiator>,
    output: Arc<dyn OutputBackend>,
    storage: Arc<dyn ObjectStorage>,
    config: PlaybackConfig,
    status: Arc<watch::Sender<PlaybackStatus>>,
    loaded: Option<Loaded>,
    active: ActiveSlot,
    cursor: Arc<AtomicUsize>,
    monitor: Option<JoinHandle<()>>,
}

impl PlaybackController {
    pub fn new(
        negotiator: Arc<AudioSessionNegotiator>,
        output: Arc<dyn OutputBackend>,
        storage: Arc<dyn ObjectStorage>,
        config: PlaybackConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(PlaybackStatus::idle());
        Self {
            negotiator,
            output,
            storage,
            config,
            status: Arc::new(tx),
            loaded: None,
            active: Arc::new(Mutex::new(None)),
            cursor: Arc::new(AtomicUsize::new(0)),
            monitor: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    /// Load `source`, replacing anything loaded before. Returns the clip
    /// duration.
    pub async fn load(&mut self, source: MediaSource) -> Result<Duration> {
        self.halt();
        self.loaded = None;
        self.status.send_replace(PlaybackStatus {
            state: PlaybackState::Loading,
            ..PlaybackStatus::idle()
        });

        let mut remote: Option<std::result::Result<Bytes, String>> = None;
        let mut last_error = MediaError::NotLoaded;

        for strategy in LoadStrategy::for_source(&source) {
            match self.try_load(strategy, &source, &mut remote).await {
                Ok(loaded) => {
                    let duration = loaded.audio.duration();
                    info!(?strategy, duration_ms = duration.as_millis() as u64, "Audio loaded");
                    self.loaded = Some(loaded);
                    self.cursor.store(0, Ordering::SeqCst);
                    self.status.send_replace(PlaybackStatus {
                        state: PlaybackState::Ready,
                        position: Duration::ZERO,
                        duration,
                        error: None,
                    });
                    return Ok(duration);
                }
                Err(e) => {
                    debug!(?strategy, error = %e, "Load strategy failed");
                    last_error = e;
                }
            }
        }

        warn!(error = %last_error, "Could not load audio");
        self.publish_error(&last_error);
        Err(last_error)
    }

    async fn try_load(
        &self,
        strategy: LoadStrategy,
        source: &MediaSource,
        remote: &mut Option<std::result::Result<Bytes, String>>,
    ) -> Result<Loaded> {
        match (strategy, source) {
            (LoadStrategy::LocalFile, MediaSource::Local(path)) => {
                let audio = decode_file(path.clone()).await?;
                Ok(Loaded {
                    audio: Arc::new(audio),
                    _temp: None,
                })
            }
            (LoadStrategy::OriginalFile, MediaSource::Remote {
                original: Some(path),
                ..
            }) => {
                let audio = decode_file(path.clone()).await?;
                Ok(Loaded {
                    audio: Arc::new(audio),
                    _temp: None,
                })
            }
            (LoadStrategy::RemoteTempFile, MediaSource::Remote { url, .. }) => {
                let bytes = self.remote_bytes(url, remote).await?;
                codec::check_size(bytes.len())?;
                let mut file = tempfile::Builder::new()
                    .prefix("playback-")
                    .suffix(".wav")
                    .tempfile()?;
                std::io::Write::write_all(&mut file, &bytes)?;
                let temp = file.into_temp_path();
                let audio = decode_file(temp.to_path_buf()).await?;
                Ok(Loaded {
                    audio: Arc::new(audio),
                    _temp: Some(temp),
                })
            }
            (LoadStrategy::InMemory, MediaSource::Remote { url, .. }) => {
                let bytes = self.remote_bytes(url, remote).await?;
                let audio = tokio::task::spawn_blocking(move || codec::decode_wav_bytes(&bytes))
                    .await
                    .map_err(|e| MediaError::Stream(e.to_string()))??;
                Ok(Loaded {
                    audio: Arc::new(audio),
                    _temp: None,
                })
            }
            (strategy, _) => Err(MediaError::InvalidState(format!(
                "{strategy:?} does not apply to this source"
            ))),
        }
    }

    /// Download once per load; later strategies reuse the result.
    async fn remote_bytes(
        &self,
        url: &str,
        cache: &mut Option<std::result::Result<Bytes, String>>,
    ) -> Result<Bytes> {
        if cache.is_none() {
            let fetched = match timeout(
                self.config.download_timeout,
                self.storage.fetch_public_object(url),
            )
            .await
            {
                Ok(Ok(object)) if (200..300).contains(&object.status) => Ok(object.bytes),
                Ok(Ok(object)) => Err(format!("download returned HTTP {}", object.status)),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("download timed out".to_string()),
            };
            *cache = Some(fetched);
        }
        match cache {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(e)) => Err(MediaError::Network(e.clone())),
            None => Err(MediaError::NotLoaded),
        }
    }

    /// Start or resume playback.
    pub fn play(&mut self) -> Result<()> {
        let audio = match &self.loaded {
            Some(loaded) => loaded.audio.clone(),
            None => return Err(MediaError::NotLoaded),
        };

        let current = self.status.borrow().state;
        match current {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(active) = slot.as_mut() {
                    active.sink.resume()?;
                    drop(slot);
                    self.set_state(PlaybackState::Playing);
                    return Ok(());
                }
            }
            _ => {}
        }

        let session = self.negotiator.acquire_playback()?;
        if !session.accepted {
            warn!(config = %session.config, "Trying playback with unaccepted audio session");
        }

        if current == PlaybackState::Finished {
            self.cursor.store(0, Ordering::SeqCst);
        }

        let sink = match self.output.start(audio.clone(), self.cursor.clone()) {
            Ok(sink) => sink,
            Err(e) => {
                let err = if session.accepted {
                    e
                } else {
                    MediaError::ConfigurationFailed {
                        last_tried: session.config.name.clone(),
                    }
                };
                warn!(error = %err, "Could not start playback");
                self.publish_error(&err);
                return Err(err);
            }
        };

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(ActivePlayback { session, sink });
        self.set_state(PlaybackState::Playing);

        self.monitor = Some(tokio::spawn(monitor(
            self.active.clone(),
            self.status.clone(),
            audio,
            self.cursor.clone(),
            self.config.progress_interval,
        )));
        Ok(())
    }

    /// Pause, keeping the device lease.
    pub fn pause(&mut self) -> Result<()> {
        if self.loaded.is_none() {
            return Err(MediaError::NotLoaded);
        }
        if self.status.borrow().state != PlaybackState::Playing {
            return Ok(());
        }
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = slot.as_mut() {
            active.sink.pause()?;
        }
        drop(slot);
        let position = self.position();
        self.status.send_modify(|s| {
            s.state = PlaybackState::Paused;
            s.position = position;
        });
        Ok(())
    }

    /// Stop and rewind, releasing the device lease.
    pub fn stop(&mut self) {
        self.halt();
        self.cursor.store(0, Ordering::SeqCst);
        if self.loaded.is_some() {
            self.status.send_modify(|s| {
                s.state = PlaybackState::Ready;
                s.position = Duration::ZERO;
                s.error = None;
            });
        }
    }

    fn halt(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        let taken = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut active) = taken {
            active.sink.stop();
            debug!(config = %active.session.config, "Playback halted");
        }
    }

    fn position(&self) -> Duration {
        match &self.loaded {
            Some(loaded) => position_of(&loaded.audio, self.cursor.load(Ordering::SeqCst)),
            None => Duration::ZERO,
        }
    }

    fn set_state(&self, state: PlaybackState) {
        self.status.send_modify(|s| {
            s.state = state;
            s.error = None;
        });
    }

    fn publish_error(&self, err: &MediaError) {
        self.status.send_modify(|s| {
            s.state = PlaybackState::Error;
            s.error = Some(err.to_string());
        });
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.halt();
    }
}

fn position_of(audio: &DecodedAudio, cursor: usize) -> Duration {
    let channels = audio.channels.max(1) as usize;
    let samples = cursor.min(audio.samples.len());
    frames_to_duration(samples / channels, audio.sample_rate)
}

async fn decode_file(path: PathBuf) -> Result<DecodedAudio> {
    tokio::task::spawn_blocking(move || codec::decode_wav_file(&path))
        .await
        .map_err(|e| MediaError::Stream(e.to_string()))?
}

/// Publishes position until the clip ends, the stream fails or playback is
/// halted.
async fn monitor(
    active: ActiveSlot,
    status: Arc<watch::Sender<PlaybackStatus>>,
    audio: Arc<DecodedAudio>,
    cursor: Arc<AtomicUsize>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let total = audio.samples.len();

    loop {
        ticker.tick().await;

        let mut slot = active.lock().unwrap_or_else(|e| e.into_inner());
        let Some(current) = slot.as_ref() else {
            break;
        };

        if let Some(err) = current.sink.error() {
            if let Some(mut ended) = slot.take() {
                ended.sink.stop();
            }
            drop(slot);
            warn!(error = %err, "Playback stream failed");
            status.send_modify(|s| {
                s.state = PlaybackState::Error;
                s.error = Some(err);
            });
            break;
        }

        let consumed = cursor.load(Ordering::SeqCst);
        if consumed >= total {
            if let Some(mut ended) = slot.take() {
                ended.sink.stop();
            }
            drop(slot);
            debug!("Playback finished");
            status.send_modify(|s| {
                s.state = PlaybackState::Finished;
                s.position = s.duration;
            });
            break;
        }
        drop(slot);

        let position = position_of(&audio, consumed);
        status.send_if_modified(|s| {
            if s.state == PlaybackState::Playing && s.position != position {
                s.position = position;
                true
            } else {
                false
            }
        });
    }
}
