//! In-memory doubles for the device and storage seams, shared by this
//! crate's tests and by downstream integration tests (`testing` feature).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::codec::{encode_wav, DecodedAudio};
use crate::error::{MediaError, Result};
use crate::playback::{OutputBackend, PlaybackSink};
use crate::recorder::{CaptureBackend, CaptureStream, CapturedAudio};
use crate::session::{SessionConfig, SessionPlatform};
use crate::storage::{public_object_url, FetchedObject, ObjectStorage, StorageError};

/// A short sine burst encoded as WAV bytes.
pub fn tone_wav(frames: usize, sample_rate: u32) -> Vec<u8> {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("tone.wav");
    let samples: Vec<i16> = (0..frames)
        .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
        .collect();
    encode_wav(&samples, sample_rate, 1, &path).expect("encode tone");
    std::fs::read(&path).expect("read tone")
}

/// Accepts only the configurations it was told to, recording every attempt.
#[derive(Default)]
pub struct ScriptedPlatform {
    accept: Vec<String>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedPlatform {
    pub fn accepting(names: &[&str]) -> Self {
        Self {
            accept: names.iter().map(|s| s.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

impl SessionPlatform for ScriptedPlatform {
    fn apply(&self, config: &SessionConfig) -> std::result::Result<(), String> {
        self.attempts.lock().unwrap().push(config.name.clone());
        if self.accept.contains(&config.name) {
            Ok(())
        } else {
            Err(format!("{} rejected", config.name))
        }
    }
}

/// Object storage held in a map keyed by public URL.
pub struct MemoryStorage {
    public_base: String,
    objects: Mutex<HashMap<String, Bytes>>,
    fail_uploads: AtomicBool,
    hang_fetches: AtomicBool,
    hidden_fetches: AtomicU32,
    uploads: AtomicU32,
    fetches: AtomicU32,
}

impl MemoryStorage {
    pub fn new(public_base: &str) -> Self {
        Self {
            public_base: public_base.to_string(),
            objects: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            hang_fetches: AtomicBool::new(false),
            hidden_fetches: AtomicU32::new(0),
            uploads: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Fetches never complete.
    pub fn hang_fetches(&self, hang: bool) {
        self.hang_fetches.store(hang, Ordering::SeqCst);
    }

    /// The next `n` fetches answer 404 as if the object had not propagated.
    pub fn hide_objects_for(&self, n: u32) {
        self.hidden_fetches.store(n, Ordering::SeqCst);
    }

    pub fn put_public(&self, url: &str, bytes: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(url.to_string(), bytes.into());
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn upload_count(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> std::result::Result<(), StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 503,
                body: "storage unavailable".into(),
            });
        }
        let url = self.public_url(bucket, path);
        self.objects.lock().unwrap().insert(url, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.public_base, bucket, path)
    }

    async fn fetch_public_object(
        &self,
        url: &str,
    ) -> std::result::Result<FetchedObject, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang_fetches.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let hidden = self
            .hidden_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let found = self.objects.lock().unwrap().get(url).cloned();
        Ok(match found {
            Some(bytes) if !hidden => FetchedObject { status: 200, bytes },
            _ => FetchedObject {
                status: 404,
                bytes: Bytes::from_static(b"{\"error\":\"not_found\"}"),
            },
        })
    }
}

/// Capture device that "records" a fixed buffer.
pub struct FakeCapture {
    samples: Vec<i16>,
    deny: bool,
    opened: AtomicU32,
}

impl FakeCapture {
    pub fn with_samples(samples: Vec<i16>) -> Self {
        Self {
            samples,
            deny: false,
            opened: AtomicU32::new(0),
        }
    }

    /// Behaves like a denied microphone permission.
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::with_samples(Vec::new())
        }
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeCapture {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(MediaError::ResourceUnavailable("microphone permission denied".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCaptureStream(CapturedAudio {
            samples: self.samples.clone(),
            sample_rate,
            channels,
        })))
    }
}

struct FakeCaptureStream(CapturedAudio);

impl CaptureStream for FakeCaptureStream {
    fn finish(self: Box<Self>) -> Result<CapturedAudio> {
        Ok(self.0)
    }
}

/// Output device whose progress is driven by the test.
#[derive(Default)]
pub struct FakeOutput {
    fail: bool,
    starts: AtomicU32,
    cursor: Mutex<Option<Arc<AtomicUsize>>>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start fails, as an unusable output route would.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Mark the current stream as having consumed everything.
    pub fn advance_to_end(&self) {
        if let Some(cursor) = self.cursor.lock().unwrap().as_ref() {
            cursor.store(usize::MAX, Ordering::SeqCst);
        }
    }

    pub fn fail_stream(&self, message: &str) {
        *self.stream_error.lock().unwrap() = Some(message.to_string());
    }
}

impl OutputBackend for FakeOutput {
    fn start(
        &self,
        _audio: Arc<DecodedAudio>,
        cursor: Arc<AtomicUsize>,
    ) -> Result<Box<dyn PlaybackSink>> {
        if self.fail {
            return Err(MediaError::Stream("no output route".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.cursor.lock().unwrap() = Some(cursor);
        *self.stream_error.lock().unwrap() = None;
        Ok(Box::new(FakeSink {
            error: self.stream_error.clone(),
        }))
    }
}

struct FakeSink {
    error: Arc<Mutex<Option<String>>>,
}

impl PlaybackSink for FakeSink {
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }
}
