//! cpal implementations of the session, capture and output seams.
//!
//! cpal streams are not `Send` on every host, so each stream lives on its
//! own thread and is dropped there when the owner asks it to stop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tracing::{debug, error, info, warn};

use crate::codec::DecodedAudio;
use crate::error::{MediaError, Result};
use crate::playback::{OutputBackend, PlaybackSink};
use crate::recorder::{CaptureBackend, CaptureStream, CapturedAudio};
use crate::session::{SessionCategory, SessionConfig, SessionPlatform};

/// Accepts a session configuration when the host has working default
/// devices for its category.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSessionPlatform;

impl SessionPlatform for CpalSessionPlatform {
    fn apply(&self, config: &SessionConfig) -> std::result::Result<(), String> {
        let host = cpal::default_host();
        let needs_output = matches!(
            config.category,
            SessionCategory::Playback | SessionCategory::PlayAndRecord
        );
        let needs_input = matches!(
            config.category,
            SessionCategory::Record | SessionCategory::PlayAndRecord
        );

        if needs_output {
            let device = host.default_output_device().ok_or("no output device")?;
            device
                .default_output_config()
                .map_err(|e| format!("output device unusable: {e}"))?;
        }
        if needs_input {
            let device = host.default_input_device().ok_or("no input device")?;
            device
                .default_input_config()
                .map_err(|e| format!("input device unusable: {e}"))?;
        }
        debug!(config = %config, host = ?host.id(), "Audio session accepted");
        Ok(())
    }
}

fn to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Microphone capture through the default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CaptureBackend for CpalCapture {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CaptureStream>> {
        let samples = Arc::new(Mutex::new(Vec::<i16>::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let sink = samples.clone();
        let thread = std::thread::Builder::new()
            .name("parlay-capture".into())
            .spawn(move || {
                let (stream, format) = match open_input(sample_rate, channels, sink) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(format));
                // returns on stop or when the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture stream closed");
            })?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| MediaError::Stream("capture thread exited".into()))??;

        Ok(Box::new(CpalCaptureStream {
            stop: stop_tx,
            thread: Some(thread),
            samples,
            sample_rate,
            channels,
        }))
    }
}

fn open_input(
    sample_rate: u32,
    channels: u16,
    sink: Arc<Mutex<Vec<i16>>>,
) -> Result<(cpal::Stream, (u32, u16))> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::ResourceUnavailable("no input device".into()))?;
    info!(device = ?device.name(), "Using input device");

    let preferred = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let stream = match build_input::<f32>(&device, &preferred, channels, sink.clone()) {
        Ok(stream) => Some((stream, preferred)),
        Err(e) => {
            debug!(error = %e, "Preferred capture format rejected, using device default");
            None
        }
    };

    let (stream, config) = match stream {
        Some(found) => found,
        None => {
            let default = device
                .default_input_config()
                .map_err(|e| MediaError::ResourceUnavailable(e.to_string()))?;
            let config = default.config();
            let stream = match default.sample_format() {
                cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, channels, sink),
                cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, channels, sink),
                cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, channels, sink),
                other => {
                    return Err(MediaError::ResourceUnavailable(format!(
                        "unsupported input sample format {other:?}"
                    )))
                }
            }
            .map_err(|e| MediaError::ResourceUnavailable(e.to_string()))?;
            (stream, config)
        }
    };

    stream
        .play()
        .map_err(|e| MediaError::ResourceUnavailable(e.to_string()))?;

    let stored_channels = if config.channels == channels { channels } else { 1 };
    Ok((stream, (config.sample_rate.0, stored_channels)))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    wanted_channels: u16,
    sink: Arc<Mutex<Vec<i16>>>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let in_channels = config.channels.max(1) as usize;
    let downmix = config.channels != wanted_channels;

    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let mut buffer = sink.lock().unwrap_or_else(|e| e.into_inner());
            if downmix {
                for frame in data.chunks(in_channels) {
                    let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                    buffer.push(to_i16(sum / frame.len() as f32));
                }
            } else {
                buffer.extend(data.iter().map(|s| to_i16(f32::from_sample(*s))));
            }
        },
        move |err| {
            error!("Audio input error: {err}");
        },
        None,
    )
}

struct CpalCaptureStream {
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
    samples: Arc<Mutex<Vec<i16>>>,
    sample_rate: u32,
    channels: u16,
}

impl CaptureStream for CpalCaptureStream {
    fn finish(mut self: Box<Self>) -> Result<CapturedAudio> {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(MediaError::Stream("capture thread panicked".into()));
            }
        }
        let samples = std::mem::take(&mut *self.samples.lock().unwrap_or_else(|e| e.into_inner()));
        Ok(CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

/// Playback through the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

#[derive(Clone)]
struct OutputShared {
    audio: Arc<DecodedAudio>,
    cursor: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
}

impl OutputBackend for CpalOutput {
    fn start(
        &self,
        audio: Arc<DecodedAudio>,
        cursor: Arc<AtomicUsize>,
    ) -> Result<Box<dyn PlaybackSink>> {
        let shared = OutputShared {
            audio,
            cursor,
            paused: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
        };
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let stream_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("parlay-playback".into())
            .spawn(move || {
                let stream = match open_output(stream_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Output stream closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| MediaError::Stream("playback thread exited".into()))??;

        Ok(Box::new(CpalSink {
            stop: stop_tx,
            thread: Some(thread),
            paused: shared.paused,
            failure: shared.failure,
        }))
    }
}

fn open_output(shared: OutputShared) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| MediaError::ResourceUnavailable("no output device".into()))?;
    info!(device = ?device.name(), "Using output device");

    let native = cpal::StreamConfig {
        channels: shared.audio.channels,
        sample_rate: cpal::SampleRate(shared.audio.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match build_output::<f32>(&device, &native, shared.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(error = %e, "Clip format rejected by output, resampling to device default");
            let default = device
                .default_output_config()
                .map_err(|e| MediaError::Stream(e.to_string()))?;
            let config = default.config();
            match default.sample_format() {
                cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, shared),
                cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, shared),
                cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, shared),
                other => {
                    return Err(MediaError::Stream(format!(
                        "unsupported output sample format {other:?}"
                    )))
                }
            }
            .map_err(|e| MediaError::Stream(e.to_string()))?
        }
    };

    stream.play().map_err(|e| MediaError::Stream(e.to_string()))?;
    Ok(stream)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: OutputShared,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let out_channels = config.channels.max(1) as usize;
    let src_channels = shared.audio.channels.max(1) as usize;
    let step = shared.audio.sample_rate as f64 / config.sample_rate.0.max(1) as f64;
    let mut position = (shared.cursor.load(Ordering::SeqCst) / src_channels) as f64;
    let failure = shared.failure.clone();

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            render(data, out_channels, &shared, &mut position, step);
        },
        move |err| {
            warn!("Audio output error: {err}");
            *failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
        },
        None,
    )
}

/// Fill one output buffer, converting rate and channel layout by nearest
/// sample.
fn render<T>(
    data: &mut [T],
    out_channels: usize,
    shared: &OutputShared,
    position: &mut f64,
    step: f64,
) where
    T: Sample + FromSample<f32>,
{
    if shared.paused.load(Ordering::Relaxed) {
        data.fill(T::EQUILIBRIUM);
        return;
    }

    let audio = &shared.audio;
    let src_channels = audio.channels.max(1) as usize;
    let frames = audio.frames();

    for frame in data.chunks_mut(out_channels) {
        let index = *position as usize;
        if index >= frames {
            frame.fill(T::EQUILIBRIUM);
            continue;
        }
        for (channel, out) in frame.iter_mut().enumerate() {
            let sample = audio.samples[index * src_channels + channel.min(src_channels - 1)];
            *out = T::from_sample(sample);
        }
        *position += step;
    }

    let consumed = (*position as usize).min(frames) * src_channels;
    shared.cursor.store(consumed, Ordering::SeqCst);
}

struct CpalSink {
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
    paused: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
}

impl PlaybackSink for CpalSink {
    fn pause(&mut self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn error(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}
