//! Interactive conversation loop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use parlay_client::{ClientConfig, ConversationSession};
use parlay_media::{
    AudioHardware, AudioSessionNegotiator, CpalCapture, CpalOutput, CpalSessionPlatform,
    MediaAsset, MediaRecorder, MediaSource, MediaUploader, ObjectStorage, PlaybackConfig,
    PlaybackController,
};
use parlay_shared::{ChatError, MediaKind};
use parlay_store::ViewEntry;

use crate::render;

const HELP: &str = "\
commands:
  <text>          send a message
  /record         start recording, run again to stop and send
  /cancel         discard the current recording
  /attach <path>  send a WAV or image file
  /play <n>       play the voice message on line n
  /pause, /stop   control playback
  /retry          re-send every failed message
  /refresh        poll the server now
  /quit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Text(String),
    Record,
    Cancel,
    Attach(PathBuf),
    Play(usize),
    Pause,
    Stop,
    Retry,
    Refresh,
    Help,
    Quit,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Text(line.to_string());
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match (name, arg) {
            ("record", "") => Self::Record,
            ("cancel", "") => Self::Cancel,
            ("attach", path) if !path.is_empty() => Self::Attach(PathBuf::from(path)),
            ("play", n) => match n.parse() {
                Ok(n) => Self::Play(n),
                Err(_) => Self::Unknown(line.to_string()),
            },
            ("pause", "") => Self::Pause,
            ("stop", "") => Self::Stop,
            ("retry", "") => Self::Retry,
            ("refresh", "") => Self::Refresh,
            ("help", "") => Self::Help,
            ("quit", "") | ("q", "") => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn show(error: impl Into<ChatError>) {
    let error = error.into();
    if error.is_user_visible() {
        eprintln!("! {error}");
    } else {
        debug!(%error, "Not shown");
    }
}

fn report<T, E: Into<ChatError>>(result: Result<T, E>) {
    if let Err(e) = result {
        show(e);
    }
}

pub async fn run(
    mut session: ConversationSession,
    storage: Arc<dyn ObjectStorage>,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let negotiator = Arc::new(AudioSessionNegotiator::new(
        AudioHardware::new(),
        Arc::new(CpalSessionPlatform),
    ));
    let mut recorder = MediaRecorder::new(negotiator.clone(), Arc::new(CpalCapture));
    let mut player = PlaybackController::new(
        negotiator,
        Arc::new(CpalOutput),
        storage.clone(),
        PlaybackConfig::default(),
    );
    let uploader = MediaUploader::new(storage, config.upload_config());

    let local = session.conversation().local_user().clone();
    let printer = tokio::spawn(render::follow(session.subscribe(), local));
    session.start();
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Text(text) => report(session.send_text(text).await),
            Input::Record if recorder.is_recording() => match recorder.stop() {
                Ok(mut clip) => {
                    report(session.send_attachment(&uploader, &mut clip, None).await)
                }
                Err(e) => show(e),
            },
            Input::Record => match recorder.start() {
                Ok(_) => println!("recording, /record again to send"),
                Err(e) => show(e),
            },
            Input::Cancel => recorder.cancel(),
            Input::Attach(path) => {
                let mut asset = MediaAsset::from_file(crate::kind_for_path(&path), path);
                report(session.send_attachment(&uploader, &mut asset, None).await)
            }
            Input::Play(n) => {
                let view = session.view();
                match view.entries.get(n).and_then(ViewEntry::media) {
                    Some(media) if media.kind == MediaKind::Audio => {
                        let source = MediaSource::Remote {
                            url: media.url.clone(),
                            original: None,
                        };
                        match player.load(source).await {
                            Ok(duration) => {
                                debug!(duration_ms = duration.as_millis() as u64, "Playing");
                                report(player.play());
                            }
                            Err(e) => show(e),
                        }
                    }
                    _ => eprintln!("! no voice message on line {n}"),
                }
            }
            Input::Pause => report(player.pause()),
            Input::Stop => player.stop(),
            Input::Retry => {
                let failed: Vec<_> = session
                    .view()
                    .iter()
                    .filter_map(|entry| match entry {
                        ViewEntry::Pending(p) if p.is_failed() => Some(p.key.clone()),
                        _ => None,
                    })
                    .collect();
                if failed.is_empty() {
                    println!("nothing to retry");
                }
                for key in failed {
                    report(session.resend(&key).await);
                }
            }
            Input::Refresh => {
                if !session.poll_now() {
                    warn!("Sync scheduler is not running");
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(line) => eprintln!("! unknown command {line:?}, try /help"),
        }
    }

    recorder.cancel();
    player.stop();
    session.stop();
    printer.abort();
    Ok(())
}
