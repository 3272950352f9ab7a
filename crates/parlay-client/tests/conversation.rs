use std::sync::Arc;
use std::time::Duration;

use parlay_client::{
    ClientError, ConversationSession, MemoryBackend, RecordingNotifier, SyncConfig,
};
use parlay_media::testing::{FakeCapture, FakeOutput, MemoryStorage, ScriptedPlatform};
use parlay_media::{
    AudioHardware, AudioSessionNegotiator, MediaRecorder, MediaSource, MediaUploader,
    PlaybackConfig, PlaybackController, PlaybackState, UploadConfig,
};
use parlay_shared::{MediaKind, UserId};
use parlay_store::{DeliveryStatus, FailureReason, PendingState, ViewEntry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn session(
    local: &str,
    peer: &str,
    backend: &Arc<MemoryBackend>,
    notifier: &Arc<RecordingNotifier>,
    config: &SyncConfig,
) -> ConversationSession {
    ConversationSession::new(
        UserId::new(local),
        UserId::new(peer),
        backend.clone(),
        notifier.clone(),
        config,
        REQUEST_TIMEOUT,
    )
}

fn quiet_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_secs(3600),
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn test_hello_reaches_peer_once_and_renders_once() {
    let backend = Arc::new(MemoryBackend::new());
    let alice_notes = Arc::new(RecordingNotifier::new());
    let bob_notes = Arc::new(RecordingNotifier::new());
    let config = quiet_config();
    let alice = session("alice", "bob", &backend, &alice_notes, &config);
    let bob = session("bob", "alice", &backend, &bob_notes, &config);

    // both sides have seen the (empty) history
    assert_eq!(poll(&alice).await, 0);
    assert_eq!(poll(&bob).await, 0);

    let mut alice_view = alice.subscribe();
    alice.send_text("hello").await.unwrap();
    assert!(alice_view.has_changed().unwrap());
    assert_eq!(alice_view.borrow_and_update().len(), 1);

    assert_eq!(poll(&bob).await, 1);
    assert_eq!(bob_notes.notifications().len(), 1);
    assert_eq!(bob_notes.notifications()[0].1, "hello");
    assert_eq!(bob_notes.notifications()[0].0, bob.conversation_id());

    for _ in 0..3 {
        assert_eq!(poll(&bob).await, 0);
        poll(&alice).await;
    }

    let view = alice.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view.pending_count(), 0);
    assert_eq!(view.entries[0].status(), DeliveryStatus::Delivered);
    assert!(alice_notes.notifications().is_empty());

    assert_eq!(bob.view().len(), 1);
    assert_eq!(bob_notes.notifications().len(), 1);
    assert_eq!(alice.conversation_id(), bob.conversation_id());
}

/// Poll once and return how many messages were new.
async fn poll(session: &ConversationSession) -> usize {
    session.poll_once().await.unwrap().new_messages.len()
}

#[tokio::test]
async fn test_failed_send_is_visible_and_retryable() {
    let backend = Arc::new(MemoryBackend::new());
    let notes = Arc::new(RecordingNotifier::new());
    let alice = session("alice", "bob", &backend, &notes, &quiet_config());

    backend.fail_inserts(true);
    let err = alice.send_text("are you in?").await.unwrap_err();
    assert!(matches!(err, ClientError::SendFailed(_)));

    let key = match &alice.view().entries[..] {
        [ViewEntry::Pending(p)] => {
            assert!(matches!(
                p.state,
                PendingState::Failed(FailureReason::Rejected(_))
            ));
            p.key.clone()
        }
        other => panic!("unexpected view {other:?}"),
    };

    // failures are never retried on their own
    alice.poll_once().await.unwrap();
    assert_eq!(backend.insert_count(), 1);
    assert_eq!(alice.view().entries[0].status(), DeliveryStatus::Failed);

    backend.fail_inserts(false);
    alice.resend(&key).await.unwrap();
    alice.poll_once().await.unwrap();

    let view = alice.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view.entries[0].status(), DeliveryStatus::Delivered);
}

#[tokio::test]
async fn test_acknowledged_but_lost_message_expires() {
    let backend = Arc::new(MemoryBackend::new());
    let notes = Arc::new(RecordingNotifier::new());
    let config = SyncConfig {
        pending_max_polls: 3,
        ..quiet_config()
    };
    let alice = session("alice", "bob", &backend, &notes, &config);

    backend.drop_inserts(true);
    alice.send_text("into the void").await.unwrap();
    assert_eq!(alice.view().entries[0].status(), DeliveryStatus::Sending);

    for _ in 0..2 {
        alice.poll_once().await.unwrap();
    }
    assert_eq!(alice.view().entries[0].status(), DeliveryStatus::Sending);

    alice.poll_once().await.unwrap();
    match &alice.view().entries[0] {
        ViewEntry::Pending(p) => {
            assert_eq!(p.state, PendingState::Failed(FailureReason::Unconfirmed))
        }
        other => panic!("unexpected entry {other:?}"),
    }
    assert_eq!(alice.stats().expired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_keeps_polling_through_fetch_errors() {
    let backend = Arc::new(MemoryBackend::new());
    let notes = Arc::new(RecordingNotifier::new());
    let config = SyncConfig {
        poll_interval: Duration::from_millis(100),
        fetch_timeout: Duration::from_millis(50),
        ..SyncConfig::default()
    };
    let mut bob = session("bob", "alice", &backend, &notes, &config);

    backend.fail_fetches(true);
    bob.start();
    assert!(bob.is_running());
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(bob.stats().failed >= 3);
    assert_eq!(bob.stats().completed, 0);

    backend.hang_fetches(true);
    backend.fail_fetches(false);
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(bob.is_running());

    backend.hang_fetches(false);
    backend.push_row("alice", "bob", "still there?");
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(bob.stats().completed >= 1);
    assert_eq!(bob.view().len(), 1);

    bob.stop();
    assert!(!bob.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_successful_send_triggers_immediate_poll() {
    let backend = Arc::new(MemoryBackend::new());
    let notes = Arc::new(RecordingNotifier::new());
    let mut alice = session("alice", "bob", &backend, &notes, &quiet_config());

    alice.start();
    // let the initial poll run
    tokio::time::sleep(Duration::from_millis(10)).await;
    let polls = alice.stats().completed;

    alice.send_text("ping").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(alice.stats().completed, polls + 1);
    assert_eq!(alice.view().entries[0].status(), DeliveryStatus::Delivered);
    alice.stop();
}

#[tokio::test]
async fn test_voice_message_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let alice_notes = Arc::new(RecordingNotifier::new());
    let bob_notes = Arc::new(RecordingNotifier::new());
    let alice = session("alice", "bob", &backend, &alice_notes, &quiet_config());
    let bob = session("bob", "alice", &backend, &bob_notes, &quiet_config());
    bob.poll_once().await.unwrap();

    let storage = Arc::new(MemoryStorage::new("https://cdn.test/public"));
    let uploader = MediaUploader::new(
        storage.clone(),
        UploadConfig {
            verify_delay: Duration::ZERO,
            ..UploadConfig::default()
        },
    );

    // Alice records and sends one second of audio.
    let alice_hw = AudioHardware::new();
    let negotiator = Arc::new(AudioSessionNegotiator::new(
        alice_hw.clone(),
        Arc::new(ScriptedPlatform::accepting(&["record", "playback"])),
    ));
    let capture = Arc::new(FakeCapture::with_samples(vec![1_000; 8_000]));
    let mut recorder = MediaRecorder::new(negotiator, capture).with_format(8_000, 1);
    recorder.start().unwrap();
    let mut clip = recorder.stop().unwrap();
    assert!(alice_hw.is_free());

    alice
        .send_attachment(&uploader, &mut clip, None)
        .await
        .unwrap();
    assert!(clip.local_path().is_none());

    bob.poll_once().await.unwrap();
    assert_eq!(bob_notes.notifications()[0].1, MediaKind::Audio.preview_label());

    let media = match &bob.view().entries[..] {
        [ViewEntry::Confirmed(m)] => m.media.clone().unwrap(),
        other => panic!("unexpected view {other:?}"),
    };
    assert_eq!(media.kind, MediaKind::Audio);

    // Bob plays it back from storage.
    let bob_hw = AudioHardware::new();
    let output = Arc::new(FakeOutput::new());
    let mut player = PlaybackController::new(
        Arc::new(AudioSessionNegotiator::new(
            bob_hw.clone(),
            Arc::new(ScriptedPlatform::accepting(&["playback"])),
        )),
        output.clone(),
        storage,
        PlaybackConfig {
            download_timeout: Duration::from_secs(1),
            progress_interval: Duration::from_millis(5),
        },
    );
    let duration = player
        .load(MediaSource::Remote {
            url: media.url,
            original: None,
        })
        .await
        .unwrap();
    assert_eq!(duration, Duration::from_secs(1));

    let mut status = player.subscribe();
    player.play().unwrap();
    output.advance_to_end();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == PlaybackState::Finished),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(bob_hw.is_free());
}

#[tokio::test]
async fn test_failed_upload_sends_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let notes = Arc::new(RecordingNotifier::new());
    let alice = session("alice", "bob", &backend, &notes, &quiet_config());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, vec![7u8; 2048]).unwrap();

    let storage = Arc::new(MemoryStorage::new("https://cdn.test/public"));
    storage.fail_uploads(true);
    let uploader = MediaUploader::new(storage, UploadConfig::default());

    let mut photo = parlay_media::MediaAsset::from_file(MediaKind::Image, &path);
    let err = alice
        .send_attachment(&uploader, &mut photo, Some("look".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Media(_)));
    assert!(alice.view().is_empty());
    assert_eq!(backend.insert_count(), 0);
    // the local file is kept for a retry
    assert!(photo.local_path().is_some());
}
