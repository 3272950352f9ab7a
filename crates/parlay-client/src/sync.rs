//! Periodic conversation polling.
//!
//! The poll loop runs in a dedicated tokio task driven by an interval and
//! an mpsc command channel. Every poll, scheduled or not, holds the poll
//! gate from fetch to reconcile, so snapshots are applied in fetch order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use parlay_shared::constants::{
    DEFAULT_PENDING_MAX_POLLS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use parlay_shared::ChatError;
use parlay_store::ReconcileOutcome;

use crate::backend::MessageBackend;
use crate::error::{ClientError, Result};
use crate::notify::NotificationBridge;
use crate::shared::SharedConversation;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub pending_max_polls: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            pending_max_polls: DEFAULT_PENDING_MAX_POLLS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Polls whose snapshot was reconciled.
    pub completed: u64,
    /// Polls whose fetch failed or timed out.
    pub failed: u64,
    /// Pending messages declared lost.
    pub expired: u64,
    /// Peer messages handed to the notification bridge.
    pub notified: u64,
}

/// Commands sent into the poll task.
#[derive(Debug)]
enum SyncCommand {
    PollNow,
    Shutdown,
}

type CommandSlot = Arc<Mutex<Option<mpsc::Sender<SyncCommand>>>>;

/// Requests out-of-band polls from whichever poll task is running.
#[derive(Clone)]
pub struct SyncHandle {
    slot: CommandSlot,
}

impl SyncHandle {
    /// Ask for an immediate poll. Requests made while one is already queued
    /// collapse into it. Returns `false` when the scheduler is not running.
    pub fn poll_now(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(tx) => match tx.try_send(SyncCommand::PollNow) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Poll already queued");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }
}

/// Everything one poll needs; cloned into the task.
#[derive(Clone)]
struct Poller {
    conversation: SharedConversation,
    backend: Arc<dyn MessageBackend>,
    notifier: Arc<dyn NotificationBridge>,
    config: SyncConfig,
    stats: Arc<Mutex<SyncStats>>,
    gate: Arc<AsyncMutex<()>>,
}

impl Poller {
    async fn poll_once(&self) -> Result<ReconcileOutcome> {
        let _gate = self.gate.lock().await;
        let local = self.conversation.local_user().clone();
        let peer = self.conversation.peer().clone();

        let snapshot = match timeout(
            self.config.fetch_timeout,
            self.backend.fetch_conversation(&local, &peer),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Err(self.record_failure(e)),
            Err(_) => return Err(self.record_failure(ClientError::Timeout)),
        };

        let max_polls = self.config.pending_max_polls;
        let (outcome, expired) = self
            .conversation
            .update(|store| {
                let outcome = store.reconcile(snapshot);
                let expired = store.expire_unconfirmed(max_polls);
                (outcome, expired)
            })
            .await;

        let conversation_id = self.conversation.conversation_id();
        let mut notified = 0;
        for message in outcome.new_messages.iter().filter(|m| m.sender_id != local) {
            self.notifier
                .on_peer_message(&conversation_id, &message.preview());
            notified += 1;
        }

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.completed += 1;
        stats.expired += expired.len() as u64;
        stats.notified += notified;
        Ok(outcome)
    }

    fn record_failure(&self, e: ClientError) -> ClientError {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).failed += 1;
        let transient = ChatError::TransientNetwork(e.to_string());
        warn!(error = %transient, "Conversation poll failed");
        e
    }
}

struct Running {
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    poller: Poller,
    slot: CommandSlot,
    running: Option<Running>,
}

impl SyncScheduler {
    pub fn new(
        conversation: SharedConversation,
        backend: Arc<dyn MessageBackend>,
        notifier: Arc<dyn NotificationBridge>,
        config: SyncConfig,
    ) -> Self {
        Self {
            poller: Poller {
                conversation,
                backend,
                notifier,
                config,
                stats: Arc::new(Mutex::new(SyncStats::default())),
                gate: Arc::new(AsyncMutex::new(())),
            },
            slot: Arc::new(Mutex::new(None)),
            running: None,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            slot: self.slot.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the poll task. The first poll happens immediately. Calling
    /// `start` on a running scheduler does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        // capacity 1 so queued PollNow requests coalesce
        let (tx, rx) = mpsc::channel(1);
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let poller = self.poller.clone();
        let handle = tokio::spawn(run(poller, rx));
        info!(
            conversation = %self.poller.conversation.conversation_id(),
            interval_ms = self.poller.config.poll_interval.as_millis() as u64,
            "Sync scheduler started"
        );
        self.running = Some(Running { handle });
    }

    /// Cancel the poll task. Safe to call when not running.
    pub fn stop(&mut self) {
        let tx = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.try_send(SyncCommand::Shutdown);
        }
        if let Some(running) = self.running.take() {
            running.handle.abort();
            info!("Sync scheduler stopped");
        }
    }

    pub fn poll_now(&self) -> bool {
        self.handle().poll_now()
    }

    /// Run one poll on the caller's task, outside the schedule. Waits for a
    /// scheduled poll already in flight.
    pub async fn poll_once(&self) -> Result<ReconcileOutcome> {
        self.poller.poll_once().await
    }

    pub fn stats(&self) -> SyncStats {
        *self.poller.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(poller: Poller, mut rx: mpsc::Receiver<SyncCommand>) {
    let mut ticker = interval(poller.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            cmd = rx.recv() => match cmd {
                Some(SyncCommand::PollNow) => debug!("Out-of-band poll requested"),
                Some(SyncCommand::Shutdown) | None => {
                    debug!("Poll task shutting down");
                    break;
                }
            },
        }

        // errors are counted and logged inside; the next tick proceeds as usual
        let _ = poller.poll_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parlay_shared::UserId;
    use parlay_store::{Message, MessageStore};

    use crate::backend::{InsertReceipt, NewMessage};
    use crate::memory::MemoryBackend;
    use crate::notify::RecordingNotifier;

    /// Holds its second fetch after reading rows, so that fetch returns a
    /// snapshot older than any taken while it waits.
    struct StaleSecondFetch {
        inner: MemoryBackend,
        calls: AtomicU32,
        inflight: AtomicU32,
        max_inflight: AtomicU32,
    }

    impl StaleSecondFetch {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                calls: AtomicU32::new(0),
                inflight: AtomicU32::new(0),
                max_inflight: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageBackend for StaleSecondFetch {
        async fn insert_message(&self, message: NewMessage) -> Result<InsertReceipt> {
            self.inner.insert_message(message).await
        }

        async fn fetch_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(now, Ordering::SeqCst);
            let rows = self.inner.fetch_conversation(a, b).await;
            if call == 2 {
                tokio::time::sleep(Duration::from_millis(800)).await;
            }
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            rows
        }
    }

    fn conversation() -> SharedConversation {
        SharedConversation::new(MessageStore::new(UserId::new("me"), UserId::new("peer")))
    }

    fn scheduler(backend: Arc<MemoryBackend>, notifier: Arc<RecordingNotifier>) -> SyncScheduler {
        SyncScheduler::new(
            conversation(),
            backend,
            notifier,
            SyncConfig {
                poll_interval: Duration::from_millis(2_500),
                fetch_timeout: Duration::from_secs(1),
                pending_max_polls: 5,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));
        sync.start();

        tokio::time::sleep(Duration::from_millis(7_600)).await;
        // immediate first poll plus three ticks
        assert_eq!(backend.fetch_count(), 4);
        assert_eq!(sync.stats().completed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));
        sync.start();
        sync.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_polling() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));
        sync.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.stop();
        sync.stop();
        assert!(!sync.is_running());
        assert!(!sync.poll_now());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_now_runs_out_of_band() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));
        sync.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.fetch_count(), 1);

        assert!(sync.poll_now());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_survives_fetch_errors() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_fetches(true);
        let mut sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));
        sync.start();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(sync.stats().failed, 3);
        assert!(sync.is_running());

        backend.fail_fetches(false);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(sync.stats().completed, 1);
        assert_eq!(sync.stats().failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_counts_as_failure() {
        let backend = Arc::new(MemoryBackend::new());
        backend.hang_fetches(true);
        let sync = scheduler(backend.clone(), Arc::new(RecordingNotifier::new()));

        let err = sync.poll_once().await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(sync.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifies_only_new_peer_messages() {
        let backend = Arc::new(MemoryBackend::new());
        backend.push_row("peer", "me", "old");
        let notifier = Arc::new(RecordingNotifier::new());
        let sync = scheduler(backend.clone(), notifier.clone());

        // history seeds without notifications
        sync.poll_once().await.unwrap();
        assert!(notifier.notifications().is_empty());

        backend.push_row("me", "peer", "mine");
        backend.push_row("peer", "me", "hey");
        let outcome = sync.poll_once().await.unwrap();
        assert_eq!(outcome.new_messages.len(), 2);

        let seen = notifier.notifications();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_str(), "dm:me:peer");
        assert_eq!(seen[0].1, "hey");

        // same snapshot again
        sync.poll_once().await.unwrap();
        assert_eq!(notifier.notifications().len(), 1);
        assert_eq!(sync.stats().notified, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_poll_waits_for_scheduled_poll() {
        let backend = Arc::new(StaleSecondFetch::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut sync = SyncScheduler::new(
            conversation(),
            backend.clone(),
            notifier.clone(),
            SyncConfig {
                poll_interval: Duration::from_millis(2_500),
                fetch_timeout: Duration::from_secs(1),
                pending_max_polls: 5,
            },
        );

        // seed, then let the scheduled poll take its slow, empty snapshot
        sync.poll_once().await.unwrap();
        sync.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        backend.inner.push_row("peer", "me", "hey");
        let outcome = sync.poll_once().await.unwrap();
        assert_eq!(outcome.new_messages.len(), 1);
        assert_eq!(backend.max_inflight.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(notifier.notifications().len(), 1);
        assert_eq!(sync.stats().notified, 1);
        assert_eq!(backend.max_inflight.load(Ordering::SeqCst), 1);
    }
}
