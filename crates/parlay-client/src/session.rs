//! One open conversation: the shared store, its poller and its sender.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use parlay_media::{MediaAsset, MediaUploader};
use parlay_shared::{ConversationId, UserId};
use parlay_store::{ConversationView, CorrelationKey, MessageStore, ReconcileOutcome};

use crate::backend::MessageBackend;
use crate::error::Result;
use crate::notify::NotificationBridge;
use crate::sender::OptimisticSender;
use crate::shared::SharedConversation;
use crate::sync::{SyncConfig, SyncScheduler, SyncStats};

pub struct ConversationSession {
    conversation: SharedConversation,
    sync: SyncScheduler,
    sender: OptimisticSender,
}

impl ConversationSession {
    pub fn new(
        local_user: UserId,
        peer: UserId,
        backend: Arc<dyn MessageBackend>,
        notifier: Arc<dyn NotificationBridge>,
        config: &SyncConfig,
        request_timeout: Duration,
    ) -> Self {
        let conversation = SharedConversation::new(MessageStore::new(local_user, peer));
        let sync = SyncScheduler::new(
            conversation.clone(),
            backend.clone(),
            notifier,
            config.clone(),
        );
        let sender =
            OptimisticSender::new(conversation.clone(), backend, sync.handle(), request_timeout);
        Self {
            conversation,
            sync,
            sender,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation.conversation_id()
    }

    pub fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    /// Begin polling. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        info!(conversation = %self.conversation_id(), "Opening conversation");
        self.sync.start();
    }

    pub fn stop(&mut self) {
        self.sync.stop();
    }

    pub fn is_running(&self) -> bool {
        self.sync.is_running()
    }

    pub fn sender(&self) -> &OptimisticSender {
        &self.sender
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.conversation.subscribe()
    }

    pub fn view(&self) -> ConversationView {
        self.conversation.view()
    }

    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn poll_now(&self) -> bool {
        self.sync.poll_now()
    }

    /// Run one poll on the caller's task, outside the schedule.
    pub async fn poll_once(&self) -> Result<ReconcileOutcome> {
        self.sync.poll_once().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<CorrelationKey> {
        self.sender.send_text(text).await
    }

    /// Upload `asset` and send it. Nothing reaches the conversation if the
    /// upload fails.
    pub async fn send_attachment(
        &self,
        uploader: &MediaUploader,
        asset: &mut MediaAsset,
        caption: Option<String>,
    ) -> Result<CorrelationKey> {
        let receipt = uploader.upload(asset).await?;
        info!(url = %receipt.url, verified = receipt.verified, "Attachment uploaded");
        self.sender.send_media(asset, caption).await
    }

    pub async fn resend(&self, key: &CorrelationKey) -> Result<CorrelationKey> {
        self.sender.resend(key).await
    }
}
