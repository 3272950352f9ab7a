//! Optimistic message sending.
//!
//! A message is shown as pending before the insert call starts. A failed
//! insert leaves it in the view flagged as failed; nothing is retried until
//! the user asks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use parlay_media::MediaAsset;
use parlay_store::{CorrelationKey, FailureReason, PendingMessage};

use crate::backend::{MessageBackend, NewMessage};
use crate::error::{ClientError, Result};
use crate::shared::SharedConversation;
use crate::sync::SyncHandle;

#[derive(Clone)]
pub struct OptimisticSender {
    conversation: SharedConversation,
    backend: Arc<dyn MessageBackend>,
    sync: SyncHandle,
    request_timeout: Duration,
}

impl OptimisticSender {
    pub fn new(
        conversation: SharedConversation,
        backend: Arc<dyn MessageBackend>,
        sync: SyncHandle,
        request_timeout: Duration,
    ) -> Self {
        Self {
            conversation,
            backend,
            sync,
            request_timeout,
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<CorrelationKey> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let pending = PendingMessage::new(
            self.conversation.local_user().clone(),
            self.conversation.peer().clone(),
            Some(text),
            None,
        );
        self.deliver(pending).await
    }

    /// Send an attachment that has finished uploading, with an optional
    /// caption.
    pub async fn send_media(
        &self,
        asset: &MediaAsset,
        caption: Option<String>,
    ) -> Result<CorrelationKey> {
        let media = asset.media_ref().ok_or(ClientError::MediaNotUploaded)?;
        let caption = caption.filter(|c| !c.trim().is_empty());
        let pending = PendingMessage::new(
            self.conversation.local_user().clone(),
            self.conversation.peer().clone(),
            caption,
            Some(media),
        );
        self.deliver(pending).await
    }

    /// Re-send a failed message under a fresh timestamp.
    pub async fn resend(&self, key: &CorrelationKey) -> Result<CorrelationKey> {
        let failed = self.conversation.update(|store| store.retry(key)).await?;
        debug!(key = %key, "Re-sending failed message");
        self.deliver(failed.restamped()).await
    }

    async fn deliver(&self, pending: PendingMessage) -> Result<CorrelationKey> {
        let key = pending.key.clone();
        let message = NewMessage::from_pending(&pending);
        self.conversation
            .update(|store| store.add_pending(pending))
            .await?;

        let reason = match timeout(self.request_timeout, self.backend.insert_message(message)).await
        {
            Ok(Ok(receipt)) => {
                let still_pending = self.conversation.update(|store| store.mark_sent(&key)).await;
                info!(key = %key, id = %receipt.id, still_pending, "Message sent");
                self.sync.poll_now();
                return Ok(key);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => ClientError::Timeout.to_string(),
        };

        warn!(key = %key, %reason, "Message insert failed");
        if let Err(e) = self
            .conversation
            .update(|store| store.mark_failed(&key, FailureReason::Rejected(reason.clone())))
            .await
        {
            debug!(key = %key, error = %e, "Failed message already gone");
        }
        Err(ClientError::SendFailed(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::notify::LogNotifier;
    use crate::sync::{SyncConfig, SyncScheduler};
    use parlay_media::testing::MemoryStorage;
    use parlay_media::{MediaUploader, UploadConfig};
    use parlay_shared::{MediaKind, UserId};
    use parlay_store::{DeliveryStatus, MessageStore, PendingState, ViewEntry};

    struct Rig {
        conversation: SharedConversation,
        backend: Arc<MemoryBackend>,
        sync: SyncScheduler,
        sender: OptimisticSender,
    }

    fn rig() -> Rig {
        let conversation =
            SharedConversation::new(MessageStore::new(UserId::new("me"), UserId::new("peer")));
        let backend = Arc::new(MemoryBackend::new());
        let sync = SyncScheduler::new(
            conversation.clone(),
            backend.clone(),
            Arc::new(LogNotifier),
            SyncConfig::default(),
        );
        let sender = OptimisticSender::new(
            conversation.clone(),
            backend.clone(),
            sync.handle(),
            Duration::from_secs(1),
        );
        Rig {
            conversation,
            backend,
            sync,
            sender,
        }
    }

    #[tokio::test]
    async fn test_send_shows_pending_then_sent() {
        let rig = rig();
        let key = rig.sender.send_text("hello").await.unwrap();

        let pending = rig
            .conversation
            .read(|s| s.find_pending(&key).cloned())
            .await
            .unwrap();
        assert_eq!(pending.state, PendingState::Sent);
        assert_eq!(rig.backend.insert_count(), 1);

        rig.sync.poll_once().await.unwrap();
        let view = rig.conversation.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries[0].status(), DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failed_insert_stays_visible() {
        let rig = rig();
        rig.backend.fail_inserts(true);

        let err = rig.sender.send_text("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::SendFailed(_)));

        let view = rig.conversation.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries[0].status(), DeliveryStatus::Failed);
        assert_eq!(rig.backend.insert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_timeout_marks_failed() {
        struct HangingBackend;

        #[async_trait::async_trait]
        impl MessageBackend for HangingBackend {
            async fn insert_message(
                &self,
                _message: NewMessage,
            ) -> Result<crate::backend::InsertReceipt> {
                std::future::pending().await
            }

            async fn fetch_conversation(
                &self,
                _a: &UserId,
                _b: &UserId,
            ) -> Result<Vec<parlay_store::Message>> {
                Ok(Vec::new())
            }
        }

        let rig = rig();
        let sender = OptimisticSender::new(
            rig.conversation.clone(),
            Arc::new(HangingBackend),
            rig.sync.handle(),
            Duration::from_secs(15),
        );
        assert!(matches!(
            sender.send_text("hello").await,
            Err(ClientError::SendFailed(_))
        ));
        assert_eq!(rig.conversation.view().entries[0].status(), DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_resend_after_failure() {
        let rig = rig();
        rig.backend.fail_inserts(true);
        let failed = rig.sender.send_text("hello").await.unwrap_err();
        assert!(matches!(failed, ClientError::SendFailed(_)));
        let old_key = match &rig.conversation.view().entries[0] {
            ViewEntry::Pending(p) => p.key.clone(),
            other => panic!("unexpected entry {other:?}"),
        };

        rig.backend.fail_inserts(false);
        let new_key = rig.sender.resend(&old_key).await.unwrap();
        assert_ne!(new_key, old_key);

        rig.sync.poll_once().await.unwrap();
        let view = rig.conversation.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries[0].status(), DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_resend_requires_failed_entry() {
        let rig = rig();
        let key = rig.sender.send_text("hello").await.unwrap();
        assert!(matches!(
            rig.sender.resend(&key).await,
            Err(ClientError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let rig = rig();
        assert!(matches!(
            rig.sender.send_text("   ").await,
            Err(ClientError::EmptyMessage)
        ));
        assert!(rig.conversation.view().is_empty());
    }

    #[tokio::test]
    async fn test_media_must_be_uploaded() {
        let rig = rig();
        let asset = MediaAsset::from_file(MediaKind::Image, "/tmp/not-uploaded.jpg");
        assert!(matches!(
            rig.sender.send_media(&asset, None).await,
            Err(ClientError::MediaNotUploaded)
        ));
        assert_eq!(rig.backend.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_send_uploaded_media() {
        let rig = rig();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, vec![1u8; 1024]).unwrap();

        let storage = Arc::new(MemoryStorage::new("https://cdn.test/public"));
        let uploader = MediaUploader::new(
            storage,
            UploadConfig {
                verify_delay: Duration::ZERO,
                ..UploadConfig::default()
            },
        );
        let mut asset = MediaAsset::from_file(MediaKind::Image, &path);
        uploader.upload(&mut asset).await.unwrap();

        rig.sender.send_media(&asset, None).await.unwrap();
        let row = &rig.backend.rows()[0];
        assert_eq!(row.media.as_ref().unwrap().kind, MediaKind::Image);
        assert!(row.text.is_none());
    }
}
