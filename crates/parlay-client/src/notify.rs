//! Hook for surfacing peer messages outside the conversation view.

use tracing::info;

use parlay_shared::ConversationId;

/// Told once about every newly confirmed message the local user did not
/// author.
pub trait NotificationBridge: Send + Sync {
    fn on_peer_message(&self, conversation_id: &ConversationId, preview: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationBridge for LogNotifier {
    fn on_peer_message(&self, conversation_id: &ConversationId, preview: &str) {
        info!(conversation = %conversation_id, %preview, "New message");
    }
}

/// Keeps every notification in memory.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<(ConversationId, String)>>,
}

#[cfg(any(test, feature = "testing"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(ConversationId, String)> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(any(test, feature = "testing"))]
impl NotificationBridge for RecordingNotifier {
    fn on_peer_message(&self, conversation_id: &ConversationId, preview: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((conversation_id.clone(), preview.to_string()));
    }
}
