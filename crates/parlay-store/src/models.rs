//! Domain model structs for a direct-message conversation.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the presentation layer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use parlay_shared::{MediaKind, MediaRef, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message the backend has confirmed. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Text body, absent for pure media messages.
    pub text: Option<String>,
    /// Attachment, if any.
    pub media: Option<MediaRef>,
    /// Server creation time.
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    pub fn content(&self) -> MessageContent {
        MessageContent::of(self.text.as_deref(), self.media.as_ref())
    }

    /// Short preview used for notifications.
    pub fn preview(&self) -> String {
        self.content().preview()
    }

    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// What a message carries, for the purpose of matching an optimistic entry
/// to its confirmed row. Media takes precedence over any caption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum MessageContent {
    Text(String),
    Media(MediaKind),
}

impl MessageContent {
    pub fn of(text: Option<&str>, media: Option<&MediaRef>) -> Self {
        match media {
            Some(m) => Self::Media(m.kind),
            None => Self::Text(text.unwrap_or_default().to_string()),
        }
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Media(kind) => kind.preview_label().to_string(),
        }
    }
}

/// Identifies an optimistic message and the confirmed row it should match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: MessageContent,
    /// Client clock at the moment the user hit send.
    pub client_ts: DateTime<Utc>,
}

impl CorrelationKey {
    /// Whether `message` is the confirmed counterpart of this key, allowing
    /// `tolerance` of drift between client and server clocks.
    pub fn matches(&self, message: &Message, tolerance: Duration) -> bool {
        message.sender_id == self.sender_id
            && message.receiver_id == self.receiver_id
            && message.content() == self.content
            && self.distance(message) <= tolerance
    }

    pub fn distance(&self, message: &Message) -> Duration {
        let delta = message.created_at - self.client_ts;
        if delta < Duration::zero() {
            -delta
        } else {
            delta
        }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}@{}",
            self.sender_id.short(),
            self.receiver_id.short(),
            self.client_ts.timestamp_micros()
        )
    }
}

// ---------------------------------------------------------------------------
// PendingMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum FailureReason {
    /// The insert call returned an error.
    Rejected(String),
    /// The insert was acknowledged but the row never showed up in a poll.
    Unconfirmed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            Self::Unconfirmed => f.write_str("never confirmed by the server"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PendingState {
    /// Insert call in flight.
    Sending,
    /// Insert acknowledged, waiting to be observed in a poll.
    Sent,
    Failed(FailureReason),
}

/// A locally created message shown before the server confirms it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMessage {
    pub key: CorrelationKey,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub state: PendingState,
}

impl PendingMessage {
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        media: Option<MediaRef>,
    ) -> Self {
        Self::at(sender_id, receiver_id, text, media, Utc::now())
    }

    /// Build an entry stamped with an explicit client time.
    pub fn at(
        sender_id: UserId,
        receiver_id: UserId,
        text: Option<String>,
        media: Option<MediaRef>,
        client_ts: DateTime<Utc>,
    ) -> Self {
        let content = MessageContent::of(text.as_deref(), media.as_ref());
        Self {
            key: CorrelationKey {
                sender_id,
                receiver_id,
                content,
                client_ts,
            },
            text,
            media,
            state: PendingState::Sending,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, PendingState::Failed(_))
    }

    /// A copy of this entry with a fresh client timestamp, used when the user
    /// re-sends a failed message.
    pub fn restamped(&self) -> Self {
        Self::new(
            self.key.sender_id.clone(),
            self.key.receiver_id.clone(),
            self.text.clone(),
            self.media.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Conversation view
// ---------------------------------------------------------------------------

/// What the UI shows next to a message bubble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Sending,
    Failed,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViewEntry {
    Confirmed(Message),
    Pending(PendingMessage),
}

impl ViewEntry {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Confirmed(m) => m.created_at,
            Self::Pending(p) => p.key.client_ts,
        }
    }

    pub fn sender_id(&self) -> &UserId {
        match self {
            Self::Confirmed(m) => &m.sender_id,
            Self::Pending(p) => &p.key.sender_id,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Confirmed(m) => m.text.as_deref(),
            Self::Pending(p) => p.text.as_deref(),
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::Confirmed(m) => m.media.as_ref(),
            Self::Pending(p) => p.media.as_ref(),
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Confirmed(_) => DeliveryStatus::Delivered,
            Self::Pending(p) if p.is_failed() => DeliveryStatus::Failed,
            Self::Pending(_) => DeliveryStatus::Sending,
        }
    }
}

/// A consistent snapshot of one conversation, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationView {
    pub entries: Vec<ViewEntry>,
}

impl ConversationView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ViewEntry> {
        self.entries.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ViewEntry::Pending(_)))
            .count()
    }
}
