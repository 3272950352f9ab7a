//! Message and object storage backends.
//!
//! [`RestBackend`] talks to a PostgREST style API for messages and to the
//! storage API that sits next to it for attachments.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parlay_media::storage::public_object_url;
use parlay_media::{FetchedObject, ObjectStorage, StorageError};
use parlay_shared::{MediaKind, MediaRef, MessageId, UserId};
use parlay_store::{Message, PendingMessage};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// A message as submitted for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
}

impl NewMessage {
    pub fn from_pending(pending: &PendingMessage) -> Self {
        Self {
            sender_id: pending.key.sender_id.clone(),
            receiver_id: pending.key.receiver_id.clone(),
            text: pending.text.clone(),
            media: pending.media.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReceipt {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn insert_message(&self, message: NewMessage) -> Result<InsertReceipt>;

    /// Every message between `a` and `b`, oldest first.
    async fn fetch_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>>;
}

// ---------------------------------------------------------------------------
// Wire rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let media = match (self.media_url, self.media_type.as_deref()) {
            (Some(url), Some(kind)) => match MediaKind::parse(kind) {
                Some(kind) => Some(MediaRef { kind, url }),
                None => {
                    warn!(id = %self.id, media_type = kind, "Ignoring unknown media type");
                    None
                }
            },
            _ => None,
        };
        Message {
            id: MessageId::new(self.id),
            sender_id: UserId::new(self.sender_id),
            receiver_id: UserId::new(self.receiver_id),
            text: self.content.filter(|t| !t.is_empty()),
            media,
            created_at: self.created_at,
            read: self.read,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewMessageRow<'a> {
    sender_id: &'a str,
    receiver_id: &'a str,
    content: Option<&'a str>,
    media_url: Option<&'a str>,
    media_type: Option<&'a str>,
}

impl<'a> From<&'a NewMessage> for NewMessageRow<'a> {
    fn from(m: &'a NewMessage) -> Self {
        Self {
            sender_id: m.sender_id.as_str(),
            receiver_id: m.receiver_id.as_str(),
            content: m.text.as_deref(),
            media_url: m.media.as_ref().map(|r| r.url.as_str()),
            media_type: m.media.as_ref().map(|r| r.kind.as_str()),
        }
    }
}

/// PostgREST filter selecting both directions of a two-party conversation.
/// Ids are always double-quoted so reserved characters stay literal.
pub fn conversation_filter(a: &UserId, b: &UserId) -> String {
    format!(
        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))",
        a = quote_value(a.as_str()),
        b = quote_value(b.as_str())
    )
}

fn quote_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

// ---------------------------------------------------------------------------
// REST implementation
// ---------------------------------------------------------------------------

pub struct RestBackend {
    http: reqwest::Client,
    api_url: String,
    upload_timeout: Duration,
}

impl RestBackend {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&config.api_key)?);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            header_value(&format!("Bearer {}", config.bearer_token()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_timeout: config.upload_timeout,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/rest/v1/messages", self.api_url)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.api_url, bucket, path)
    }

    fn public_base(&self) -> String {
        format!("{}/storage/v1/object/public", self.api_url)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::Config(format!("invalid header value: {e}")))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MessageBackend for RestBackend {
    async fn insert_message(&self, message: NewMessage) -> Result<InsertReceipt> {
        let resp = self
            .http
            .post(self.messages_url())
            .header("Prefer", "return=representation")
            .json(&NewMessageRow::from(&message))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        let rows: Vec<MessageRow> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Decode("insert returned no row".into()))?;
        debug!(id = %row.id, "Message inserted");
        Ok(InsertReceipt {
            id: MessageId::new(row.id),
            created_at: row.created_at,
        })
    }

    async fn fetch_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let filter = conversation_filter(a, b);
        let resp = self
            .http
            .get(self.messages_url())
            .query(&[
                ("select", "*"),
                ("or", filter.as_str()),
                ("order", "created_at.asc"),
            ])
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        let rows: Vec<MessageRow> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> std::result::Result<(), StorageError> {
        let size = bytes.len();
        let resp = self
            .http
            .post(self.object_url(bucket, path))
            .timeout(self.upload_timeout)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        check_status(resp).await?;
        debug!(bucket, path, size, "Object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.public_base(), bucket, path)
    }

    async fn fetch_public_object(
        &self,
        url: &str,
    ) -> std::result::Result<FetchedObject, StorageError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(ClientError::from_reqwest)?;
        Ok(FetchedObject { status, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_with_audio() {
        let row: MessageRow = serde_json::from_str(
            r#"{
                "id": "m1",
                "sender_id": "alice",
                "receiver_id": "bob",
                "content": null,
                "media_url": "https://x/storage/v1/object/public/chat-audio/a.wav",
                "media_type": "audio",
                "created_at": "2026-03-01T12:00:00Z",
                "read": false
            }"#,
        )
        .unwrap();
        let msg = row.into_message();
        assert_eq!(msg.id, MessageId::new("m1"));
        assert_eq!(msg.media.unwrap().kind, MediaKind::Audio);
        assert!(msg.text.is_none());
    }

    #[test]
    fn test_row_defaults_and_unknown_media() {
        let row: MessageRow = serde_json::from_str(
            r#"{
                "id": "m2",
                "sender_id": "bob",
                "receiver_id": "alice",
                "content": "hi",
                "media_url": "https://x/v.mp4",
                "media_type": "video",
                "created_at": "2026-03-01T12:00:00.123456+00:00"
            }"#,
        )
        .unwrap();
        let msg = row.into_message();
        assert_eq!(msg.text.as_deref(), Some("hi"));
        assert!(msg.media.is_none());
        assert!(!msg.read);
    }

    #[test]
    fn test_new_message_row() {
        let msg = NewMessage {
            sender_id: UserId::new("alice"),
            receiver_id: UserId::new("bob"),
            text: None,
            media: Some(MediaRef {
                kind: MediaKind::Image,
                url: "https://x/i.jpg".into(),
            }),
        };
        let json = serde_json::to_value(NewMessageRow::from(&msg)).unwrap();
        assert_eq!(json["media_type"], "image");
        assert!(json["content"].is_null());
    }

    #[test]
    fn test_conversation_filter() {
        assert_eq!(
            conversation_filter(&UserId::new("a"), &UserId::new("b")),
            r#"(and(sender_id.eq."a",receiver_id.eq."b"),and(sender_id.eq."b",receiver_id.eq."a"))"#
        );
    }

    #[test]
    fn test_conversation_filter_quotes_reserved_characters() {
        let filter = conversation_filter(&UserId::new("x,y).z"), &UserId::new(r#"q"\"#));
        let a = r#""x,y).z""#;
        let b = r#""q\"\\""#;
        let forward = format!("and(sender_id.eq.{a},receiver_id.eq.{b})");
        let backward = format!("and(sender_id.eq.{b},receiver_id.eq.{a})");
        assert_eq!(filter, format!("({forward},{backward})"));
    }

    #[test]
    fn test_urls() {
        let config = ClientConfig {
            api_url: "https://api.example.com/".into(),
            api_key: "anon".into(),
            ..ClientConfig::default()
        };
        let backend = RestBackend::new(&config).unwrap();
        assert_eq!(backend.messages_url(), "https://api.example.com/rest/v1/messages");
        assert_eq!(
            backend.public_url("chat-audio", "x.wav"),
            "https://api.example.com/storage/v1/object/public/chat-audio/x.wav"
        );
        assert_eq!(
            backend.object_url("chat-audio", "x.wav"),
            "https://api.example.com/storage/v1/object/chat-audio/x.wav"
        );
    }
}
