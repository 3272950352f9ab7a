//! In-process message backend for tests.
//!
//! Assigns ids and server timestamps the way the real backend does, and
//! can be told to fail, hang or silently drop inserts.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use parlay_shared::{MessageId, UserId};
use parlay_store::Message;

use crate::backend::{InsertReceipt, MessageBackend, NewMessage};
use crate::error::{ClientError, Result};

#[derive(Default)]
pub struct MemoryBackend {
    rows: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    fail_inserts: AtomicBool,
    drop_inserts: AtomicBool,
    fail_fetches: AtomicBool,
    hang_fetches: AtomicBool,
    inserts: AtomicU32,
    fetches: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts answer with a server error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Inserts are acknowledged but never show up in fetches.
    pub fn drop_inserts(&self, drop: bool) {
        self.drop_inserts.store(drop, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Fetches never complete.
    pub fn hang_fetches(&self, hang: bool) {
        self.hang_fetches.store(hang, Ordering::SeqCst);
    }

    /// Store a text message as if another client had sent it.
    pub fn push_row(&self, sender: &str, receiver: &str, text: &str) -> MessageId {
        self.store(NewMessage {
            sender_id: UserId::new(sender),
            receiver_id: UserId::new(receiver),
            text: Some(text.to_string()),
            media: None,
        })
        .id
    }

    pub fn rows(&self) -> Vec<Message> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn insert_count(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn store(&self, message: NewMessage) -> Message {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = Message {
            id: MessageId::new(format!("m{n}")),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            media: message.media,
            created_at: Utc::now(),
            read: false,
        };
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(row.clone());
        row
    }
}

#[async_trait]
impl MessageBackend for MemoryBackend {
    async fn insert_message(&self, message: NewMessage) -> Result<InsertReceipt> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 500,
                body: "insert rejected".into(),
            });
        }
        if self.drop_inserts.load(Ordering::SeqCst) {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(InsertReceipt {
                id: MessageId::new(format!("m{n}")),
                created_at: Utc::now(),
            });
        }
        let row = self.store(message);
        Ok(InsertReceipt {
            id: row.id,
            created_at: row.created_at,
        })
    }

    async fn fetch_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang_fetches.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        let mut rows: Vec<Message> = self
            .rows()
            .into_iter()
            .filter(|m| m.is_between(a, b))
            .collect();
        rows.sort_by(|x, y| x.created_at.cmp(&y.created_at));
        Ok(rows)
    }
}
