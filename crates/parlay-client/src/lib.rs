//! # parlay-client
//!
//! Keeps one direct-message conversation in sync with the backend: a poll
//! task reconciles the server's history into a [`MessageStore`], and an
//! optimistic sender shows outgoing messages before the server confirms
//! them.
//!
//! [`MessageStore`]: parlay_store::MessageStore

pub mod backend;
pub mod config;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod notify;
pub mod sender;
pub mod session;
pub mod shared;
pub mod sync;

mod error;

pub use backend::{InsertReceipt, MessageBackend, NewMessage, RestBackend};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryBackend;
pub use notify::{LogNotifier, NotificationBridge};
#[cfg(any(test, feature = "testing"))]
pub use notify::RecordingNotifier;
pub use sender::OptimisticSender;
pub use session::ConversationSession;
pub use shared::SharedConversation;
pub use sync::{SyncConfig, SyncHandle, SyncScheduler, SyncStats};
