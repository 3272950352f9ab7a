//! Types, constants and error kinds shared by every Parlay messaging crate.

pub mod constants;
pub mod error;
pub mod types;

pub use error::ChatError;
pub use types::{ConversationId, MediaKind, MediaRef, MessageId, UserId};
