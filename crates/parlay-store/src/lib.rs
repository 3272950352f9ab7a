//! # parlay-store
//!
//! Client-side view of a two-party direct-message conversation.
//!
//! The [`MessageStore`] merges the confirmed history returned by the backend
//! with locally created optimistic messages and keeps the two reconciled.
//! It is a plain synchronous value; callers that share it between tasks wrap
//! it in a single lock so every mutation is serialized.

pub mod conversation;
pub mod models;

mod error;

pub use conversation::{MessageStore, ReconcileOutcome};
pub use error::{Result, StoreError};
pub use models::*;
