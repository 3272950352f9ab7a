use thiserror::Error;

/// Errors produced by the conversation store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No pending entry carries this correlation key (it may already have
    /// been reconciled).
    #[error("Pending message not found: {0}")]
    UnknownPending(String),

    /// A pending entry with the same correlation key is already queued.
    #[error("Pending message already queued: {0}")]
    DuplicatePending(String),

    /// Only failed entries can be taken out for a re-send.
    #[error("Pending message has not failed: {0}")]
    NotFailed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
