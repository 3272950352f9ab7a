use parlay_media::{MediaError, StorageError};
use parlay_shared::ChatError;
use parlay_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected backend response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Attachment is not uploaded yet")]
    MediaNotUploaded,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl ClientError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Http(e)
        }
    }
}

impl From<ClientError> for StorageError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout => StorageError::Timeout,
            ClientError::Status { status, body } => StorageError::Status { status, body },
            other => StorageError::Transport(other.to_string()),
        }
    }
}

impl From<ClientError> for ChatError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(_) | ClientError::Status { .. } | ClientError::Timeout => {
                ChatError::TransientNetwork(e.to_string())
            }
            ClientError::Decode(m) => ChatError::TransientNetwork(m),
            ClientError::SendFailed(m) => ChatError::SendFailed(m),
            ClientError::EmptyMessage => ChatError::SendFailed(e.to_string()),
            ClientError::MediaNotUploaded => ChatError::MediaNotUploaded,
            ClientError::Media(m) => m.into(),
            ClientError::Config(_) | ClientError::Store(_) => ChatError::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
