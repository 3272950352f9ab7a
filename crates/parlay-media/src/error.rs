use parlay_shared::ChatError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Audio device unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("No audio session configuration accepted (last tried: {last_tried})")]
    ConfigurationFailed { last_tried: String },

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No media loaded")]
    NotLoaded,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Invalid asset state: {0}")]
    InvalidState(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for ChatError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::ResourceUnavailable(m) => ChatError::ResourceUnavailable(m),
            MediaError::ConfigurationFailed { last_tried } => {
                ChatError::ConfigurationFailed(last_tried)
            }
            MediaError::InvalidMedia(m) => ChatError::InvalidMedia(m),
            MediaError::Wav(e) => ChatError::InvalidMedia(e.to_string()),
            MediaError::UploadFailed(m) => ChatError::UploadFailed(m),
            MediaError::Network(m) => ChatError::TransientNetwork(m),
            MediaError::NotLoaded => ChatError::NotLoaded,
            MediaError::Stream(m) => ChatError::ResourceUnavailable(m),
            MediaError::NotRecording | MediaError::InvalidState(_) => {
                ChatError::Io(e.to_string())
            }
            MediaError::Io(e) => ChatError::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
