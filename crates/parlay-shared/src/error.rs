use thiserror::Error;

/// User-facing failure kinds of the messaging core.
///
/// Every crate keeps its own detailed error enum and converts into this one
/// at the boundary handed to the presentation layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Poll fetch or download failed. The next attempt proceeds normally.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The server rejected or never answered a message insert.
    #[error("Message could not be sent: {0}")]
    SendFailed(String),

    /// The audio hardware is already leased or access was denied.
    #[error("Audio device unavailable: {0}")]
    ResourceUnavailable(String),

    /// No audio session configuration was accepted by the platform.
    #[error("Audio session configuration failed: {0}")]
    ConfigurationFailed(String),

    /// Corrupt, truncated or zero-length media.
    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    /// Writing the object to storage failed.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Diagnostic only: the uploaded object could not be fetched back yet.
    #[error("Upload verification inconclusive after {attempts} attempts")]
    VerificationInconclusive { attempts: u32 },

    /// A media message was sent before its attachment finished uploading.
    #[error("Attachment is not uploaded yet")]
    MediaNotUploaded,

    /// Transport control used before a successful load.
    #[error("No media loaded")]
    NotLoaded,

    #[error("IO error: {0}")]
    Io(String),
}

impl ChatError {
    /// Whether the error should be rendered to the end user.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            ChatError::TransientNetwork(_) | ChatError::VerificationInconclusive { .. }
        )
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_errors_are_hidden() {
        assert!(!ChatError::VerificationInconclusive { attempts: 3 }.is_user_visible());
        assert!(!ChatError::TransientNetwork("timeout".into()).is_user_visible());
        assert!(ChatError::SendFailed("500".into()).is_user_visible());
        assert!(ChatError::InvalidMedia("empty".into()).is_user_visible());
    }
}
