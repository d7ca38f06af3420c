use thiserror::Error;

/// Failure kinds surfaced by the conversion pipeline.
///
/// Each variant maps to a stable wire code via [`AudioError::code`].
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("User does not exist: {0}")]
    UserNotFound(String),

    #[error("Phrase does not exist: {0}")]
    PhraseNotFound(String),

    #[error("Invalid audio format: {0}")]
    FormatInvalid(String),

    #[error("Audio already exists for user {user_id} and phrase {phrase_id}")]
    AudioAlreadyExists { user_id: String, phrase_id: String },

    #[error("No audio for user {user_id} and phrase {phrase_id}")]
    AudioNotFound { user_id: String, phrase_id: String },

    /// The metadata record points at a blob the store does not have.
    #[error("Stored file is missing: {0}")]
    FileNotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Retrieve failed: {0}")]
    RetrieveFailed(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AudioError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_EXIST",
            Self::PhraseNotFound(_) => "PHRASE_NOT_EXIST",
            Self::FormatInvalid(_) => "FORMAT_INVALID",
            Self::AudioAlreadyExists { .. } => "AUDIO_ALREADY_EXIST",
            Self::AudioNotFound { .. } => "AUDIO_NOT_EXIST",
            Self::FileNotFound(_) => "FILE_NOT_EXIST",
            Self::UploadFailed(_) => "UPLOAD_FAILED",
            Self::ConversionFailed(_) => "CONVERSION_FAILED",
            Self::RetrieveFailed(_) => "RETRIEVE_FAILED",
            Self::Internal(_) => "SYSTEM_ERROR",
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_)
                | Self::PhraseNotFound(_)
                | Self::FormatInvalid(_)
                | Self::AudioAlreadyExists { .. }
                | Self::AudioNotFound { .. }
        )
    }
}
