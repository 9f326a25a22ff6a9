//! Error handling module for vtrim

use thiserror::Error;

/// Main error type for vtrim operations
#[derive(Error, Debug)]
pub enum VtrimError {
    /// Malformed path, rectangle, range or scheduling request
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Source container could not be parsed
    #[error("Failed to parse container: {message}")]
    ContainerParse { message: String },

    /// Output container could not be written
    #[error("Failed to write container: {message}")]
    ContainerWrite { message: String },

    /// More than one track carries a sync-sample table
    #[error("Unsupported container: {count} tracks expose sync samples, a single cut point cannot be derived")]
    MultipleSyncSampleTracks { count: usize },

    /// The external encoder could not be started
    #[error("Encoder unavailable: {message}")]
    EncoderUnavailable { message: String },

    /// The external encoder exited unsuccessfully
    #[error("Encoder failed with code {code:?}: {message}")]
    EncoderInvocationFailed { code: Option<i32>, message: String },

    /// The job was cancelled by the user
    #[error("Operation cancelled")]
    UserCancelled,

    /// Media probe error
    #[error("Failed to probe media file: {message}")]
    Probe { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VtrimError {
    /// Shorthand for [`VtrimError::InvalidInput`]
    pub fn invalid(message: impl Into<String>) -> Self {
        VtrimError::InvalidInput {
            message: message.into(),
        }
    }

    /// Shorthand for [`VtrimError::ContainerParse`]
    pub fn parse(message: impl Into<String>) -> Self {
        VtrimError::ContainerParse {
            message: message.into(),
        }
    }

    /// Shorthand for [`VtrimError::ContainerWrite`]
    pub fn write(message: impl Into<String>) -> Self {
        VtrimError::ContainerWrite {
            message: message.into(),
        }
    }

    /// Whether this error represents a user cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VtrimError::UserCancelled)
    }
}

/// Result type alias for vtrim operations
pub type VtrimResult<T> = std::result::Result<T, VtrimError>;
