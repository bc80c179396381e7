//! Unified error types for avsession

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Component could not be constructed (probe, decoder or encoder setup)
    #[error("Setup of {component} failed: {message}")]
    Setup { component: String, message: String },

    /// Input contains neither an audio nor a video stream
    #[error("Input '{0}' has no audio or video stream")]
    NoStreams(String),

    /// Input locator not understood by any available reader
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Stream parameters are unusable
    #[error("Invalid {kind} descriptor: {message}")]
    InvalidDescriptor { kind: String, message: String },

    /// A single encoded unit could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame could not be converted to the target descriptor
    #[error("Conversion error: {0}")]
    Convert(String),

    /// A single frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Container output could not be written
    #[error("Write error: {0}")]
    Write(String),

    /// Configuration file error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Create a setup error with context
    pub fn setup(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Check if this error only affects a single unit or frame
    ///
    /// Recoverable errors are logged and the pipeline keeps running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Decode(_)
                | SessionError::Convert(_)
                | SessionError::Encode(_)
                | SessionError::Write(_)
        )
    }
}

/// Errors returned by a sink when it does not take a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Sink cannot take the frame right now (backpressure, retried)
    #[error("sink is full")]
    Full,

    /// Sink no longer accepts frames
    #[error("sink is closed")]
    Closed,

    /// Sink failed to handle the frame
    #[error("sink failed: {0}")]
    Failed(String),
}

impl SinkError {
    /// Whether delivery of the same frame should be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Full)
    }
}
