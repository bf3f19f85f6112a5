//! Error type shared by every sigver crate.

use thiserror::Error;

/// Errors produced by the signature verification engine.
///
/// Configuration and checkpoint errors are fatal: they are raised as soon as
/// they are detected and never corrected silently.
///
/// # Example
///
/// ```
/// use sigver_core::SigError;
///
/// let err = SigError::InvalidConfig {
///     message: "patch height 0".to_string(),
/// };
/// assert!(err.to_string().contains("patch height 0"));
/// ```
#[derive(Debug, Error)]
pub enum SigError {
    /// A configuration value is invalid (detected at construction time).
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A checkpoint was produced by a different architecture than expected.
    #[error("checkpoint architecture mismatch: {message}")]
    ConfigMismatch { message: String },

    /// A tensor or image argument does not have the expected shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Checkpoint file could not be written, read, or decoded.
    #[error("checkpoint error: {message}")]
    Checkpoint { message: String },

    /// A pair list or signature image could not be read.
    #[error("dataset error: {message}")]
    Dataset { message: String },

    /// Underlying tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Underlying I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SigError {
    /// Shorthand for [`SigError::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for [`SigError::Checkpoint`].
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Shorthand for [`SigError::Dataset`].
    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset {
            message: message.into(),
        }
    }
}
