//! Common error types for CAPTCHA components.

use thiserror::Error;

/// Common errors across CAPTCHA components
///
/// A failing secure random source is deliberately absent: it aborts the
/// process instead of surfacing as a recoverable error.
#[derive(Debug, Error)]
pub enum CaptchaError {
    /// Captcha id is unknown, already verified, or expired
    #[error("captcha not found")]
    NotFound,

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Image or audio serialization failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Solution store backend error
    #[error("Store error: {0}")]
    Store(String),

    /// Glyph or sound asset could not be loaded
    #[error("Asset error: {0}")]
    Asset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sink or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptchaError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidInput(_) => 400,
            Self::Encoding(_) => 500,
            Self::Store(_) => 503,
            Self::Asset(_) => 500,
            Self::Config(_) => 500,
            Self::Io(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result type alias for `CaptchaError`.
pub type Result<T> = std::result::Result<T, CaptchaError>;
