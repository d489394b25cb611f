//! Error types for tag transport and detection.
//!
//! Link loss (`Disconnected`, `Timeout`) is kept apart from every other
//! transport failure because the layers above recover from it by asking
//! for a fresh tap, while the rest are terminal for the operation.

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors raised while detecting or talking to a tapped token.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Tag left the field, was closed, or the detector channel ended.
    #[error("Tag disconnected: {tag}")]
    Disconnected { tag: String },

    /// No reply within the link timeout.
    #[error("Tag did not answer within {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The tag answered, but the exchange failed.
    #[error("Tag communication failed: {message}")]
    CommunicationError { message: String },

    #[error("Malformed tag data: {message}")]
    InvalidData { message: String },

    /// Tap detection cannot be enabled (radio off, no adapter).
    #[error("Tap detection unavailable: {reason}")]
    DetectionUnavailable { reason: String },
}

impl HardwareError {
    pub fn disconnected(tag: impl Into<String>) -> Self {
        Self::Disconnected { tag: tag.into() }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn detection_unavailable(reason: impl Into<String>) -> Self {
        Self::DetectionUnavailable {
            reason: reason.into(),
        }
    }

    /// True when the tag is simply gone (out of range, closed, or silent).
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Timeout { .. })
    }
}
