use tapsign_hardware::HardwareError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    // Token verdicts
    #[error("Secret rejected by token ({} attempts remaining)", attempts(.remaining))]
    SecretRejected { remaining: Option<u8> },

    #[error("Secret attempts exhausted")]
    SecretAttemptsExhausted,

    #[error("Token not initialized")]
    NotInitialized,

    #[error("Fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("Unsupported token: {0}")]
    UnsupportedToken(String),

    // Message index discipline
    #[error("Reply index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u32, actual: u32 },

    #[error("Message index {index} reused (last sent {last})")]
    IndexReused { index: u32, last: u32 },

    #[error("Message {index} sent while reply to {outstanding} is outstanding")]
    ReplyOutstanding { index: u32, outstanding: u32 },

    #[error("Unexpected reply for index {index}")]
    UnexpectedReply { index: u32 },

    // Framing and lifecycle
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Token protocol closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] HardwareError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

fn attempts(remaining: &Option<u8>) -> String {
    remaining.map_or_else(|| "unknown".to_string(), |r| r.to_string())
}
