//! Error type for the session layer.
//!
//! Lower layers are wrapped unchanged; [`classify`](crate::classifier::classify)
//! is the only place that looks inside them.

use tapsign_hardware::HardwareError;
use tapsign_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No active token session")]
    NoSession,

    #[error("Flow locked out after too many wrong secrets")]
    LockedOut,

    #[error("No secret held for the current flow")]
    SecretMissing,

    #[error("Invalid authentication transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Executor failed: {0}")]
    Executor(String),

    #[error("Transport error: {0}")]
    Transport(#[from] HardwareError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Core(#[from] tapsign_core::Error),
}
