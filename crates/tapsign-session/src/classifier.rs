//! Maps raw failures onto the four outcomes the flow reacts to.
//!
//! | raw failure | kind |
//! |-------------|------|
//! | tag gone, link timeout, no session | `Disconnected` |
//! | token rejected the secret | `WrongSecret` |
//! | token out of secret attempts, local lockout | `SecretRetryLimitExceeded` |
//! | anything else | `Fatal` |
//!
//! Nothing above this module matches on raw error variants, which keeps the
//! flow's behavior independent of the token family.

use crate::error::SessionError;
use serde::Serialize;
use std::fmt;
use tapsign_hardware::HardwareError;
use tapsign_protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Re-prompt for the secret; counted against the retry budget.
    WrongSecret,
    /// Flow-fatal: discard the pending action and restart.
    SecretRetryLimitExceeded,
    /// Session lost; re-arm and ask for another tap.
    Disconnected,
    /// Surface to the caller, no retry.
    Fatal,
}

impl ErrorKind {
    /// Whether the flow recovers from this kind without caller involvement.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Self::WrongSecret | Self::Disconnected)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::WrongSecret => "wrong secret",
            Self::SecretRetryLimitExceeded => "secret retry limit exceeded",
            Self::Disconnected => "disconnected",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Classify a session-layer failure.
pub fn classify(error: &SessionError) -> ErrorKind {
    match error {
        SessionError::Transport(e) => classify_transport(e),
        SessionError::Protocol(e) => classify_protocol(e),
        SessionError::NoSession => ErrorKind::Disconnected,
        SessionError::LockedOut => ErrorKind::SecretRetryLimitExceeded,
        SessionError::SecretMissing
        | SessionError::InvalidTransition { .. }
        | SessionError::Cancelled
        | SessionError::Executor(_)
        | SessionError::Core(_) => ErrorKind::Fatal,
    }
}

/// Attempts left as reported by the token itself, when the failure says so.
pub fn reported_attempts(error: &SessionError) -> Option<u8> {
    match error {
        SessionError::Protocol(ProtocolError::SecretRejected { remaining }) => *remaining,
        SessionError::Protocol(ProtocolError::SecretAttemptsExhausted) => Some(0),
        _ => None,
    }
}

fn classify_transport(error: &HardwareError) -> ErrorKind {
    if error.is_link_loss() {
        ErrorKind::Disconnected
    } else {
        ErrorKind::Fatal
    }
}

fn classify_protocol(error: &ProtocolError) -> ErrorKind {
    match error {
        ProtocolError::SecretRejected { .. } => ErrorKind::WrongSecret,
        ProtocolError::SecretAttemptsExhausted => ErrorKind::SecretRetryLimitExceeded,
        ProtocolError::Transport(e) => classify_transport(e),
        _ => ErrorKind::Fatal,
    }
}

impl From<&SessionError> for ErrorKind {
    fn from(error: &SessionError) -> Self {
        classify(error)
    }
}
