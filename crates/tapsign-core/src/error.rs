use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Request correlation
    #[error("Invalid request code: {0}")]
    InvalidRequestCode(u16),

    // Credential / identifier validation
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid wallet id: {0}")]
    InvalidWalletId(String),

    #[error("Invalid firmware reference: {0}")]
    InvalidFirmwareRef(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
