use crate::{
    Result,
    constants::{
        DISARMED_REQUEST_CODE, FINGERPRINT_HEX_LENGTH, MAX_SECRET_LENGTH, MAX_WALLET_ID_LENGTH,
        MIN_CVC_LENGTH,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Identifies why a tap was requested.
///
/// A tap event carries the code that was armed when detection was enabled,
/// so the session layer can tell which operation the tap belongs to. `0` is
/// reserved for "nothing armed" and is never a valid code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct RequestCode(u16);

impl RequestCode {
    pub const STATUS: Self = Self(1);
    pub const CHANGE_SECRET: Self = Self(2);
    pub const ADD_KEY: Self = Self(3);
    pub const SIGN_TRANSACTION: Self = Self(4);
    pub const VIEW_BACKUP_KEY: Self = Self(5);
    pub const TOPUP_XPUBS: Self = Self(6);
    pub const HEALTH_CHECK: Self = Self(7);
    pub const AUTO_CARD_STATUS: Self = Self(8);
    pub const SWEEP_SLOT: Self = Self(9);
    pub const BEARER_SETUP: Self = Self(10);
    pub const SETUP_TOKEN: Self = Self(11);
    pub const FETCH_PUBLIC_KEY: Self = Self(12);
    pub const IMPORT_WALLET: Self = Self(13);
    pub const EXPORT_WALLET: Self = Self(14);
    pub const CHECK_FIRMWARE: Self = Self(15);
    pub const UPDATE_FIRMWARE: Self = Self(16);
    pub const VERIFY_ADDRESS: Self = Self(17);

    /// Create a request code with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidRequestCode` for the reserved disarmed value `0`.
    pub fn new(code: u16) -> Result<Self> {
        if code == DISARMED_REQUEST_CODE {
            return Err(Error::InvalidRequestCode(code));
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Human-readable name for well-known codes, used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.0 {
            1 => "status",
            2 => "change-secret",
            3 => "add-key",
            4 => "sign-transaction",
            5 => "view-backup-key",
            6 => "topup-xpubs",
            7 => "health-check",
            8 => "auto-card-status",
            9 => "sweep-slot",
            10 => "bearer-setup",
            11 => "setup-token",
            12 => "fetch-public-key",
            13 => "import-wallet",
            14 => "export-wallet",
            15 => "check-firmware",
            16 => "update-firmware",
            17 => "verify-address",
            _ => "custom",
        }
    }

    /// Codes whose flows are read-only or bootstrap the token, and so never
    /// prompt for a secret up front.
    #[must_use]
    pub fn default_exempt() -> Vec<Self> {
        vec![
            Self::STATUS,
            Self::CHANGE_SECRET,
            Self::AUTO_CARD_STATUS,
            Self::CHECK_FIRMWARE,
            Self::SETUP_TOKEN,
            Self::BEARER_SETUP,
        ]
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl TryFrom<u16> for RequestCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Self::new(code)
    }
}

impl From<RequestCode> for u16 {
    fn from(code: RequestCode) -> Self {
        code.0
    }
}

/// A PIN or CVC entered by the user.
///
/// # Security
/// Comparison is constant-time and `Debug` never prints the value. The type
/// deliberately has no `Serialize` impl so it cannot end up in persisted
/// configuration or logs by accident.
#[derive(Clone, Eq)]
pub struct Secret(String);

impl Secret {
    /// Create a secret with basic validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidSecret` if the secret is empty, longer than
    /// `MAX_SECRET_LENGTH` bytes or contains non-ASCII characters.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::InvalidSecret("secret cannot be empty".to_string()));
        }
        if secret.len() > MAX_SECRET_LENGTH {
            return Err(Error::InvalidSecret(format!(
                "secret must be at most {MAX_SECRET_LENGTH} chars, got {}",
                secret.len()
            )));
        }
        if !secret.is_ascii() {
            return Err(Error::InvalidSecret("secret must be ASCII".to_string()));
        }
        Ok(Self(secret.to_string()))
    }

    /// Create a card verification code: at least `MIN_CVC_LENGTH` digits.
    ///
    /// # Errors
    /// Returns `Error::InvalidSecret` if the code is too short or has
    /// non-digit characters.
    pub fn cvc(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() < MIN_CVC_LENGTH {
            return Err(Error::InvalidSecret(format!(
                "CVC must be at least {MIN_CVC_LENGTH} digits, got {}",
                code.len()
            )));
        }
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidSecret("CVC must be digits only".to_string()));
        }
        Self::new(code)
    }

    /// Raw secret bytes, for handing to the token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::str::FromStr for Secret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Secret::new(s)
    }
}

/// Master key fingerprint (4 bytes, 8 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Create a fingerprint, normalizing to lowercase.
    ///
    /// # Errors
    /// Returns `Error::InvalidFingerprint` unless the input is exactly
    /// `FINGERPRINT_HEX_LENGTH` hex characters.
    pub fn new(fingerprint: &str) -> Result<Self> {
        let fingerprint = fingerprint.trim().to_lowercase();
        if fingerprint.len() != FINGERPRINT_HEX_LENGTH
            || !fingerprint.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(Error::InvalidFingerprint(format!(
                "expected {FINGERPRINT_HEX_LENGTH} hex chars, got {fingerprint:?}"
            )));
        }
        Ok(Self(fingerprint))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Fingerprint::new(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Fingerprint::new(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

/// Identifier of a wallet known to the host application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletId(String);

impl WalletId {
    /// # Errors
    /// Returns `Error::InvalidWalletId` if the id is blank or longer than
    /// `MAX_WALLET_ID_LENGTH`.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_WALLET_ID_LENGTH {
            return Err(Error::InvalidWalletId(format!(
                "wallet id must be 1-{MAX_WALLET_ID_LENGTH} chars, got {}",
                id.len()
            )));
        }
        Ok(Self(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WalletId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        WalletId::new(&s)
    }
}

impl From<WalletId> for String {
    fn from(id: WalletId) -> Self {
        id.0
    }
}

/// Reference to a firmware image (path or URI), resolved by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareRef(String);

impl FirmwareRef {
    /// # Errors
    /// Returns `Error::InvalidFirmwareRef` if the reference is blank.
    pub fn new(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::InvalidFirmwareRef(
                "firmware reference cannot be empty".to_string(),
            ));
        }
        Ok(Self(reference.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FirmwareRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FirmwareRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        FirmwareRef::new(&s)
    }
}

impl From<FirmwareRef> for String {
    fn from(reference: FirmwareRef) -> Self {
        reference.0
    }
}
