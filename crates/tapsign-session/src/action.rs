//! Deferred operations and their typed results.

use crate::auth::DeviceAuthStatus;
use serde::Serialize;
use std::fmt;
use tapsign_core::{Fingerprint, FirmwareRef, RequestCode, Secret, WalletId};

/// Parameters for provisioning a new seed on a token.
#[derive(Clone, PartialEq, Eq)]
pub struct SetupParams {
    /// Seed words, space separated. Never logged.
    pub mnemonic: String,
    /// 12 or 24.
    pub word_count: u8,
    /// Secret to set on the token. `None` sets the token up without one.
    pub secret: Option<Secret>,
}

impl fmt::Debug for SetupParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupParams")
            .field("mnemonic", &"***")
            .field("word_count", &self.word_count)
            .field("secret", &self.secret)
            .finish()
    }
}

/// The single operation a flow is waiting to run against a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    SetupToken(SetupParams),
    FetchPublicKey { path: String },
    ImportWallet,
    ExportWallet(WalletId),
    CheckFirmwareVersion,
    UpdateFirmware(FirmwareRef),
    SignTransaction { fingerprint: Fingerprint, payload: String },
    VerifyAddress { index: u32 },
}

impl PendingAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetupToken(_) => "SetupToken",
            Self::FetchPublicKey { .. } => "FetchPublicKey",
            Self::ImportWallet => "ImportWallet",
            Self::ExportWallet(_) => "ExportWallet",
            Self::CheckFirmwareVersion => "CheckFirmwareVersion",
            Self::UpdateFirmware(_) => "UpdateFirmware",
            Self::SignTransaction { .. } => "SignTransaction",
            Self::VerifyAddress { .. } => "VerifyAddress",
        }
    }

    /// Request code a flow arms for this action.
    pub fn request_code(&self) -> RequestCode {
        match self {
            Self::SetupToken(_) => RequestCode::SETUP_TOKEN,
            Self::FetchPublicKey { .. } => RequestCode::FETCH_PUBLIC_KEY,
            Self::ImportWallet => RequestCode::IMPORT_WALLET,
            Self::ExportWallet(_) => RequestCode::EXPORT_WALLET,
            Self::CheckFirmwareVersion => RequestCode::CHECK_FIRMWARE,
            Self::UpdateFirmware(_) => RequestCode::UPDATE_FIRMWARE,
            Self::SignTransaction { .. } => RequestCode::SIGN_TRANSACTION,
            Self::VerifyAddress { .. } => RequestCode::VERIFY_ADDRESS,
        }
    }

    /// Whether the action can ever need a secret. The flow decides whether
    /// it actually does.
    pub fn needs_secret(&self) -> bool {
        !matches!(self, Self::SetupToken(_) | Self::CheckFirmwareVersion)
    }

    /// Signer fingerprint the action is bound to, if any.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::SignTransaction { fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchPublicKey { path } => write!(f, "FetchPublicKey({path})"),
            Self::ExportWallet(id) => write!(f, "ExportWallet({id})"),
            Self::UpdateFirmware(reference) => write!(f, "UpdateFirmware({reference})"),
            Self::SignTransaction { fingerprint, .. } => {
                write!(f, "SignTransaction({fingerprint})")
            }
            Self::VerifyAddress { index } => write!(f, "VerifyAddress({index})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Status block a token reports alongside most results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub initialized: bool,
    pub unlocked: bool,
    pub fingerprint: Option<Fingerprint>,
    pub firmware_version: Option<String>,
    pub secret_attempts_remaining: Option<u8>,
    pub locked_out: bool,
}

impl TokenStatus {
    pub fn device_auth(&self) -> DeviceAuthStatus {
        DeviceAuthStatus {
            locked_out: self.locked_out,
            attempts_remaining: self.secret_attempts_remaining,
        }
    }
}

/// Typed result of an executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutput {
    SetupStarted { status: TokenStatus },
    PublicKey { xpub: String },
    WalletImported { wallet_id: WalletId },
    WalletExported { wallet_id: WalletId, descriptor: String },
    FirmwareVersion { status: TokenStatus },
    FirmwareUpdated { status: TokenStatus },
    TransactionSigned { payload: String },
    AddressVerified { index: u32, address: String },
}

impl ActionOutput {
    /// Token status carried by the result, if the token reported one.
    pub fn token_status(&self) -> Option<&TokenStatus> {
        match self {
            Self::SetupStarted { status }
            | Self::FirmwareVersion { status }
            | Self::FirmwareUpdated { status } => Some(status),
            _ => None,
        }
    }
}
