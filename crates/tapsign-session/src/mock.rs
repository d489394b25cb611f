//! Mock signer for testing and development.
//!
//! [`MockSigner`] is an [`ActionExecutor`] that behaves like a small
//! hardware signer: it keeps its own secret and attempt counter, refuses to
//! work before it is set up, and answers every action after one round trip
//! over the session so link loss surfaces the way it would on a real token.
//!
//! The round trip goes over the tapped tag, or through a [`MockToken`] when
//! the signer is a poll/feed token.

use crate::action::{ActionOutput, PendingAction, TokenStatus};
use crate::error::SessionError;
use crate::executor::{ActionExecutor, ExecutionContext};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tapsign_core::constants::DEFAULT_MAX_SECRET_ATTEMPTS;
use tapsign_core::{Fingerprint, Secret, WalletId};
use tapsign_hardware::TagTransport;
use tapsign_protocol::{MockToken, ProtocolError};
use tracing::debug;

/// Fingerprint reported by a default mock signer.
pub const MOCK_FINGERPRINT: &str = "73c5da0a";

/// Secret a default mock signer is set up with.
pub const MOCK_SECRET: &str = "123456";

const DEFAULT_FIRMWARE_VERSION: &str = "1.0.3";

struct SignerState {
    initialized: AtomicBool,
    secret: Mutex<Option<Secret>>,
    attempts_remaining: AtomicU8,
    fingerprint: Option<Fingerprint>,
    firmware_version: Mutex<String>,
    executed: Mutex<Vec<PendingAction>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SignerState {
    fn status(&self) -> TokenStatus {
        let attempts = self.attempts_remaining.load(Ordering::SeqCst);
        TokenStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            unlocked: attempts > 0,
            fingerprint: self.fingerprint.clone(),
            firmware_version: Some(lock(&self.firmware_version).clone()),
            secret_attempts_remaining: Some(attempts),
            locked_out: attempts == 0,
        }
    }

    fn check_secret(&self, offered: Option<&Secret>) -> Result<(), ProtocolError> {
        let expected = lock(&self.secret);
        let Some(expected) = expected.as_ref() else {
            return Ok(());
        };

        let attempts = self.attempts_remaining.load(Ordering::SeqCst);
        if attempts == 0 {
            return Err(ProtocolError::SecretAttemptsExhausted);
        }
        if offered == Some(expected) {
            self.attempts_remaining
                .store(DEFAULT_MAX_SECRET_ATTEMPTS, Ordering::SeqCst);
            return Ok(());
        }

        let remaining = attempts - 1;
        self.attempts_remaining.store(remaining, Ordering::SeqCst);
        Err(ProtocolError::SecretRejected {
            remaining: Some(remaining),
        })
    }
}

/// Mock hardware signer.
///
/// # Examples
///
/// ```
/// use tapsign_session::mock::{MOCK_SECRET, MockSigner};
///
/// let (signer, handle) = MockSigner::new();
/// assert_eq!(handle.attempts_remaining(), 3);
/// handle.set_secret(None);
/// assert!(handle.executed().is_empty());
/// # drop(signer);
/// # let _ = MOCK_SECRET;
/// ```
pub struct MockSigner {
    state: Arc<SignerState>,
    token: Option<Arc<MockToken>>,
}

impl MockSigner {
    /// A set-up signer with [`MOCK_SECRET`] and [`MOCK_FINGERPRINT`].
    pub fn new() -> (Self, MockSignerHandle) {
        let state = Arc::new(SignerState {
            initialized: AtomicBool::new(true),
            secret: Mutex::new(Secret::new(MOCK_SECRET).ok()),
            attempts_remaining: AtomicU8::new(DEFAULT_MAX_SECRET_ATTEMPTS),
            fingerprint: Fingerprint::new(MOCK_FINGERPRINT).ok(),
            firmware_version: Mutex::new(DEFAULT_FIRMWARE_VERSION.to_string()),
            executed: Mutex::new(Vec::new()),
        });
        let handle = MockSignerHandle {
            state: Arc::clone(&state),
        };
        (Self { state, token: None }, handle)
    }

    /// Carry every exchange through `token` instead of the raw tag.
    pub fn with_token(mut self, token: Arc<MockToken>) -> Self {
        self.token = Some(token);
        self
    }

    async fn round_trip(
        &self,
        ctx: &ExecutionContext,
        command: &str,
    ) -> Result<Bytes, SessionError> {
        match &self.token {
            Some(token) => Ok(token.exchange(Bytes::copy_from_slice(command.as_bytes())).await?),
            None => Ok(Bytes::from(ctx.tag.transceive(command.as_bytes()).await?)),
        }
    }

    fn run(
        &self,
        action: &PendingAction,
        secret: Option<&Secret>,
    ) -> Result<ActionOutput, SessionError> {
        let state = &self.state;

        if action.needs_secret() {
            if !state.initialized.load(Ordering::SeqCst) {
                return Err(ProtocolError::NotInitialized.into());
            }
            state.check_secret(secret)?;
        }

        let output = match action {
            PendingAction::SetupToken(params) => {
                if state.initialized.swap(true, Ordering::SeqCst) {
                    return Err(ProtocolError::Malformed("token already set up".to_string()).into());
                }
                *lock(&state.secret) = params.secret.clone();
                ActionOutput::SetupStarted {
                    status: state.status(),
                }
            }
            PendingAction::CheckFirmwareVersion => ActionOutput::FirmwareVersion {
                status: state.status(),
            },
            PendingAction::FetchPublicKey { path } => ActionOutput::PublicKey {
                xpub: format!("xpub-{MOCK_FINGERPRINT}-{path}"),
            },
            PendingAction::ImportWallet => ActionOutput::WalletImported {
                wallet_id: WalletId::new(&format!("tapsign-{MOCK_FINGERPRINT}"))?,
            },
            PendingAction::ExportWallet(wallet_id) => ActionOutput::WalletExported {
                wallet_id: wallet_id.clone(),
                descriptor: format!("wpkh([{MOCK_FINGERPRINT}/84'/0'/0']xpub-{MOCK_FINGERPRINT})"),
            },
            PendingAction::UpdateFirmware(reference) => {
                *lock(&state.firmware_version) = reference.to_string();
                ActionOutput::FirmwareUpdated {
                    status: state.status(),
                }
            }
            PendingAction::SignTransaction {
                fingerprint,
                payload,
            } => {
                if fingerprint.as_str() != MOCK_FINGERPRINT {
                    return Err(ProtocolError::FingerprintMismatch {
                        expected: fingerprint.to_string(),
                        actual: MOCK_FINGERPRINT.to_string(),
                    }
                    .into());
                }
                ActionOutput::TransactionSigned {
                    payload: format!("{payload}:signed:{MOCK_FINGERPRINT}"),
                }
            }
            PendingAction::VerifyAddress { index } => ActionOutput::AddressVerified {
                index: *index,
                address: format!("bc1q{MOCK_FINGERPRINT}{index:04}"),
            },
        };
        Ok(output)
    }
}

impl ActionExecutor for MockSigner {
    async fn execute(
        &self,
        action: PendingAction,
        ctx: ExecutionContext,
    ) -> Result<ActionOutput, SessionError> {
        let reply = self.round_trip(&ctx, action.name()).await?;
        debug!(
            session = %ctx.session_id,
            action = %action,
            reply_len = reply.len(),
            "Mock signer answered"
        );

        lock(&self.state.executed).push(action.clone());
        self.run(&action, ctx.secret.as_ref())
    }
}

/// Handle for inspecting and steering a mock signer from test code.
#[derive(Clone)]
pub struct MockSignerHandle {
    state: Arc<SignerState>,
}

impl MockSignerHandle {
    pub fn set_initialized(&self, initialized: bool) {
        self.state.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Change the signer's secret. `None` accepts any secret or none.
    pub fn set_secret(&self, secret: Option<Secret>) {
        *lock(&self.state.secret) = secret;
    }

    pub fn set_attempts_remaining(&self, attempts: u8) {
        self.state.attempts_remaining.store(attempts, Ordering::SeqCst);
    }

    pub fn attempts_remaining(&self) -> u8 {
        self.state.attempts_remaining.load(Ordering::SeqCst)
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.state.fingerprint.clone()
    }

    pub fn status(&self) -> TokenStatus {
        self.state.status()
    }

    /// Names of the actions the signer was asked to run, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state.executed)
            .iter()
            .map(|action| action.name().to_string())
            .collect()
    }

    pub fn executed_actions(&self) -> Vec<PendingAction> {
        lock(&self.state.executed).clone()
    }
}
