//! Secret gating with a bounded retry counter.
//!
//! # State Machine
//!
//! ```text
//!              ┌────────────── reset() from any phase ──────────────┐
//!              ▼                                                     │
//!            Idle ──await/submit──▶ AwaitingSecret ──begin──▶ Validating
//!                                     ▲    │                     │  │  │
//!                                     │    │ device lockout      │  │  └─▶ Authenticated
//!                                     │    ▼                     │  │         │
//!                                     │  LockedOut ◀── limit ────┘  │         │ next action
//!                                     └─── wrong secret / lost tag ─┘         ▼
//!                                                                        Validating
//! ```
//!
//! `LockedOut` only leaves through [`AuthenticationGate::reset`], which is
//! what a new flow instance does.
//!
//! # Device status
//!
//! When the token reports its own attempt counter, that report wins: a
//! token that says it is locked locks the flow, and a token reporting fewer
//! attempts left than the local counter allows pulls the local counter up.
//! A token reporting more attempts than the local counter never unlocks a
//! flow that has already stopped prompting.

use crate::classifier::ErrorKind;
use crate::config::FlowConfig;
use crate::error::{Result, SessionError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tapsign_core::{Fingerprint, RequestCode, Secret};
use tracing::{debug, info, warn};

/// Maximum number of transitions kept in history.
const MAX_HISTORY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthPhase {
    Idle,
    AwaitingSecret,
    Validating,
    Authenticated,
    LockedOut,
}

impl AuthPhase {
    /// Check whether moving to `target` is a legal transition.
    pub fn can_transition_to(&self, target: &AuthPhase) -> bool {
        matches!(
            (self, target),
            // Reset
            (_, AuthPhase::Idle)
            // From Idle
            | (AuthPhase::Idle, AuthPhase::AwaitingSecret | AuthPhase::LockedOut)
            // From AwaitingSecret
            | (AuthPhase::AwaitingSecret, AuthPhase::Validating | AuthPhase::LockedOut)
            // From Validating
            | (
                AuthPhase::Validating,
                AuthPhase::Authenticated | AuthPhase::AwaitingSecret | AuthPhase::LockedOut
            )
            // From Authenticated
            | (
                AuthPhase::Authenticated,
                AuthPhase::Validating | AuthPhase::AwaitingSecret | AuthPhase::LockedOut
            )
        )
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::AwaitingSecret => "AwaitingSecret",
            Self::Validating => "Validating",
            Self::Authenticated => "Authenticated",
            Self::LockedOut => "LockedOut",
        };
        f.write_str(name)
    }
}

/// Secret and counter for the current flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub secret: Option<Secret>,
    pub retry_count: u8,
    pub is_locked_out: bool,
}

/// Result of recording a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Ask for the secret again.
    Retry { attempts_remaining: u8 },
    /// Retry limit reached; the flow must restart.
    LockedOut,
    /// Not a secret failure; counter untouched.
    Unchanged,
}

/// Attempt counter as reported by the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceAuthStatus {
    pub locked_out: bool,
    pub attempts_remaining: Option<u8>,
}

/// Record of a single phase change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTransition {
    pub from: AuthPhase,
    pub to: AuthPhase,
    pub at: DateTime<Utc>,
}

/// Decides whether an operation needs a secret and enforces the retry
/// policy for one flow instance.
#[derive(Debug, Clone)]
pub struct AuthenticationGate {
    phase: AuthPhase,
    state: AuthState,
    max_attempts: u8,
    exempt: HashSet<RequestCode>,
    remembered: HashMap<Fingerprint, Secret>,
    history: VecDeque<AuthTransition>,
}

impl AuthenticationGate {
    pub fn new(max_attempts: u8, exempt: impl IntoIterator<Item = RequestCode>) -> Self {
        Self {
            phase: AuthPhase::Idle,
            state: AuthState::default(),
            max_attempts: max_attempts.max(1),
            exempt: exempt.into_iter().collect(),
            remembered: HashMap::new(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self::new(
            config.max_secret_attempts,
            config.exempt_request_codes.iter().copied(),
        )
    }

    /// Whether flows for `code` must collect a secret before running.
    pub fn requires_secret(&self, code: RequestCode) -> bool {
        !self.exempt.contains(&code)
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    pub fn retry_count(&self) -> u8 {
        self.state.retry_count
    }

    pub fn attempts_remaining(&self) -> u8 {
        self.max_attempts.saturating_sub(self.state.retry_count)
    }

    pub fn is_locked_out(&self) -> bool {
        self.state.is_locked_out
    }

    pub fn has_secret(&self) -> bool {
        self.state.secret.is_some()
    }

    pub fn history(&self) -> &VecDeque<AuthTransition> {
        &self.history
    }

    /// Move to `AwaitingSecret` so the UI can prompt.
    ///
    /// # Errors
    /// `LockedOut` once the retry limit has been reached.
    pub fn await_secret(&mut self) -> Result<()> {
        if self.state.is_locked_out {
            return Err(SessionError::LockedOut);
        }
        self.transition(AuthPhase::AwaitingSecret)
    }

    /// Hold `secret` for the in-flight operation.
    ///
    /// # Errors
    /// `LockedOut` once the retry limit has been reached.
    pub fn submit_secret(&mut self, secret: Secret) -> Result<()> {
        if self.state.is_locked_out {
            return Err(SessionError::LockedOut);
        }
        self.state.secret = Some(secret);
        if self.phase != AuthPhase::Validating {
            self.transition(AuthPhase::AwaitingSecret)?;
        }
        debug!(phase = %self.phase, "Secret held");
        Ok(())
    }

    /// Hand out the held secret and enter `Validating`.
    ///
    /// # Errors
    /// `LockedOut` when locked, `SecretMissing` when nothing is held.
    pub fn begin_validation(&mut self) -> Result<Secret> {
        if self.state.is_locked_out {
            return Err(SessionError::LockedOut);
        }
        let secret = self.state.secret.clone().ok_or(SessionError::SecretMissing)?;
        self.transition(AuthPhase::Validating)?;
        Ok(secret)
    }

    /// The token accepted the secret.
    pub fn record_success(&mut self) {
        if self.phase != AuthPhase::Validating {
            debug!(phase = %self.phase, "Success recorded outside validation");
            return;
        }
        self.state.retry_count = 0;
        if let Err(e) = self.transition(AuthPhase::Authenticated) {
            warn!(error = %e, "Gate transition rejected");
        }
    }

    /// Apply a classified failure.
    pub fn record_failure(&mut self, kind: ErrorKind) -> FailureOutcome {
        if self.state.is_locked_out {
            return FailureOutcome::LockedOut;
        }

        match kind {
            ErrorKind::WrongSecret => {
                self.state.retry_count = self.state.retry_count.saturating_add(1);
                self.state.secret = None;
                if self.state.retry_count >= self.max_attempts {
                    self.lock_out();
                    return FailureOutcome::LockedOut;
                }
                self.settle(AuthPhase::AwaitingSecret);
                let attempts_remaining = self.attempts_remaining();
                warn!(retry_count = self.state.retry_count, attempts_remaining, "Wrong secret");
                FailureOutcome::Retry { attempts_remaining }
            }
            ErrorKind::SecretRetryLimitExceeded => {
                self.lock_out();
                FailureOutcome::LockedOut
            }
            ErrorKind::Disconnected | ErrorKind::Fatal => {
                // secret stays held for the next attempt
                if self.phase == AuthPhase::Validating {
                    self.settle(AuthPhase::AwaitingSecret);
                }
                FailureOutcome::Unchanged
            }
        }
    }

    /// Fold the token's own counter into the local state.
    ///
    /// Returns whether the flow is locked out afterwards.
    pub fn apply_device_status(&mut self, status: DeviceAuthStatus) -> bool {
        if status.locked_out || status.attempts_remaining == Some(0) {
            if !self.state.is_locked_out {
                info!("Token reports secret attempts exhausted");
                self.lock_out();
            }
            return true;
        }

        if let Some(remaining) = status.attempts_remaining {
            let used = self.max_attempts.saturating_sub(remaining);
            if used > self.state.retry_count {
                debug!(used, local = self.state.retry_count, "Token reports fewer attempts left");
                self.state.retry_count = used;
            }
        }
        self.state.is_locked_out
    }

    /// Lock the flow; only [`reset`](Self::reset) undoes this.
    pub fn lock_out(&mut self) {
        self.state.is_locked_out = true;
        self.state.secret = None;
        self.settle(AuthPhase::LockedOut);
        warn!(retry_count = self.state.retry_count, "Secret retry limit exceeded");
    }

    /// Remember the held secret for a signer fingerprint.
    pub fn remember(&mut self, fingerprint: Fingerprint) {
        if let Some(secret) = &self.state.secret {
            self.remembered.insert(fingerprint, secret.clone());
        }
    }

    /// Load a remembered secret for `fingerprint`, if there is one.
    pub fn recall(&mut self, fingerprint: &Fingerprint) -> bool {
        match self.remembered.get(fingerprint).cloned() {
            Some(secret) if !self.state.is_locked_out => self.submit_secret(secret).is_ok(),
            _ => false,
        }
    }

    /// Drop the held secret without counting a failure.
    pub fn forget_secret(&mut self) {
        self.state.secret = None;
    }

    /// Clear secret, counter, lockout and remembered secrets.
    pub fn reset(&mut self) {
        self.state = AuthState::default();
        self.remembered.clear();
        self.settle(AuthPhase::Idle);
    }

    fn transition(&mut self, to: AuthPhase) -> Result<()> {
        if self.phase == to {
            return Ok(());
        }
        if !self.phase.can_transition_to(&to) {
            return Err(SessionError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.record_transition(to);
        Ok(())
    }

    // Internal transitions are all legal by construction; log if not.
    fn settle(&mut self, to: AuthPhase) {
        if let Err(e) = self.transition(to) {
            warn!(error = %e, "Gate transition rejected");
        }
    }

    fn record_transition(&mut self, to: AuthPhase) {
        let transition = AuthTransition {
            from: self.phase,
            to,
            at: Utc::now(),
        };
        debug!(from = %transition.from, to = %transition.to, "Auth phase changed");
        self.phase = to;
        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}
