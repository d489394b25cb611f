//! Single-slot deferral of the next action.
//!
//! The queue holds at most one action. It runs once both gates are open: a
//! session is active, and a secret is held if the action needs one. Either
//! can happen first, so both [`on_session_established`] and
//! [`on_secret_submitted`] re-check the slot.
//!
//! Dispatch hands the action out under a ticket. The slot stays empty while
//! the action runs; [`complete`] puts it back when the outcome is one the
//! flow recovers from locally, unless a newer action was enqueued meanwhile.
//!
//! [`on_session_established`]: PendingActionQueue::on_session_established
//! [`on_secret_submitted`]: PendingActionQueue::on_secret_submitted
//! [`complete`]: PendingActionQueue::complete

use crate::action::PendingAction;
use crate::classifier::ErrorKind;
use tracing::{debug, info};

/// Gate state for the queued action, computed by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub session_active: bool,
    pub secret_required: bool,
    pub secret_held: bool,
    pub locked_out: bool,
}

impl Readiness {
    pub fn auth_satisfied(&self) -> bool {
        !self.secret_required || self.secret_held
    }
}

/// What the caller must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing queued, or the queued action cannot run in this flow.
    Idle,
    /// Prompt for the secret.
    AwaitSecret,
    /// Prompt for a tap.
    AwaitSession,
    /// Run `action` now and report back with `ticket`.
    Execute { ticket: u64, action: PendingAction },
}

/// How a completed dispatch was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Succeeded and cleared.
    Done,
    /// Put back for another attempt.
    Requeued,
    /// Dropped for good.
    Discarded,
    /// Dropped; a newer action took the slot while this one ran.
    Superseded,
    /// Ticket does not match the action in flight.
    Stale,
}

#[derive(Debug, Default)]
pub struct PendingActionQueue {
    slot: Option<PendingAction>,
    in_flight: Option<(u64, PendingAction)>,
    next_ticket: u64,
}

impl PendingActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action`, replacing any action not yet dispatched.
    pub fn enqueue<F>(&mut self, action: PendingAction, readiness: F) -> Dispatch
    where
        F: FnOnce(&PendingAction) -> Readiness,
    {
        if let Some(previous) = self.slot.replace(action) {
            info!(superseded = %previous, "Pending action replaced");
        }
        self.dispatch(readiness)
    }

    pub fn on_session_established<F>(&mut self, readiness: F) -> Dispatch
    where
        F: FnOnce(&PendingAction) -> Readiness,
    {
        self.dispatch(readiness)
    }

    pub fn on_secret_submitted<F>(&mut self, readiness: F) -> Dispatch
    where
        F: FnOnce(&PendingAction) -> Readiness,
    {
        self.dispatch(readiness)
    }

    /// Re-check the slot against `readiness`.
    pub fn dispatch<F>(&mut self, readiness: F) -> Dispatch
    where
        F: FnOnce(&PendingAction) -> Readiness,
    {
        if self.in_flight.is_some() {
            return Dispatch::Idle;
        }
        let Some(action) = &self.slot else {
            return Dispatch::Idle;
        };

        let readiness = readiness(action);
        if readiness.locked_out {
            return Dispatch::Idle;
        }
        if !readiness.auth_satisfied() {
            return Dispatch::AwaitSecret;
        }
        if !readiness.session_active {
            return Dispatch::AwaitSession;
        }

        let Some(action) = self.slot.take() else {
            return Dispatch::Idle;
        };
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        debug!(ticket, action = %action, "Dispatching pending action");
        self.in_flight = Some((ticket, action.clone()));
        Dispatch::Execute { ticket, action }
    }

    /// Settle the dispatch identified by `ticket`. `failure` is `None` on
    /// success.
    pub fn complete(&mut self, ticket: u64, failure: Option<ErrorKind>) -> Completion {
        let action = match self.in_flight.take() {
            Some((current, action)) if current == ticket => action,
            other => {
                self.in_flight = other;
                debug!(ticket, "Ignoring completion for stale ticket");
                return Completion::Stale;
            }
        };

        match failure {
            None => Completion::Done,
            Some(kind) if kind.is_locally_recoverable() => {
                if self.slot.is_some() {
                    debug!(action = %action, "Not requeueing superseded action");
                    Completion::Superseded
                } else {
                    debug!(action = %action, %kind, "Requeueing pending action");
                    self.slot = Some(action);
                    Completion::Requeued
                }
            }
            Some(ErrorKind::SecretRetryLimitExceeded) => {
                // a stale action must not run later under a new secret
                self.slot = None;
                Completion::Discarded
            }
            Some(_) => Completion::Discarded,
        }
    }

    /// Drop both the queued and the in-flight action.
    pub fn clear(&mut self) {
        if let Some(action) = self.slot.take() {
            debug!(action = %action, "Pending action cleared");
        }
        self.in_flight = None;
    }

    pub fn peek(&self) -> Option<&PendingAction> {
        self.slot.as_ref()
    }

    pub fn in_flight(&self) -> Option<&PendingAction> {
        self.in_flight.as_ref().map(|(_, action)| action)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none() && self.in_flight.is_none()
    }
}
