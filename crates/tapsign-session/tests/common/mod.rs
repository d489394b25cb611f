//! Common test utilities for flow integration tests.
//!
//! [`Fixture`] spawns a [`TapFlow`] over a mock detector and a mock signer
//! and keeps the control handles, so a test reads like the sequence of
//! things a user does: start, tap, type a secret.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tapsign_core::{Fingerprint, Secret, WalletId};
use tapsign_hardware::AnyDetector;
use tapsign_hardware::mock::{MockDetector, MockDetectorHandle, MockReply, MockTag, MockTagHandle};
use tapsign_protocol::{AnyProtocol, MockToken};
use tapsign_session::mock::{MOCK_FINGERPRINT, MOCK_SECRET, MockSigner, MockSignerHandle};
use tapsign_session::{FlowConfig, FlowEvent, FlowHandle, PendingAction, TapFlow};
use tokio::sync::mpsc;

/// Upper bound for waiting on any single flow event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding no event is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

pub struct Fixture {
    pub flow: FlowHandle,
    pub events: mpsc::Receiver<FlowEvent>,
    pub taps: MockDetectorHandle,
    pub signer: MockSignerHandle,
    pub token: Option<Arc<MockToken>>,
}

impl Fixture {
    /// Flow over a single-shot token family.
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        let (detector, taps) = MockDetector::new();
        let (signer, signer_handle) = MockSigner::new();
        let (flow, events) = TapFlow::new(config, AnyDetector::Mock(detector), signer)
            .expect("default config is valid");
        Self {
            flow: flow.spawn(),
            events,
            taps,
            signer: signer_handle,
            token: None,
        }
    }

    /// Flow over a poll/feed token family.
    pub fn portal() -> Self {
        let token = Arc::new(MockToken::new());
        let (detector, taps) = MockDetector::new();
        let (signer, signer_handle) = MockSigner::new();
        let signer = signer.with_token(Arc::clone(&token));
        let (flow, events) =
            TapFlow::new(FlowConfig::default(), AnyDetector::Mock(detector), signer)
                .expect("default config is valid");
        let flow = flow.with_protocol(AnyProtocol::Mock(Arc::clone(&token)));
        Self {
            flow: flow.spawn(),
            events,
            taps,
            signer: signer_handle,
            token: Some(token),
        }
    }

    /// Tap a tag that answers every frame.
    pub async fn tap(&self) -> MockTagHandle {
        let (tag, handle) = responsive_tag();
        self.taps.tap(tag).await.expect("detector alive");
        handle
    }

    /// Tap a tag whose first exchange loses the link.
    pub async fn tap_and_pull_away(&self) -> MockTagHandle {
        let (tag, handle) = MockTag::new();
        handle.queue_reply(MockReply::Lost);
        self.taps.tap(tag).await.expect("detector alive");
        handle
    }

    pub async fn next(&mut self) -> FlowEvent {
        next_event(&mut self.events).await
    }

    /// Read events until one matches, returning everything read.
    pub async fn until(&mut self, done: impl Fn(&FlowEvent) -> bool) -> Vec<FlowEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, self.events.recv()).await {
            panic!("expected no event, got {event:?}");
        }
    }
}

pub fn responsive_tag() -> (MockTag, MockTagHandle) {
    let (tag, handle) = MockTag::new();
    handle.set_responder(|_| MockReply::Data(vec![0x90, 0x00]));
    (tag, handle)
}

/// Receive the next flow event or panic after [`EVENT_TIMEOUT`].
pub async fn next_event(events: &mut mpsc::Receiver<FlowEvent>) -> FlowEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("flow event within timeout")
        .expect("flow event channel open")
}

pub fn secret(value: &str) -> Secret {
    Secret::new(value).expect("valid secret")
}

pub fn right_secret() -> Secret {
    secret(MOCK_SECRET)
}

pub fn wrong_secret() -> Secret {
    secret("000000")
}

pub fn sign_action() -> PendingAction {
    PendingAction::SignTransaction {
        fingerprint: Fingerprint::new(MOCK_FINGERPRINT).expect("valid fingerprint"),
        payload: "cHNidP8BAHECAAAAAQ".to_string(),
    }
}

pub fn export_action(id: &str) -> PendingAction {
    PendingAction::ExportWallet(WalletId::new(id).expect("valid wallet id"))
}
