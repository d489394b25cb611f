//! Common test utilities for protocol integration tests.
//!
//! Helpers here spin up a [`CardProtocolEngine`] over a connected mock tag
//! and read its lifecycle events with a timeout, so a broken loop fails the
//! test instead of hanging it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tapsign_hardware::mock::{MockTag, MockTagHandle};
use tapsign_hardware::{AnyTag, TagTransport};
use tapsign_protocol::{CardProtocolEngine, EngineEvent, MockToken};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Upper bound for waiting on any single engine event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RunningEngine {
    pub session_id: Uuid,
    pub events: mpsc::Receiver<EngineEvent>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Create a mock tag that is already connected.
pub fn connected_tag() -> (Arc<AnyTag>, MockTagHandle) {
    let (tag, handle) = MockTag::new();
    tag.connect(Duration::from_millis(1000))
        .expect("mock tag connects while in range");
    (Arc::new(AnyTag::Mock(tag)), handle)
}

/// Spawn an engine for `token` over `tag`.
pub fn spawn_engine(token: Arc<MockToken>, tag: Arc<AnyTag>) -> RunningEngine {
    let session_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (events_tx, events) = mpsc::channel(16);

    let engine = CardProtocolEngine::new(session_id, token, cancel.clone());
    let task = tokio::spawn(engine.run(tag, events_tx));

    RunningEngine {
        session_id,
        events,
        cancel,
        task,
    }
}

/// Receive the next engine event or panic after [`EVENT_TIMEOUT`].
pub async fn next_event(events: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("engine event within timeout")
        .expect("engine event channel open")
}

/// Assert the next event is `Established` for `session_id`.
pub async fn expect_established(engine: &mut RunningEngine) {
    match next_event(&mut engine.events).await {
        EngineEvent::Established { session_id } => assert_eq!(session_id, engine.session_id),
        other => panic!("expected Established, got {other:?}"),
    }
}

/// Reply to every frame by prefixing it with `ok:`.
pub fn echo_ok(handle: &MockTagHandle) {
    handle.set_responder(|frame| {
        let mut reply = b"ok:".to_vec();
        reply.extend_from_slice(frame);
        tapsign_hardware::mock::MockReply::Data(reply)
    });
}
