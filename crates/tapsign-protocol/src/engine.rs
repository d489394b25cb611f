//! Poll/feed loop over one tag session.
//!
//! The engine performs the token handshake once, then repeatedly asks the
//! [`TokenProtocol`] for the next frame, carries it over the
//! [`TagTransport`], and feeds the reply back under the same index. It never
//! retries: the first transport error ends the loop and the caller decides
//! whether to ask for another tap.
//!
//! # Lifecycle
//!
//! ```text
//! handshake ──ok──▶ Established ──▶ poll ─▶ transceive ─▶ feed ─┐
//!     │                              ▲                          │
//!     │                              └──────────────────────────┘
//!     └──err──▶ Stopped(Failed)   transport err ─▶ Stopped(TransportFailed)
//!                                 poll -> None  ─▶ Stopped(Completed)
//!                                 cancel token  ─▶ Stopped(Cancelled)
//! ```
//!
//! On `TransportFailed` and `Failed` the session's cancellation token is
//! cancelled, so anything waiting on the session learns it is gone.

use crate::error::{ProtocolError, Result};
use crate::message::ProtocolMessage;
use crate::sequencer::MessageSequencer;
use crate::token::TokenProtocol;
use bytes::Bytes;
use std::sync::Arc;
use tapsign_hardware::{HardwareError, TagTransport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Lifecycle notifications sent by a running engine.
#[derive(Debug)]
pub enum EngineEvent {
    /// Handshake done; actions waiting on this session may run.
    Established { session_id: Uuid },

    /// The loop has ended and will not send anything else.
    Stopped {
        session_id: Uuid,
        outcome: EngineOutcome,
    },
}

/// Why the loop ended.
#[derive(Debug)]
pub enum EngineOutcome {
    /// The token reported it has nothing more to exchange.
    Completed,

    /// The session was closed by its owner.
    Cancelled,

    /// The tag link failed (including the tag leaving the field).
    TransportFailed(HardwareError),

    /// Handshake or index discipline failed.
    Failed(ProtocolError),
}

impl EngineOutcome {
    /// Convert into the error that ended the loop, if any.
    pub fn into_error(self) -> Option<ProtocolError> {
        match self {
            Self::Completed | Self::Cancelled => None,
            Self::TransportFailed(e) => Some(ProtocolError::Transport(e)),
            Self::Failed(e) => Some(e),
        }
    }

    /// True if the session can no longer be used.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::TransportFailed(_) | Self::Failed(_))
    }
}

/// Drives the indexed poll/feed exchange for one session.
pub struct CardProtocolEngine<P> {
    session_id: Uuid,
    protocol: Arc<P>,
    sequencer: MessageSequencer,
    cancel: CancellationToken,
}

impl<P: TokenProtocol> CardProtocolEngine<P> {
    pub fn new(session_id: Uuid, protocol: Arc<P>, cancel: CancellationToken) -> Self {
        Self {
            session_id,
            protocol,
            sequencer: MessageSequencer::new(),
            cancel,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn sequencer(&self) -> &MessageSequencer {
        &self.sequencer
    }

    /// Run the token handshake and start a fresh index sequence.
    pub async fn handshake(&mut self) -> Result<()> {
        self.sequencer.reset();
        self.protocol.new_tag().await
    }

    /// Ask the protocol state for the next frame and record it as sent.
    pub async fn poll_next(&mut self) -> Result<Option<ProtocolMessage>> {
        let message = self.protocol.poll().await?;
        if let Some(message) = &message {
            self.sequencer.record_sent(message.index)?;
            trace!(session = %self.session_id, frame = %message, "Polled frame");
        }
        Ok(message)
    }

    /// Feed the reply for `index` back to the protocol state.
    ///
    /// # Errors
    /// Rejects a reply whose index is not the outstanding message without
    /// advancing the loop.
    pub async fn feed(&mut self, index: u32, reply: Bytes) -> Result<()> {
        self.sequencer.accept_reply(index)?;
        trace!(session = %self.session_id, index, len = reply.len(), "Feeding reply");
        self.protocol.incoming_data(index, reply).await
    }

    /// One full poll, transceive and feed cycle.
    ///
    /// Returns the exchanged index, or `None` once the protocol is done.
    pub async fn step<T: TagTransport>(&mut self, tag: &T) -> Result<Option<u32>> {
        let Some(message) = self.poll_next().await? else {
            return Ok(None);
        };
        let reply = tag.transceive(&message.payload).await?;
        self.feed(message.index, Bytes::from(reply)).await?;
        Ok(Some(message.index))
    }

    /// Run until completion, cancellation or failure, then report `Stopped`.
    pub async fn run<T: TagTransport>(mut self, tag: Arc<T>, events: mpsc::Sender<EngineEvent>) {
        let session_id = self.session_id;
        let outcome = self.drive(tag.as_ref(), &events).await;

        match &outcome {
            EngineOutcome::Completed => info!(
                session = %session_id,
                exchanged = self.sequencer.exchanged(),
                "Protocol loop completed"
            ),
            EngineOutcome::Cancelled => debug!(session = %session_id, "Protocol loop cancelled"),
            EngineOutcome::TransportFailed(e) => {
                warn!(session = %session_id, error = %e, "Protocol loop lost the tag")
            }
            EngineOutcome::Failed(e) => {
                warn!(session = %session_id, error = %e, "Protocol loop failed")
            }
        }

        if outcome.ends_session() {
            self.cancel.cancel();
        }

        if events
            .send(EngineEvent::Stopped {
                session_id,
                outcome,
            })
            .await
            .is_err()
        {
            debug!(session = %session_id, "Engine event receiver dropped");
        }
    }

    async fn drive<T: TagTransport>(
        &mut self,
        tag: &T,
        events: &mpsc::Sender<EngineEvent>,
    ) -> EngineOutcome {
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return EngineOutcome::Cancelled,
            result = self.handshake() => {
                if let Err(e) = result {
                    return match e {
                        ProtocolError::Transport(e) => EngineOutcome::TransportFailed(e),
                        e => EngineOutcome::Failed(e),
                    };
                }
            }
        }

        debug!(session = %self.session_id, "Handshake completed");
        if events
            .send(EngineEvent::Established {
                session_id: self.session_id,
            })
            .await
            .is_err()
        {
            return EngineOutcome::Cancelled;
        }

        loop {
            if !tag.is_connected() {
                return EngineOutcome::TransportFailed(HardwareError::disconnected(format!(
                    "tag {}",
                    tag.info().id_hex()
                )));
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return EngineOutcome::Cancelled,
                result = self.step(tag) => result,
            };

            match result {
                Ok(Some(_)) => {}
                Ok(None) => return EngineOutcome::Completed,
                Err(ProtocolError::Transport(e)) => return EngineOutcome::TransportFailed(e),
                Err(e) => return EngineOutcome::Failed(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockToken;
    use std::time::Duration;
    use tapsign_hardware::AnyTag;
    use tapsign_hardware::mock::{MockReply, MockTag};

    fn connected_tag() -> (Arc<AnyTag>, tapsign_hardware::mock::MockTagHandle) {
        let (tag, handle) = MockTag::new();
        tag.connect(Duration::from_millis(1000)).unwrap();
        (Arc::new(AnyTag::Mock(tag)), handle)
    }

    #[tokio::test]
    async fn test_step_round_trip() {
        let token = Arc::new(MockToken::new());
        let (tag, handle) = connected_tag();
        handle.queue_data(b"pong".to_vec());

        let mut engine =
            CardProtocolEngine::new(Uuid::new_v4(), token.clone(), CancellationToken::new());
        engine.handshake().await.unwrap();

        let request = tokio::spawn({
            let token = token.clone();
            async move { token.exchange(b"ping".to_vec()).await }
        });

        assert_eq!(engine.step(tag.as_ref()).await.unwrap(), Some(0));
        assert_eq!(request.await.unwrap().unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(handle.transcript(), vec![b"ping".to_vec()]);
        assert_eq!(engine.sequencer().exchanged(), 1);
    }

    #[tokio::test]
    async fn test_feed_with_wrong_index_is_rejected() {
        let token = Arc::new(MockToken::new());
        let mut engine =
            CardProtocolEngine::new(Uuid::new_v4(), token.clone(), CancellationToken::new());
        engine.handshake().await.unwrap();

        let _pending = tokio::spawn({
            let token = token.clone();
            async move { token.exchange(b"ping".to_vec()).await }
        });

        let message = engine.poll_next().await.unwrap().unwrap();
        assert_eq!(message.index, 0);

        let error = engine.feed(1, Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(error, ProtocolError::IndexMismatch { expected: 0, actual: 1 }));
        assert_eq!(engine.sequencer().exchanged(), 0);
        assert_eq!(engine.sequencer().outstanding(), Some(0));
        assert!(token.received().is_empty());

        engine.feed(0, Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(engine.sequencer().exchanged(), 1);
    }

    #[tokio::test]
    async fn test_step_transport_error_surfaces() {
        let token = Arc::new(MockToken::new());
        let (tag, handle) = connected_tag();
        handle.queue_reply(MockReply::Lost);

        let mut engine =
            CardProtocolEngine::new(Uuid::new_v4(), token.clone(), CancellationToken::new());
        engine.handshake().await.unwrap();
        let _pending = tokio::spawn({
            let token = token.clone();
            async move { token.exchange(b"ping".to_vec()).await }
        });

        let error = engine.step(tag.as_ref()).await.unwrap_err();
        assert!(matches!(error, ProtocolError::Transport(ref e) if e.is_link_loss()));
    }

    #[test]
    fn test_outcome_into_error() {
        assert!(EngineOutcome::Completed.into_error().is_none());
        assert!(EngineOutcome::Cancelled.into_error().is_none());
        assert!(matches!(
            EngineOutcome::TransportFailed(HardwareError::timeout(5)).into_error(),
            Some(ProtocolError::Transport(_))
        ));
        assert!(EngineOutcome::Failed(ProtocolError::Closed).ends_session());
        assert!(!EngineOutcome::Cancelled.ends_session());
    }
}
