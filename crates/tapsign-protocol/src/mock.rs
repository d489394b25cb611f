//! In-memory token-side protocol state for tests and demos.
//!
//! [`MockToken::exchange`] queues a request frame and resolves once the
//! engine has carried it to the tag and fed the reply back, which is how a
//! vendor SDK for a poll/feed token typically looks from the caller's side.

use crate::error::{ProtocolError, Result};
use crate::message::ProtocolMessage;
use crate::token::TokenProtocol;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

enum Outgoing {
    Message(ProtocolMessage),
    Finish,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock poll/feed protocol state.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use tapsign_protocol::{MockToken, TokenProtocol};
///
/// #[tokio::main]
/// async fn main() -> tapsign_protocol::Result<()> {
///     let token = std::sync::Arc::new(MockToken::new());
///     token.new_tag().await?;
///
///     let caller = tokio::spawn({
///         let token = token.clone();
///         async move { token.exchange(Bytes::from_static(b"status")).await }
///     });
///
///     let message = token.poll().await?.expect("frame");
///     token.incoming_data(message.index, Bytes::from_static(b"ok")).await?;
///     assert_eq!(caller.await.unwrap()?, Bytes::from_static(b"ok"));
///     Ok(())
/// }
/// ```
pub struct MockToken {
    next_index: AtomicU32,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    outgoing_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outgoing>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Bytes>>>,
    received: Mutex<Vec<(u32, Bytes)>>,
    handshakes: AtomicUsize,
    fail_handshake: AtomicBool,
}

impl MockToken {
    pub fn new() -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            next_index: AtomicU32::new(0),
            outgoing_tx,
            outgoing_rx: tokio::sync::Mutex::new(outgoing_rx),
            pending: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            handshakes: AtomicUsize::new(0),
            fail_handshake: AtomicBool::new(false),
        }
    }

    /// Send `payload` to the token and wait for its reply.
    ///
    /// # Errors
    /// Returns `Closed` if the exchange is abandoned by a new handshake.
    pub async fn exchange(&self, payload: impl Into<Bytes>) -> Result<Bytes> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(index, reply_tx);

        self.outgoing_tx
            .send(Outgoing::Message(ProtocolMessage::new(index, payload)))
            .map_err(|_| ProtocolError::Closed)?;

        reply_rx.await.map_err(|_| ProtocolError::Closed)
    }

    /// Queue a frame with an explicit index and no waiter.
    pub fn push_raw(&self, message: ProtocolMessage) {
        self.next_index
            .fetch_max(message.index.saturating_add(1), Ordering::SeqCst);
        let _ = self.outgoing_tx.send(Outgoing::Message(message));
    }

    /// Make `poll` report the end of the session once queued frames drain.
    pub fn finish(&self) {
        let _ = self.outgoing_tx.send(Outgoing::Finish);
    }

    /// Make every following handshake fail.
    pub fn set_fail_handshake(&self, fail: bool) {
        self.fail_handshake.store(fail, Ordering::SeqCst);
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Replies fed in so far, with their indices.
    pub fn received(&self) -> Vec<(u32, Bytes)> {
        lock(&self.received).clone()
    }
}

impl Default for MockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockToken")
            .field("next_index", &self.next_index.load(Ordering::SeqCst))
            .field("handshakes", &self.handshakes())
            .finish()
    }
}

impl TokenProtocol for MockToken {
    async fn new_tag(&self) -> Result<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if self.fail_handshake.load(Ordering::SeqCst) {
            return Err(ProtocolError::HandshakeFailed(
                "token did not answer select".to_string(),
            ));
        }

        let mut stale = 0usize;
        {
            let mut outgoing = self.outgoing_rx.lock().await;
            while outgoing.try_recv().is_ok() {
                stale += 1;
            }
        }
        // dropping the senders fails any exchange left from the previous tag
        lock(&self.pending).clear();

        if stale > 0 {
            debug!(stale, "Discarded frames queued for a previous tag");
        }
        Ok(())
    }

    async fn poll(&self) -> Result<Option<ProtocolMessage>> {
        let mut outgoing = self.outgoing_rx.lock().await;
        match outgoing.recv().await {
            Some(Outgoing::Message(message)) => Ok(Some(message)),
            Some(Outgoing::Finish) => Ok(None),
            None => Err(ProtocolError::Closed),
        }
    }

    async fn incoming_data(&self, index: u32, reply: Bytes) -> Result<()> {
        lock(&self.received).push((index, reply.clone()));
        match lock(&self.pending).remove(&index) {
            Some(waiter) => {
                // the requester may have given up; that is not a protocol error
                let _ = waiter.send(reply);
                Ok(())
            }
            None if index < self.next_index.load(Ordering::SeqCst) => Ok(()),
            None => Err(ProtocolError::UnexpectedReply { index }),
        }
    }
}
