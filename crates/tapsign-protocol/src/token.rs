//! Token-side protocol state for poll/feed token families.
//!
//! Some tokens do not answer a single command per tap. Instead a host-side
//! protocol state decides what the next frame is (`poll`), the engine
//! carries it over the tag link, and the reply is handed back (`incoming_data`)
//! under the index it was sent with.

use crate::error::Result;
use crate::message::ProtocolMessage;
use bytes::Bytes;
use std::future::Future;

/// Token-side protocol state driven by [`CardProtocolEngine`](crate::CardProtocolEngine).
///
/// Methods take `&self`: the same state is shared between the engine, which
/// pumps frames, and the code issuing high-level requests against the token.
pub trait TokenProtocol: Send + Sync + 'static {
    /// One-time handshake for a freshly tapped tag.
    ///
    /// Any exchange left over from a previous tag must be abandoned here.
    fn new_tag(&self) -> impl Future<Output = Result<()>> + Send;

    /// Next frame to transport, or `None` when the token has nothing more to
    /// say for this session. May wait until a request produces a frame.
    fn poll(&self) -> impl Future<Output = Result<Option<ProtocolMessage>>> + Send;

    /// Reply bytes for the frame sent under `index`.
    fn incoming_data(&self, index: u32, reply: Bytes) -> impl Future<Output = Result<()>> + Send;
}
