use bytes::Bytes;
use std::fmt;

/// One outgoing frame produced by the token-side protocol state.
///
/// `index` must be echoed back unchanged when the reply is fed in, so the
/// protocol state can reject stale or misordered replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub index: u32,
    pub payload: Bytes,
}

impl ProtocolMessage {
    pub fn new(index: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} ({} bytes)", self.index, self.payload.len())
    }
}
