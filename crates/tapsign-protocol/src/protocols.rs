//! Enum wrapper for token protocol dispatch.
//!
//! [`TokenProtocol`] uses native async methods and is not object-safe, so
//! the session layer stores an [`AnyProtocol`] instead of a trait object.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tapsign_protocol::{AnyProtocol, MockToken};
//!
//! let token = Arc::new(MockToken::new());
//! let protocol = AnyProtocol::Mock(Arc::clone(&token));
//! assert_eq!(protocol.name(), "mock");
//! ```

use crate::error::Result;
use crate::message::ProtocolMessage;
use crate::mock::MockToken;
use crate::token::TokenProtocol;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyProtocol {
    /// In-memory poll/feed token. The `Arc` is shared with whoever issues
    /// exchanges against it.
    Mock(Arc<MockToken>),
}

impl AnyProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
        }
    }
}

impl TokenProtocol for AnyProtocol {
    async fn new_tag(&self) -> Result<()> {
        match self {
            Self::Mock(token) => token.new_tag().await,
        }
    }

    async fn poll(&self) -> Result<Option<ProtocolMessage>> {
        match self {
            Self::Mock(token) => token.poll().await,
        }
    }

    async fn incoming_data(&self, index: u32, reply: Bytes) -> Result<()> {
        match self {
            Self::Mock(token) => token.incoming_data(index, reply).await,
        }
    }
}
