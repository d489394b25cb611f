//! Enum wrappers for tag and detector dispatch.
//!
//! Native async methods in traits are not object-safe, so `Box<dyn
//! TagTransport>` is not an option. These enums give concrete dispatch at
//! compile time instead, and are the types the session layer stores.
//!
//! # Examples
//!
//! ```
//! use tapsign_hardware::devices::AnyTag;
//! use tapsign_hardware::mock::MockTag;
//! use tapsign_hardware::traits::TagTransport;
//!
//! let (tag, _handle) = MockTag::new();
//! let any_tag = AnyTag::Mock(tag);
//! assert!(!any_tag.is_connected());
//! ```

use crate::mock::{MockDetector, MockTag};
use crate::traits::{TagDetector, TagTransport};
use crate::types::{ScanEvent, TagInfo};
use crate::Result;
use std::time::Duration;
use tapsign_core::RequestCode;

/// Enum wrapper for tag transport dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTag {
    /// Mock tag for development and testing.
    Mock(MockTag),
}

impl TagTransport for AnyTag {
    fn connect(&self, timeout: Duration) -> Result<()> {
        match self {
            Self::Mock(tag) => tag.connect(timeout),
        }
    }

    async fn transceive(&self, command: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Mock(tag) => tag.transceive(command).await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Mock(tag) => tag.is_connected(),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Self::Mock(tag) => tag.close(),
        }
    }

    fn info(&self) -> &TagInfo {
        match self {
            Self::Mock(tag) => tag.info(),
        }
    }
}

/// Enum wrapper for tap detector dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDetector {
    /// Mock detector for development and testing.
    Mock(MockDetector),
}

impl TagDetector for AnyDetector {
    fn is_available(&self) -> bool {
        match self {
            Self::Mock(detector) => detector.is_available(),
        }
    }

    fn enable_detection(&mut self, code: RequestCode) -> Result<()> {
        match self {
            Self::Mock(detector) => detector.enable_detection(code),
        }
    }

    fn disable_detection(&mut self) -> Result<()> {
        match self {
            Self::Mock(detector) => detector.disable_detection(),
        }
    }

    async fn next_scan(&mut self) -> Result<ScanEvent> {
        match self {
            Self::Mock(detector) => detector.next_scan().await,
        }
    }
}
