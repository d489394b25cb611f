//! Tag transport and tap detection layer for tapsign.
//!
//! This crate provides trait-based abstractions over the two things a
//! platform gives the session layer when a hardware token is tapped:
//!
//! - a [`TagDetector`] that turns physical taps into [`ScanEvent`]s stamped
//!   with the request code armed at the time, and
//! - a [`TagTransport`] that exchanges raw frames with the tapped token and
//!   reports when the token has left the field.
//!
//! # Design Philosophy
//!
//! - **Async-first**: transceive and scan waits are asynchronous, declared
//!   with RPITIT so generic callers get `Send` futures.
//! - **Enum dispatch**: the traits are not object-safe, so the
//!   [`devices`] module wraps implementations in [`AnyTag`] and
//!   [`AnyDetector`].
//! - **Error-aware**: link loss is distinguishable from other failures via
//!   [`HardwareError::is_link_loss`].
//!
//! # Example
//!
//! ```no_run
//! use tapsign_core::RequestCode;
//! use tapsign_hardware::traits::{TagDetector, TagTransport};
//! use tapsign_hardware::error::Result;
//! use std::time::Duration;
//!
//! async fn read_status<D: TagDetector>(detector: &mut D) -> Result<Vec<u8>> {
//!     detector.enable_detection(RequestCode::STATUS)?;
//!     let event = detector.next_scan().await?;
//!     detector.disable_detection()?;
//!
//!     event.tag.connect(Duration::from_millis(1000))?;
//!     let reply = event.tag.transceive(&[0x00, 0xB0, 0x00, 0x00]).await;
//!     event.tag.close()?;
//!     reply
//! }
//! ```
//!
//! # Mock Implementations
//!
//! [`mock::MockTag`] and [`mock::MockDetector`] come with control handles for
//! driving taps, replies and disconnections from tests.
//!
//! [`AnyTag`]: devices::AnyTag
//! [`AnyDetector`]: devices::AnyDetector

pub mod devices;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyDetector, AnyTag};
pub use error::{HardwareError, Result};
pub use traits::{TagDetector, TagTransport};
pub use types::{
    MAX_UID_LENGTH, MIN_UID_LENGTH, NdefRecord, ScanEvent, TNF_WELL_KNOWN, TagInfo,
    TagTechnology,
};
