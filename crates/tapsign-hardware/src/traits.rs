//! Tag transport and tap detection traits.
//!
//! These traits are the contract between the session layer and whatever
//! platform delivers taps: a [`TagDetector`] turns physical taps into
//! [`ScanEvent`]s for the currently armed request code, and a
//! [`TagTransport`] exchanges raw frames with one tapped token.
//!
//! Async methods are declared as `fn .. -> impl Future<Output = ..> + Send`
//! (Rust 1.90 + Edition 2024 RPITIT) so generic callers can spawn them on a
//! multi-threaded Tokio runtime. Implementations simply write `async fn`.
//!
//! # Object Safety and Dynamic Dispatch
//!
//! **NOTE**: These traits are NOT object-safe because the async methods
//! return opaque `impl Future` types. For dynamic dispatch use the enum
//! wrappers in [`devices`](crate::devices).

use crate::error::Result;
use crate::types::{ScanEvent, TagInfo};
use std::future::Future;
use std::time::Duration;
use tapsign_core::RequestCode;

/// Duplex byte channel to one tapped token.
///
/// Methods take `&self` so the transport can be shared (`Arc`) between the
/// poll/feed loop and the session that owns it.
///
/// # Examples
///
/// ```no_run
/// use tapsign_hardware::traits::TagTransport;
/// use tapsign_hardware::error::Result;
///
/// async fn select_applet<T: TagTransport>(tag: &T) -> Result<Vec<u8>> {
///     tag.transceive(&[0x00, 0xA4, 0x04, 0x00]).await
/// }
/// ```
pub trait TagTransport: Send + Sync {
    /// Open the link with the given per-frame timeout.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if the tag is no longer in the field.
    fn connect(&self, timeout: Duration) -> Result<()>;

    /// Send one frame and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` or `Timeout` when the link is lost, or another
    /// variant for framing and protocol failures.
    fn transceive(&self, command: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Live check against the link, not a cached flag.
    fn is_connected(&self) -> bool;

    /// Close the link. Closing an already closed tag is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform fails to release the channel.
    fn close(&self) -> Result<()>;

    /// Metadata captured at discovery.
    fn info(&self) -> &TagInfo;
}

/// Platform tap detection, armed for one request code at a time.
///
/// `enable_detection` must be called after the caller has recorded which
/// code is armed, and any previous detection state must be disabled first.
pub trait TagDetector: Send {
    /// Whether the radio can detect taps at all.
    fn is_available(&self) -> bool;

    /// Start delivering taps stamped with `code`.
    ///
    /// # Errors
    ///
    /// Returns `DetectionUnavailable` if the radio cannot be enabled.
    fn enable_detection(&mut self, code: RequestCode) -> Result<()>;

    /// Stop delivering taps. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the request.
    fn disable_detection(&mut self) -> Result<()>;

    /// Wait for the next tap.
    ///
    /// Cancel-safe: dropping the future before it resolves loses no event.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if the detector has shut down.
    fn next_scan(&mut self) -> impl Future<Output = Result<ScanEvent>> + Send;
}
