//! Tap correlation and the single live token session.
//!
//! [`TokenSessionManager`] owns the tap detector and at most one
//! [`TokenSession`]. Taps are matched against the request code armed at the
//! moment they are consumed; anything else is a stray from an earlier
//! screen and is dropped without touching the current session.
//!
//! # Lifecycle
//!
//! ```text
//!  arm_request(code) ──▶ armed ──tap(code)──▶ disarmed, previous session closed,
//!        ▲                  │                  new session connected
//!        │                  └──tap(other)──▶ dropped
//!        └────────────── re-arm after a lost session
//! ```
//!
//! Dropping the manager disarms detection and closes the session.

use crate::config::FlowConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tapsign_core::RequestCode;
use tapsign_hardware::{
    AnyDetector, AnyTag, HardwareError, NdefRecord, ScanEvent, TagDetector, TagTransport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Live duplex channel to the currently tapped token.
#[derive(Debug)]
pub struct TokenSession {
    id: Uuid,
    tag: Arc<AnyTag>,
    request_code: RequestCode,
    records: Vec<NdefRecord>,
    handshake_complete: bool,
    opened_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl TokenSession {
    fn open(event: ScanEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tag: Arc::new(event.tag),
            request_code: event.request_code,
            records: event.records,
            handshake_complete: false,
            opened_at: now,
            last_seen_at: now,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Shared transport handle for executors and the protocol engine.
    pub fn tag(&self) -> Arc<AnyTag> {
        Arc::clone(&self.tag)
    }

    pub fn request_code(&self) -> RequestCode {
        self.request_code
    }

    pub fn records(&self) -> &[NdefRecord] {
        &self.records
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Cancelled when the session is closed or its protocol loop fails.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live check against the tag, not a cached flag.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && self.tag.is_connected()
    }

    /// Exchange one frame with the token.
    ///
    /// # Errors
    /// `Disconnected` once the session is closed or the tag has left.
    pub async fn transceive(&mut self, command: &[u8]) -> tapsign_hardware::Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(HardwareError::disconnected(format!("session {}", self.id)));
        }
        let reply = self.tag.transceive(command).await?;
        self.last_seen_at = Utc::now();
        Ok(reply)
    }

    fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.tag.close() {
            warn!(session = %self.id, error = %e, "Failed to close tag");
        }
        debug!(session = %self.id, "Session closed");
    }
}

/// Binds taps to the armed operation and owns the live session.
#[derive(Debug)]
pub struct TokenSessionManager {
    detector: AnyDetector,
    armed: Option<RequestCode>,
    session: Option<TokenSession>,
    transceive_timeout: Duration,
}

impl TokenSessionManager {
    pub fn new(detector: AnyDetector, transceive_timeout: Duration) -> Self {
        Self {
            detector,
            armed: None,
            session: None,
            transceive_timeout,
        }
    }

    pub fn from_config(detector: AnyDetector, config: &FlowConfig) -> Self {
        Self::new(detector, config.transceive_timeout())
    }

    pub fn detection_available(&self) -> bool {
        self.detector.is_available()
    }

    /// Await a tap on the given code only.
    ///
    /// The code is recorded before detection is enabled, and any previous
    /// detection is disabled first. Re-arming the same code does nothing.
    ///
    /// # Errors
    /// Returns the detector's error if detection cannot be enabled; the
    /// manager is left disarmed.
    pub fn arm_request(&mut self, code: RequestCode) -> tapsign_hardware::Result<()> {
        if self.armed == Some(code) {
            return Ok(());
        }
        if self.armed.take().is_some() {
            self.detector.disable_detection()?;
        }

        self.armed = Some(code);
        if let Err(e) = self.detector.enable_detection(code) {
            self.armed = None;
            return Err(e);
        }
        info!(%code, "Armed for tap");
        Ok(())
    }

    /// Stop waiting for taps. Idempotent.
    ///
    /// # Errors
    /// Returns the detector's error if detection cannot be disabled.
    pub fn disarm(&mut self) -> tapsign_hardware::Result<()> {
        if let Some(code) = self.armed.take() {
            self.detector.disable_detection()?;
            debug!(%code, "Disarmed");
        }
        Ok(())
    }

    pub fn armed(&self) -> Option<RequestCode> {
        self.armed
    }

    /// Wait for the detector's next tap.
    ///
    /// # Errors
    /// Returns the detector's error, e.g. when its event source is gone.
    pub async fn next_scan(&mut self) -> tapsign_hardware::Result<ScanEvent> {
        self.detector.next_scan().await
    }

    /// Consume a tap.
    ///
    /// Returns the id of the new session, or `None` when the tap was a stray
    /// and has been dropped. A matching tap disarms detection, closes the
    /// previous session, and connects the new tag before it is exposed.
    ///
    /// # Errors
    /// Returns `Transport` if the tapped tag cannot be connected.
    pub fn on_tag_detected(&mut self, event: ScanEvent) -> Result<Option<Uuid>> {
        if self.armed != Some(event.request_code) {
            debug!(
                code = %event.request_code,
                armed = ?self.armed.map(|c| c.as_u16()),
                "Dropping stray tap"
            );
            return Ok(None);
        }

        if let Err(e) = self.disarm() {
            warn!(error = %e, "Failed to disarm after tap");
        }
        self.close_session();

        event.tag.connect(self.transceive_timeout)?;
        let session = TokenSession::open(event);
        let id = session.id;
        info!(
            session = %id,
            code = %session.request_code,
            tag = %session.tag.info().id_hex(),
            "Session opened"
        );
        self.session = Some(session);
        Ok(Some(id))
    }

    /// Mark session `id` as ready for actions. Returns false if `id` is no
    /// longer the live session.
    pub fn mark_ready(&mut self, id: Uuid) -> bool {
        match &mut self.session {
            Some(session) if session.id == id => {
                session.handshake_complete = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_session_active(&self) -> bool {
        self.session.as_ref().is_some_and(TokenSession::is_connected)
    }

    /// Active and past any handshake.
    pub fn is_session_ready(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.handshake_complete && s.is_connected())
    }

    pub fn session(&self) -> Option<&TokenSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut TokenSession> {
        self.session.as_mut()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(TokenSession::id)
    }

    /// Close the live session, if any.
    pub fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    /// Disarm and close. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if let Err(e) = self.disarm() {
            warn!(error = %e, "Failed to disarm on teardown");
        }
        self.close_session();
    }
}

impl Drop for TokenSessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
