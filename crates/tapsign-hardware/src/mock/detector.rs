//! Mock tap detector for testing and development.
//!
//! Taps sent through [`MockDetectorHandle::tap`] are stamped with whatever
//! request code is armed when the detector picks them up, which mirrors how
//! a platform dispatches a tap to the currently registered receiver. Taps
//! that arrive while detection is disabled are discarded.
//!
//! [`MockDetectorHandle::tap_stamped`] delivers an event that was already
//! stamped with some code, which is how a stray tap from a screen that has
//! since re-armed looks to the session layer.

use crate::{
    HardwareError, Result,
    devices::AnyTag,
    mock::MockTag,
    traits::TagDetector,
    types::{NdefRecord, ScanEvent},
};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tapsign_core::RequestCode;
use tapsign_core::constants::DISARMED_REQUEST_CODE;
use tokio::sync::mpsc;
use tracing::debug;

/// One change of the detector's armed state, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionChange {
    Enabled(RequestCode),
    Disabled,
}

#[derive(Debug)]
enum TapEvent {
    Tap {
        tag: MockTag,
        records: Vec<NdefRecord>,
    },
    Stamped {
        code: RequestCode,
        tag: MockTag,
        records: Vec<NdefRecord>,
    },
}

#[derive(Debug)]
struct DetectorState {
    armed: AtomicU16,
    available: AtomicBool,
    history: Mutex<Vec<DetectionChange>>,
}

impl DetectorState {
    fn armed(&self) -> Option<RequestCode> {
        RequestCode::new(self.armed.load(Ordering::SeqCst)).ok()
    }

    fn record(&self, change: DetectionChange) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(change);
    }
}

/// Mock tap detector.
///
/// # Examples
///
/// ```
/// use tapsign_core::RequestCode;
/// use tapsign_hardware::mock::{MockDetector, MockTag};
/// use tapsign_hardware::traits::TagDetector;
///
/// #[tokio::main]
/// async fn main() -> tapsign_hardware::Result<()> {
///     let (mut detector, handle) = MockDetector::new();
///     detector.enable_detection(RequestCode::STATUS)?;
///
///     let (tag, _tag_handle) = MockTag::new();
///     handle.tap(tag).await?;
///
///     let event = detector.next_scan().await?;
///     assert_eq!(event.request_code, RequestCode::STATUS);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockDetector {
    event_rx: mpsc::Receiver<TapEvent>,
    state: Arc<DetectorState>,
}

impl MockDetector {
    /// Create a detector whose radio is available.
    pub fn new() -> (Self, MockDetectorHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let state = Arc::new(DetectorState {
            armed: AtomicU16::new(DISARMED_REQUEST_CODE),
            available: AtomicBool::new(true),
            history: Mutex::new(Vec::new()),
        });

        let handle = MockDetectorHandle {
            event_tx,
            state: Arc::clone(&state),
        };

        (Self { event_rx, state }, handle)
    }

    /// Currently armed code, if any.
    pub fn armed(&self) -> Option<RequestCode> {
        self.state.armed()
    }
}

impl TagDetector for MockDetector {
    fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    fn enable_detection(&mut self, code: RequestCode) -> Result<()> {
        if !self.is_available() {
            return Err(HardwareError::detection_unavailable("mock radio disabled"));
        }
        self.state.armed.store(code.as_u16(), Ordering::SeqCst);
        self.state.record(DetectionChange::Enabled(code));
        Ok(())
    }

    fn disable_detection(&mut self) -> Result<()> {
        self.state
            .armed
            .store(DISARMED_REQUEST_CODE, Ordering::SeqCst);
        self.state.record(DetectionChange::Disabled);
        Ok(())
    }

    async fn next_scan(&mut self) -> Result<ScanEvent> {
        loop {
            let event = self
                .event_rx
                .recv()
                .await
                .ok_or_else(|| HardwareError::disconnected("tag detector channel closed"))?;

            match event {
                TapEvent::Tap { tag, records } => match self.state.armed() {
                    Some(code) => return Ok(ScanEvent::new(code, AnyTag::Mock(tag), records)),
                    None => debug!("Tap ignored: detection disabled"),
                },
                TapEvent::Stamped { code, tag, records } => {
                    return Ok(ScanEvent::new(code, AnyTag::Mock(tag), records));
                }
            }
        }
    }
}

/// Handle for simulating taps on a mock detector.
#[derive(Debug, Clone)]
pub struct MockDetectorHandle {
    event_tx: mpsc::Sender<TapEvent>,
    state: Arc<DetectorState>,
}

impl MockDetectorHandle {
    /// Tap a tag against the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector has been dropped.
    pub async fn tap(&self, tag: MockTag) -> Result<()> {
        self.tap_with_records(tag, Vec::new()).await
    }

    /// Tap a tag that carries NDEF records.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector has been dropped.
    pub async fn tap_with_records(&self, tag: MockTag, records: Vec<NdefRecord>) -> Result<()> {
        self.send(TapEvent::Tap { tag, records }).await
    }

    /// Deliver a tap already stamped with `code`, regardless of what is armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector has been dropped.
    pub async fn tap_stamped(&self, code: RequestCode, tag: MockTag) -> Result<()> {
        self.send(TapEvent::Stamped {
            code,
            tag,
            records: Vec::new(),
        })
        .await
    }

    /// Turn the simulated radio on or off.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Currently armed code, if any.
    pub fn armed(&self) -> Option<RequestCode> {
        self.state.armed()
    }

    /// Every enable/disable in order.
    pub fn history(&self) -> Vec<DetectionChange> {
        self.state
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn send(&self, event: TapEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HardwareError::disconnected("mock detector dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TagTransport;

    #[tokio::test]
    async fn test_tap_stamped_with_armed_code() {
        let (mut detector, handle) = MockDetector::new();
        detector.enable_detection(RequestCode::EXPORT_WALLET).unwrap();

        let (tag, _tag_handle) = MockTag::new();
        handle.tap(tag).await.unwrap();

        let event = detector.next_scan().await.unwrap();
        assert_eq!(event.request_code, RequestCode::EXPORT_WALLET);
        assert!(!event.tag.is_connected());
    }

    #[tokio::test]
    async fn test_tap_while_disabled_is_discarded() {
        let (mut detector, handle) = MockDetector::new();

        let (first, _h1) = MockTag::new();
        handle.tap(first).await.unwrap();
        let (second, _h2) = MockTag::new();
        handle
            .tap_stamped(RequestCode::STATUS, second)
            .await
            .unwrap();

        // first tap dropped, the stamped one comes through as-is
        let event = detector.next_scan().await.unwrap();
        assert_eq!(event.request_code, RequestCode::STATUS);
    }

    #[tokio::test]
    async fn test_records_are_forwarded() {
        let (mut detector, handle) = MockDetector::new();
        detector.enable_detection(RequestCode::STATUS).unwrap();

        let (tag, _tag_handle) = MockTag::new();
        handle
            .tap_with_records(tag, vec![NdefRecord::uri("https://example.com")])
            .await
            .unwrap();

        let event = detector.next_scan().await.unwrap();
        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].as_uri(), Some("https://example.com"));
    }

    #[test]
    fn test_history_and_armed_state() {
        let (mut detector, handle) = MockDetector::new();
        detector.enable_detection(RequestCode::STATUS).unwrap();
        detector.disable_detection().unwrap();
        detector
            .enable_detection(RequestCode::SIGN_TRANSACTION)
            .unwrap();

        assert_eq!(handle.armed(), Some(RequestCode::SIGN_TRANSACTION));
        assert_eq!(
            handle.history(),
            vec![
                DetectionChange::Enabled(RequestCode::STATUS),
                DetectionChange::Disabled,
                DetectionChange::Enabled(RequestCode::SIGN_TRANSACTION),
            ]
        );
    }

    #[test]
    fn test_unavailable_radio() {
        let (mut detector, handle) = MockDetector::new();
        handle.set_available(false);

        let error = detector.enable_detection(RequestCode::STATUS).unwrap_err();
        assert!(matches!(error, HardwareError::DetectionUnavailable { .. }));
        assert_eq!(handle.armed(), None);
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (mut detector, handle) = MockDetector::new();
        drop(handle);

        let error = detector.next_scan().await.unwrap_err();
        assert!(matches!(error, HardwareError::Disconnected { .. }));
    }
}
