//! Mock tag implementation for testing and development.
//!
//! A [`MockTag`] answers frames from a script of [`MockReply`] values, or
//! from a responder closure once the script runs dry. Its [`MockTagHandle`]
//! can pull the tag out of the field at any moment, which is how tests
//! exercise mid-session disconnection.

use crate::{
    HardwareError, Result,
    traits::TagTransport,
    types::{TagInfo, TagTechnology},
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default UID used by [`MockTag::new`].
const DEFAULT_MOCK_UID: [u8; 7] = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];

type Responder = Box<dyn Fn(&[u8]) -> MockReply + Send + Sync>;

/// Scripted outcome of one transceive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Reply with these bytes.
    Data(Vec<u8>),

    /// The tag leaves the field during this exchange.
    Lost,

    /// The tag stays silent until the link timeout.
    Timeout,

    /// Link-level error that is not a loss of the tag.
    Error(String),
}

struct TagState {
    in_range: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
    timeout_ms: AtomicU64,
    latency_ms: AtomicU64,
    replies: Mutex<VecDeque<MockReply>>,
    responder: Mutex<Option<Responder>>,
    transcript: Mutex<Vec<Vec<u8>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock tapped token.
///
/// # Examples
///
/// ```
/// use tapsign_hardware::mock::{MockReply, MockTag};
/// use tapsign_hardware::traits::TagTransport;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> tapsign_hardware::Result<()> {
///     let (tag, handle) = MockTag::new();
///     handle.queue_reply(MockReply::Data(vec![0x90, 0x00]));
///
///     tag.connect(Duration::from_millis(1000))?;
///     let reply = tag.transceive(&[0x00, 0xA4]).await?;
///     assert_eq!(reply, vec![0x90, 0x00]);
///
///     handle.remove();
///     assert!(tag.transceive(&[0x00]).await.is_err());
///     Ok(())
/// }
/// ```
pub struct MockTag {
    info: TagInfo,
    state: Arc<TagState>,
}

impl MockTag {
    /// Create a mock tag with a default ISO-DEP identity, in the field but
    /// not yet connected.
    pub fn new() -> (Self, MockTagHandle) {
        let info = TagInfo {
            id: DEFAULT_MOCK_UID.to_vec(),
            technologies: vec![TagTechnology::NfcA, TagTechnology::IsoDep],
            max_transceive_length: Some(253),
        };
        Self::with_info(info)
    }

    /// Create a mock tag with custom metadata.
    pub fn with_info(info: TagInfo) -> (Self, MockTagHandle) {
        let state = Arc::new(TagState {
            in_range: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            timeout_ms: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0),
            replies: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            transcript: Mutex::new(Vec::new()),
        });

        let handle = MockTagHandle {
            state: Arc::clone(&state),
        };

        (Self { info, state }, handle)
    }

    fn drop_link(&self) -> HardwareError {
        self.state.connected.store(false, Ordering::SeqCst);
        HardwareError::disconnected(format!("tag {}", self.info.id_hex()))
    }

    fn next_reply(&self, command: &[u8]) -> MockReply {
        if let Some(reply) = lock(&self.state.replies).pop_front() {
            return reply;
        }
        match lock(&self.state.responder).as_ref() {
            Some(responder) => responder(command),
            None => MockReply::Error("no scripted reply".to_string()),
        }
    }
}

impl fmt::Debug for MockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTag")
            .field("id", &self.info.id_hex())
            .field("connected", &self.state.connected.load(Ordering::SeqCst))
            .field("in_range", &self.state.in_range.load(Ordering::SeqCst))
            .finish()
    }
}

impl TagTransport for MockTag {
    fn connect(&self, timeout: Duration) -> Result<()> {
        if !self.state.in_range.load(Ordering::SeqCst) {
            return Err(self.drop_link());
        }
        self.state
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
        self.state.closed.store(false, Ordering::SeqCst);
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn transceive(&self, command: &[u8]) -> Result<Vec<u8>> {
        if !self.state.connected.load(Ordering::SeqCst)
            || !self.state.in_range.load(Ordering::SeqCst)
        {
            return Err(self.drop_link());
        }

        lock(&self.state.transcript).push(command.to_vec());

        let timeout_ms = self.state.timeout_ms.load(Ordering::SeqCst);
        let latency_ms = self.state.latency_ms.load(Ordering::SeqCst);
        if latency_ms > 0 {
            if timeout_ms > 0 && latency_ms > timeout_ms {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                return Err(HardwareError::timeout(timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        // the tag may have been pulled away while the frame was in flight
        if !self.state.in_range.load(Ordering::SeqCst) {
            return Err(self.drop_link());
        }

        match self.next_reply(command) {
            MockReply::Data(bytes) => Ok(bytes),
            MockReply::Lost => {
                self.state.in_range.store(false, Ordering::SeqCst);
                Err(self.drop_link())
            }
            MockReply::Timeout => Err(HardwareError::timeout(timeout_ms)),
            MockReply::Error(message) => Err(HardwareError::communication(message)),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst) && self.state.in_range.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.state.close_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn info(&self) -> &TagInfo {
        &self.info
    }
}

/// Handle for controlling a mock tag from test code.
#[derive(Clone)]
pub struct MockTagHandle {
    state: Arc<TagState>,
}

impl MockTagHandle {
    /// Append a scripted reply.
    pub fn queue_reply(&self, reply: MockReply) {
        lock(&self.state.replies).push_back(reply);
    }

    /// Append a data reply.
    pub fn queue_data(&self, bytes: impl Into<Vec<u8>>) {
        self.queue_reply(MockReply::Data(bytes.into()));
    }

    /// Answer frames with `responder` once the script is exhausted.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> MockReply + Send + Sync + 'static,
    {
        *lock(&self.state.responder) = Some(Box::new(responder));
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Pull the tag out of the field.
    pub fn remove(&self) {
        self.state.in_range.store(false, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
    }

    /// Put the tag back in the field. It must be connected again before use.
    pub fn restore(&self) {
        self.state.in_range.store(true, Ordering::SeqCst);
    }

    /// Whether the link is currently usable.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst) && self.state.in_range.load(Ordering::SeqCst)
    }

    /// Whether `close()` was called since the last connect.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Number of distinct closes.
    pub fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }

    /// Timeout applied by the last connect, in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.state.timeout_ms.load(Ordering::SeqCst)
    }

    /// Every frame sent to the tag so far.
    pub fn transcript(&self) -> Vec<Vec<u8>> {
        lock(&self.state.transcript).clone()
    }
}

impl fmt::Debug for MockTagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTagHandle")
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}
