//! Session and authentication layer for tapsign.
//!
//! Turns a sequence of momentary taps into an authenticated, single-slot
//! command channel to a hardware token:
//!
//! - [`classifier`] reduces raw failures to four [`ErrorKind`]s,
//! - [`auth`] gates actions behind a secret with a bounded retry counter,
//! - [`session`] binds taps to the armed request code and owns the one live
//!   session,
//! - [`pending`] defers one action until a session and a secret are both
//!   available,
//! - [`flow`] ties them together with the protocol engine and exposes the
//!   event stream a UI consumes.
//!
//! # Example
//!
//! ```no_run
//! use tapsign_core::{RequestCode, Secret};
//! use tapsign_hardware::AnyDetector;
//! use tapsign_hardware::mock::{MockDetector, MockTag};
//! use tapsign_session::mock::{MOCK_FINGERPRINT, MOCK_SECRET, MockSigner};
//! use tapsign_session::{FlowConfig, PendingAction, TapFlow};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (detector, taps) = MockDetector::new();
//!     let (signer, _) = MockSigner::new();
//!     let (flow, mut events) =
//!         TapFlow::new(FlowConfig::default(), AnyDetector::Mock(detector), signer)?;
//!     let flow = flow.spawn();
//!
//!     flow.start_flow(RequestCode::SIGN_TRANSACTION, None).await?;
//!     flow.submit_secret(Secret::cvc(MOCK_SECRET)?).await?;
//!     flow.enqueue(PendingAction::SignTransaction {
//!         fingerprint: MOCK_FINGERPRINT.parse()?,
//!         payload: "cHNidP8B".to_string(),
//!     })
//!     .await?;
//!
//!     let (tag, _) = MockTag::new();
//!     taps.tap(tag).await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod flow;
pub mod mock;
pub mod pending;
pub mod session;

pub use action::{ActionOutput, PendingAction, SetupParams, TokenStatus};
pub use auth::{AuthPhase, AuthState, AuthenticationGate, DeviceAuthStatus, FailureOutcome};
pub use classifier::{ErrorKind, classify};
pub use config::FlowConfig;
pub use error::{Result, SessionError};
pub use executor::{ActionExecutor, ExecutionContext};
pub use flow::{FlowEvent, FlowHandle, FlowProgress, TapFlow};
pub use pending::{Completion, Dispatch, PendingActionQueue, Readiness};
pub use session::{TokenSession, TokenSessionManager};
