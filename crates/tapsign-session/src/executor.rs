//! Seam to the business operations that run once a session is ready.

use crate::action::{ActionOutput, PendingAction};
use crate::error::SessionError;
use std::future::Future;
use std::sync::Arc;
use tapsign_core::{RequestCode, Secret};
use tapsign_hardware::AnyTag;
use uuid::Uuid;

/// Everything an executor gets for one dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: Uuid,
    pub request_code: RequestCode,
    pub tag: Arc<AnyTag>,
    /// Held secret, `None` when the action runs without one.
    pub secret: Option<Secret>,
}

/// Runs a [`PendingAction`] against a live session.
///
/// Failures are returned raw; the flow classifies them. An executor must not
/// retry on its own.
pub trait ActionExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        action: PendingAction,
        ctx: ExecutionContext,
    ) -> impl Future<Output = Result<ActionOutput, SessionError>> + Send;
}
