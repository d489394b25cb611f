//! End-to-end scenarios over the mock detector, tags and signer.
//!
//! Every flow event is printed to stdout as one JSON line.

use anyhow::{Context, bail};
use std::sync::Arc;
use std::time::Duration;
use tapsign_core::{Fingerprint, RequestCode, Secret, WalletId};
use tapsign_hardware::AnyDetector;
use tapsign_hardware::mock::{MockDetector, MockDetectorHandle, MockReply, MockTag};
use tapsign_protocol::{AnyProtocol, MockToken};
use tapsign_session::mock::{MOCK_FINGERPRINT, MockSigner, MockSignerHandle};
use tapsign_session::{FlowConfig, FlowEvent, FlowHandle, FlowProgress, PendingAction, TapFlow};
use tokio::sync::mpsc;
use tracing::{debug, info};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A spawned flow plus the mock controls standing in for the user.
pub struct Rig {
    flow: FlowHandle,
    events: mpsc::Receiver<FlowEvent>,
    taps: MockDetectorHandle,
    signer: MockSignerHandle,
}

impl Rig {
    pub fn new(config: FlowConfig) -> anyhow::Result<Self> {
        Self::build(config, None)
    }

    /// Rig whose signer speaks the poll/feed protocol.
    pub fn portal(config: FlowConfig) -> anyhow::Result<Self> {
        Self::build(config, Some(Arc::new(MockToken::new())))
    }

    fn build(config: FlowConfig, token: Option<Arc<MockToken>>) -> anyhow::Result<Self> {
        let (detector, taps) = MockDetector::new();
        let (signer, signer_handle) = MockSigner::new();
        let signer = match &token {
            Some(token) => signer.with_token(Arc::clone(token)),
            None => signer,
        };

        let (flow, events) = TapFlow::new(config, AnyDetector::Mock(detector), signer)?;
        let flow = match token {
            Some(token) => flow.with_protocol(AnyProtocol::Mock(token)),
            None => flow,
        };

        Ok(Self {
            flow: flow.spawn(),
            events,
            taps,
            signer: signer_handle,
        })
    }

    async fn tap(&self) -> anyhow::Result<()> {
        let (tag, handle) = MockTag::new();
        handle.set_responder(|_| MockReply::Data(vec![0x90, 0x00]));
        self.taps.tap(tag).await?;
        info!(armed = ?self.taps.armed(), "Tag tapped");
        Ok(())
    }

    /// Print events until one matches `done`, returning it.
    async fn watch(&mut self, done: impl Fn(&FlowEvent) -> bool) -> anyhow::Result<FlowEvent> {
        loop {
            let event = tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .context("timed out waiting for a flow event")?
                .context("flow stopped")?;
            println!("{}", serde_json::to_string(&event)?);
            if done(&event) {
                return Ok(event);
            }
        }
    }

    async fn finish(self, last: FlowEvent) -> anyhow::Result<()> {
        debug!(executed = ?self.signer.executed(), "Signer transcript");
        self.flow.shutdown().await?;
        match last {
            FlowEvent::Failure { kind, detail } => bail!("flow failed ({kind:?}): {detail}"),
            FlowEvent::WrongSecret { attempts_remaining } => {
                bail!("secret rejected, {attempts_remaining} attempts left")
            }
            _ => Ok(()),
        }
    }
}

fn is_outcome(event: &FlowEvent) -> bool {
    matches!(
        event,
        FlowEvent::Success(_) | FlowEvent::Failure { .. } | FlowEvent::LockedOut
    )
}

pub async fn export(mut rig: Rig, wallet: &str) -> anyhow::Result<()> {
    rig.signer.set_secret(None);
    rig.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await?;
    rig.flow
        .enqueue(PendingAction::ExportWallet(WalletId::new(wallet)?))
        .await?;

    rig.watch(|e| matches!(e, FlowEvent::PromptForTap { .. }))
        .await?;
    rig.tap().await?;
    let last = rig.watch(is_outcome).await?;
    rig.finish(last).await
}

pub async fn sign(mut rig: Rig, secret: &str, payload: String) -> anyhow::Result<()> {
    rig.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await?;
    rig.watch(|e| matches!(e, FlowEvent::PromptForSecret { .. }))
        .await?;

    rig.flow.submit_secret(Secret::new(secret)?).await?;
    rig.flow
        .enqueue(PendingAction::SignTransaction {
            fingerprint: Fingerprint::new(MOCK_FINGERPRINT)?,
            payload,
        })
        .await?;
    rig.tap().await?;

    let last = rig
        .watch(|e| matches!(e, FlowEvent::WrongSecret { .. }) || is_outcome(e))
        .await?;
    rig.finish(last).await
}

pub async fn lockout(mut rig: Rig, wrong: &str) -> anyhow::Result<()> {
    let wrong = Secret::new(wrong)?;
    rig.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await?;
    rig.flow
        .enqueue(PendingAction::SignTransaction {
            fingerprint: Fingerprint::new(MOCK_FINGERPRINT)?,
            payload: "cHNidP8BAHECAAAAAQ".to_string(),
        })
        .await?;
    rig.tap().await?;
    rig.watch(|e| matches!(e, FlowEvent::Progress(FlowProgress::SessionOpened { .. })))
        .await?;

    loop {
        rig.flow.submit_secret(wrong.clone()).await?;
        let event = rig
            .watch(|e| matches!(e, FlowEvent::WrongSecret { .. }) || is_outcome(e))
            .await?;
        if !matches!(event, FlowEvent::WrongSecret { .. }) {
            info!(attempts_left = rig.signer.attempts_remaining(), "Flow settled");
            return rig.finish(event).await;
        }
    }
}
