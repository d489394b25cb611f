//! End-to-end flow tests against the spawned flow task.

mod common;

use common::*;
use tapsign_core::{RequestCode, WalletId};
use tapsign_hardware::mock::MockTag;
use tapsign_session::{ActionOutput, ErrorKind, FlowEvent, FlowProgress};

fn is_success(event: &FlowEvent) -> bool {
    matches!(event, FlowEvent::Success(_))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_export_without_secret_then_teardown() {
    let mut fx = Fixture::new();
    fx.signer.set_secret(None);

    fx.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await
        .unwrap();
    fx.flow.enqueue(export_action("vault")).await.unwrap();
    assert_eq!(
        fx.next().await,
        FlowEvent::PromptForTap {
            request_code: RequestCode::EXPORT_WALLET
        }
    );

    let tag = fx.tap().await;
    let seen = fx.until(is_success).await;
    assert!(matches!(
        seen[0],
        FlowEvent::Progress(FlowProgress::SessionOpened { .. })
    ));
    assert!(matches!(
        seen.last(),
        Some(FlowEvent::Success(ActionOutput::WalletExported { wallet_id, .. }))
            if wallet_id.as_str() == "vault"
    ));
    assert!(tag.is_connected());

    fx.flow.shutdown().await.unwrap();
    assert!(tag.is_closed());
    assert_eq!(fx.taps.armed(), None);
}

#[tokio::test]
async fn test_secret_before_tap_executes_on_session() {
    let mut fx = Fixture::new();

    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    assert!(matches!(fx.next().await, FlowEvent::PromptForTap { .. }));
    assert_eq!(
        fx.next().await,
        FlowEvent::PromptForSecret {
            request_code: RequestCode::SIGN_TRANSACTION,
            attempts_remaining: 3
        }
    );

    fx.flow.submit_secret(right_secret()).await.unwrap();
    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.expect_quiet().await;
    assert!(fx.signer.executed().is_empty());

    fx.tap().await;
    let seen = fx.until(is_success).await;
    assert_eq!(seen.len(), 3);
    assert!(matches!(
        seen[2],
        FlowEvent::Success(ActionOutput::TransactionSigned { .. })
    ));
    assert_eq!(fx.signer.executed(), vec!["SignTransaction"]);
}

#[tokio::test]
async fn test_three_wrong_secrets_lock_the_flow() {
    let mut fx = Fixture::new();

    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.next().await;
    fx.next().await;

    let tag = fx.tap().await;
    assert!(matches!(
        fx.next().await,
        FlowEvent::Progress(FlowProgress::SessionOpened { .. })
    ));
    fx.expect_quiet().await;

    for remaining in [2u8, 1] {
        fx.flow.submit_secret(wrong_secret()).await.unwrap();
        let seen = fx.until(|e| matches!(e, FlowEvent::PromptForSecret { .. })).await;
        assert!(seen.contains(&FlowEvent::WrongSecret {
            attempts_remaining: remaining
        }));
        assert_eq!(
            seen.last(),
            Some(&FlowEvent::PromptForSecret {
                request_code: RequestCode::SIGN_TRANSACTION,
                attempts_remaining: remaining
            })
        );
    }

    fx.flow.submit_secret(wrong_secret()).await.unwrap();
    let seen = fx.until(|e| *e == FlowEvent::LockedOut).await;
    assert!(!seen.iter().any(|e| matches!(e, FlowEvent::WrongSecret { .. })));
    assert!(tag.is_closed());
    assert_eq!(fx.taps.armed(), None);

    // the discarded action never runs, not even with the right secret
    fx.flow.submit_secret(right_secret()).await.unwrap();
    assert_eq!(fx.next().await, FlowEvent::LockedOut);
    assert_eq!(fx.signer.executed().len(), 3);
}

#[tokio::test]
async fn test_new_flow_after_lockout_starts_fresh() {
    let mut fx = Fixture::new();
    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.tap().await;
    fx.until(|e| matches!(e, FlowEvent::Progress(FlowProgress::SessionOpened { .. })))
        .await;
    for _ in 0..3 {
        fx.flow.submit_secret(wrong_secret()).await.unwrap();
        fx.until(|e| matches!(e, FlowEvent::WrongSecret { .. } | FlowEvent::LockedOut))
            .await;
    }

    // the user recovers the token out of band
    fx.signer.set_attempts_remaining(3);

    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    assert!(matches!(fx.next().await, FlowEvent::PromptForTap { .. }));
    assert_eq!(
        fx.next().await,
        FlowEvent::PromptForSecret {
            request_code: RequestCode::SIGN_TRANSACTION,
            attempts_remaining: 3
        }
    );

    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.flow.submit_secret(right_secret()).await.unwrap();
    fx.tap().await;
    let seen = fx.until(is_success).await;
    assert!(matches!(
        seen.last(),
        Some(FlowEvent::Success(ActionOutput::TransactionSigned { .. }))
    ));
}

// ============================================================================
// Tap correlation
// ============================================================================

#[tokio::test]
async fn test_stray_tap_is_dropped() {
    let mut fx = Fixture::new();
    fx.signer.set_secret(None);
    fx.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await
        .unwrap();
    fx.flow.enqueue(export_action("vault")).await.unwrap();
    fx.next().await;

    let (stray, stray_handle) = responsive_tag();
    fx.taps
        .tap_stamped(RequestCode::SIGN_TRANSACTION, stray)
        .await
        .unwrap();
    fx.expect_quiet().await;
    assert!(!stray_handle.is_connected());
    assert!(fx.signer.executed().is_empty());
    assert_eq!(fx.taps.armed(), Some(RequestCode::EXPORT_WALLET));

    fx.tap().await;
    fx.until(is_success).await;
    assert_eq!(fx.signer.executed(), vec!["ExportWallet"]);
}

#[tokio::test]
async fn test_second_enqueue_replaces_first() {
    let mut fx = Fixture::new();
    fx.signer.set_secret(None);
    fx.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await
        .unwrap();
    fx.flow.enqueue(export_action("first")).await.unwrap();
    fx.flow.enqueue(export_action("second")).await.unwrap();
    fx.next().await;

    fx.tap().await;
    let seen = fx.until(is_success).await;
    assert_eq!(
        seen.iter().filter(|e| is_success(e)).count(),
        1,
        "only one action runs"
    );
    assert_eq!(
        fx.signer.executed_actions(),
        vec![tapsign_session::PendingAction::ExportWallet(
            WalletId::new("second").unwrap()
        )]
    );
    fx.expect_quiet().await;
}

// ============================================================================
// Link loss and setup
// ============================================================================

#[tokio::test]
async fn test_lost_tag_asks_for_another_tap() {
    let mut fx = Fixture::new();
    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    fx.flow.submit_secret(right_secret()).await.unwrap();
    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.next().await;
    fx.next().await;

    let lost = fx.tap_and_pull_away().await;
    let seen = fx
        .until(|e| matches!(e, FlowEvent::PromptForTap { .. }))
        .await;
    assert!(seen.contains(&FlowEvent::Progress(FlowProgress::SessionLost)));
    assert!(!seen.iter().any(is_success));
    assert!(lost.is_closed());

    // the held secret survives the lost tag
    fx.tap().await;
    let seen = fx.until(is_success).await;
    assert!(!seen.iter().any(|e| matches!(e, FlowEvent::PromptForSecret { .. })));
}

#[tokio::test]
async fn test_repeated_loss_is_surfaced() {
    let mut fx = Fixture::new();
    fx.signer.set_secret(None);
    fx.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await
        .unwrap();
    fx.flow.enqueue(export_action("vault")).await.unwrap();
    fx.next().await;

    for _ in 0..2 {
        fx.tap_and_pull_away().await;
        fx.until(|e| matches!(e, FlowEvent::PromptForTap { .. })).await;
    }
    fx.tap_and_pull_away().await;
    let seen = fx
        .until(|e| matches!(e, FlowEvent::Failure { .. }))
        .await;
    assert!(matches!(
        seen.last(),
        Some(FlowEvent::Failure {
            kind: ErrorKind::Disconnected,
            ..
        })
    ));
}

#[tokio::test]
async fn test_detection_unavailable_is_fatal() {
    let mut fx = Fixture::new();
    fx.taps.set_available(false);
    fx.flow
        .start_flow(RequestCode::STATUS, None)
        .await
        .unwrap();
    assert!(matches!(
        fx.next().await,
        FlowEvent::Failure {
            kind: ErrorKind::Fatal,
            ..
        }
    ));
}

#[tokio::test]
async fn test_remembered_secret_for_same_signer() {
    let mut fx = Fixture::new();
    fx.flow
        .start_flow(RequestCode::SIGN_TRANSACTION, None)
        .await
        .unwrap();
    fx.flow.submit_secret(right_secret()).await.unwrap();
    fx.flow.enqueue(sign_action()).await.unwrap();
    fx.tap().await;
    fx.until(is_success).await;

    // same session, same signer: no prompt
    fx.flow.enqueue(sign_action()).await.unwrap();
    let seen = fx.until(is_success).await;
    assert!(!seen.iter().any(|e| matches!(e, FlowEvent::PromptForSecret { .. })));

    // a different action asks again
    fx.flow
        .enqueue(tapsign_session::PendingAction::VerifyAddress { index: 3 })
        .await
        .unwrap();
    assert!(matches!(
        fx.next().await,
        FlowEvent::PromptForSecret { .. }
    ));
}

#[tokio::test]
async fn test_cancel_then_tap_is_ignored() {
    let mut fx = Fixture::new();
    fx.signer.set_secret(None);
    fx.flow
        .start_flow(RequestCode::EXPORT_WALLET, Some(false))
        .await
        .unwrap();
    fx.flow.enqueue(export_action("vault")).await.unwrap();
    fx.next().await;

    fx.flow.cancel().await.unwrap();
    let (tag, handle) = MockTag::new();
    fx.taps.tap(tag).await.unwrap();
    fx.expect_quiet().await;
    assert!(!handle.is_connected());
    assert!(fx.signer.executed().is_empty());
}
