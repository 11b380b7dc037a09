//! eSIM purchase against the mock backend and a scripted provider widget.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use serde_json::json;
use sim_portal::flows::{EsimStep, FlowError, Navigation, VerificationView};
use sim_portal::notify::NoticeLevel;
use sim_portal_core::{
    CashType, DocumentType, PaymentSelection, VerificationOutcome, VerificationPhase,
};
use sim_portal_integration_tests::{Harness, MockBackend, Script, registration, verified_status};

/// Walk a fresh flow up to the KYC step.
async fn reach_kyc(harness: &Harness) -> sim_portal::flows::EsimPurchaseFlow {
    let mut flow = harness.portal.esim_purchase();
    flow.accept_terms().await.unwrap();
    flow.pay(&PaymentSelection::card(Some("value"))).await.unwrap();
    flow.load_numbers().await.unwrap();
    flow.select_number("71230001").await.unwrap();
    flow.submit_registration(&registration()).await.unwrap();
    assert_eq!(flow.step(), EsimStep::Kyc);
    flow
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_purchase_end_to_end() {
    let harness = Harness::start(Script::Finish).await;
    harness.backend.push_statuses([verified_status()]);

    let mut flow = reach_kyc(&harness).await;
    assert_eq!(flow.request_id().unwrap().as_str(), "1");
    assert_eq!(flow.numbers(), ["71230001", "71230002"]);

    let view = flow.start_verification(DocumentType::Omang).await.unwrap();
    let VerificationView::Verified(snapshot) = view else {
        panic!("expected verified view, got {view:?}");
    };
    assert_eq!(snapshot.verification_id.as_deref(), Some("ver-123"));
    assert_eq!(flow.step(), EsimStep::Confirm);

    let identity = flow.confirmation().unwrap();
    assert_eq!(identity.full_name.as_deref(), Some("Neo Kgosi"));
    assert_eq!(identity.document_number.as_deref(), Some("123456789"));

    assert!(flow.confirm_identity().await.unwrap());
    assert_eq!(flow.step(), EsimStep::Activation);
    assert!(flow.is_activated());
    assert_eq!(flow.back(), Navigation::Stay(EsimStep::Activation));

    let backend = &harness.backend;
    assert_eq!(
        backend.calls(),
        [
            "POST /api/esim/start",
            "POST /api/esim/1/terms",
            "POST /api/esim/1/payment",
            "POST /api/payments/record",
            "GET /api/esim/1/numbers",
            "POST /api/esim/1/number",
            "POST /api/esim/1/registration",
            "POST /api/esim/1/kyc/start",
            "GET /api/esim/1/kyc/status",
            "POST /api/esim/1/confirm-kyc",
            "POST /api/esim/1/activate",
        ]
    );
    // Value pack plus activation fee.
    assert_eq!(backend.body_of("/api/esim/1/payment").unwrap()["amount"].as_f64(), Some(110.0));
    assert_eq!(
        backend.body_of("/api/esim/1/kyc/start").unwrap(),
        json!({ "document_type": "omang" })
    );
    assert_eq!(
        backend.body_of("/api/esim/1/registration").unwrap()["nextOfKinName"],
        "Neo Kgosi"
    );

    let trigger = harness.host.trigger().unwrap();
    assert_eq!(trigger.flow_id, "flow-citizen");
    let metadata: serde_json::Value = serde_json::from_str(&trigger.metadata).unwrap();
    assert_eq!(metadata["requestId"], "1");
    assert_eq!(metadata["msisdn"], "71230001");
    assert_eq!(metadata["village"], "Mogoditshane");

    assert!(harness.host.is_clean());
    assert_eq!(harness.host.current_style().body_overflow, "auto");
    let success = harness.notifier.messages(NoticeLevel::Success);
    assert!(success.contains(&"Payment successful!".to_owned()));
    assert!(success.contains(&"Identity verified successfully!".to_owned()));
}

#[tokio::test]
async fn test_purchase_settles_through_polling() {
    let harness = Harness::start(Script::Finish).await;
    harness.backend.state().numbers = vec!["71112222".into()];
    harness.backend.push_statuses([
        json!({ "status": "pending" }),
        json!({
            "kyc_status": "verified",
            "data": {
                "full_name": "Neo Kgosi",
                "first_name": "Neo",
                "surname": "Kgosi",
                "date_of_birth": "1990-04-12",
                "document_type": "omang",
                "document_number": "123456789",
                "country": "BW"
            }
        }),
    ]);

    let mut flow = harness.portal.esim_purchase();
    flow.accept_terms().await.unwrap();
    flow.pay(&PaymentSelection::card(Some("value"))).await.unwrap();
    assert_eq!(flow.plan().id, "value");
    flow.load_numbers().await.unwrap();
    flow.select_number("71112222").await.unwrap();
    flow.submit_registration(&registration()).await.unwrap();

    let view = flow.start_verification(DocumentType::Omang).await.unwrap();
    assert!(matches!(view, VerificationView::Verified(_)));
    assert_eq!(flow.step(), EsimStep::Confirm);
    let polls = harness
        .backend
        .calls()
        .iter()
        .filter(|c| *c == "GET /api/esim/1/kyc/status")
        .count();
    assert_eq!(polls, 2);

    let identity = flow.confirmation().unwrap();
    assert_eq!(identity.full_name.as_deref(), Some("Neo Kgosi"));
    assert_eq!(identity.first_name.as_deref(), Some("Neo"));
    assert_eq!(identity.surname.as_deref(), Some("Kgosi"));
    assert_eq!(identity.date_of_birth.as_deref(), Some("1990-04-12"));
    assert_eq!(identity.document_type, Some(DocumentType::Omang));
    assert_eq!(identity.document_number.as_deref(), Some("123456789"));
    assert_eq!(identity.country.as_deref(), Some("BW"));

    assert!(flow.confirm_identity().await.unwrap());
    assert_eq!(
        harness.backend.body_of("/api/esim/1/confirm-kyc").unwrap(),
        json!({ "verified": true })
    );
    assert_eq!(
        harness.backend.body_of("/api/esim/1/number").unwrap(),
        json!({ "msisdn": "71112222" })
    );
    assert_eq!(flow.step(), EsimStep::Activation);

    let VerificationView::Verified(snapshot) = flow.verification() else {
        panic!("expected verified engine state");
    };
    assert_eq!(snapshot.phase, VerificationPhase::Complete);
    assert_eq!(snapshot.outcome, VerificationOutcome::Verified);
}

#[tokio::test]
async fn test_cash_payment_requires_voucher() {
    let harness = Harness::start(Script::Finish).await;
    let mut flow = harness.portal.esim_purchase();
    flow.accept_terms().await.unwrap();

    let selection = PaymentSelection::cash(None, CashType::NonAssisted, "  ");
    let err = flow.pay(&selection).await.unwrap_err();
    assert!(matches!(err, FlowError::Payment(_)));
    assert_eq!(flow.step(), EsimStep::Payment);
    assert!(harness.backend.body_of("/api/esim/1/payment").is_none());
    assert_eq!(
        harness.notifier.messages(NoticeLevel::Error),
        ["Please enter voucher code"]
    );
}

// =============================================================================
// Step Failures
// =============================================================================

#[tokio::test]
async fn test_rejected_step_keeps_flow_in_place() {
    let harness = Harness::start(Script::Finish).await;
    harness.backend.fail("number");

    let mut flow = harness.portal.esim_purchase();
    flow.accept_terms().await.unwrap();
    flow.pay(&PaymentSelection::card(None)).await.unwrap();

    let err = flow.select_number("71230002").await.unwrap_err();
    assert!(err.to_string().contains("number rejected"));
    assert_eq!(flow.step(), EsimStep::Number);
    assert!(flow.msisdn().is_none());
    assert_eq!(
        harness.notifier.messages(NoticeLevel::Error),
        ["Failed to select number"]
    );
}

#[tokio::test]
async fn test_ledger_failure_does_not_block_payment() {
    let harness = Harness::start(Script::Finish).await;
    harness.backend.fail("payments/record");

    let mut flow = harness.portal.esim_purchase();
    flow.accept_terms().await.unwrap();
    let receipt = flow.pay(&PaymentSelection::card(Some("esim"))).await.unwrap();

    assert!(!receipt.ledger_recorded);
    assert_eq!(flow.step(), EsimStep::Number);
}

// =============================================================================
// Provider Outcomes
// =============================================================================

#[tokio::test]
async fn test_exit_then_retry() {
    let harness = Harness::start(Script::Exit).await;
    let mut flow = reach_kyc(&harness).await;

    let view = flow.start_verification(DocumentType::Passport).await.unwrap();
    assert_eq!(view, VerificationView::Intro);
    assert_eq!(flow.step(), EsimStep::Kyc);
    assert!(
        harness
            .notifier
            .messages(NoticeLevel::Info)
            .contains(&"Verification was cancelled".to_owned())
    );
    assert!(harness.host.is_clean());

    harness.host.set_script(Script::Finish);
    harness.backend.push_statuses([verified_status()]);
    let view = flow.start_verification(DocumentType::Passport).await.unwrap();
    assert!(matches!(view, VerificationView::Verified(_)));
    assert_eq!(flow.step(), EsimStep::Confirm);
    assert_eq!(harness.host.trigger().unwrap().flow_id, "flow-visitor");
    assert_eq!(harness.host.script_loads(), 1);
}

#[tokio::test]
async fn test_dismissed_widget_defers_to_backend() {
    let harness = Harness::start(Script::Dismiss).await;
    harness
        .backend
        .push_statuses([json!({ "kyc_status": "processing" }), verified_status()]);
    let mut flow = reach_kyc(&harness).await;

    let view = flow.start_verification(DocumentType::Omang).await.unwrap();
    assert!(matches!(view, VerificationView::InProgress(_)));

    let view = flow.await_verification().await.unwrap();
    let VerificationView::Verified(snapshot) = view else {
        panic!("expected verified view, got {view:?}");
    };
    assert!(snapshot.verification_id.is_none());
    assert_eq!(flow.step(), EsimStep::Confirm);
    assert!(harness.host.is_clean());
}

#[tokio::test]
async fn test_manual_review_is_reported() {
    let harness = Harness::start(Script::Finish).await;
    harness.backend.push_statuses([json!({
        "kyc_status": "pending",
        "metadata": { "reviewNeeded": true }
    })]);
    let mut flow = reach_kyc(&harness).await;

    let view = flow.start_verification(DocumentType::Omang).await.unwrap();
    let VerificationView::Failed(screen) = view else {
        panic!("expected failure screen, got {view:?}");
    };
    assert_eq!(screen.outcome, VerificationOutcome::ManualReview);
    assert!(screen.message().contains("manual review"));
    assert_eq!(flow.step(), EsimStep::Kyc);
    assert!(flow.confirmation().is_none());
}

#[tokio::test]
async fn test_verification_window_times_out() {
    let backend = MockBackend::start().await;
    let mut config = backend.config();
    config.engine.window = Duration::from_millis(300);
    let harness = Harness::with_config(backend, config, Script::Dismiss);
    let mut flow = reach_kyc(&harness).await;

    flow.start_verification(DocumentType::Omang).await.unwrap();
    let view = flow.await_verification().await.unwrap();
    let VerificationView::Failed(screen) = view else {
        panic!("expected failure screen, got {view:?}");
    };
    assert_eq!(screen.outcome, VerificationOutcome::Timeout);
    assert!(
        harness
            .notifier
            .messages(NoticeLevel::Error)
            .contains(&"Verification timed out. Please contact support.".to_owned())
    );

    // A late verified status is ignored once the attempt has settled.
    harness.backend.push_statuses([verified_status()]);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(matches!(flow.verification(), VerificationView::Failed(_)));

    flow.retry_verification();
    assert_eq!(flow.verification(), VerificationView::Intro);
    assert_eq!(flow.back(), Navigation::Step(EsimStep::Registration));
}
