//! KYC status commands.
//!
//! # Usage
//!
//! ```bash
//! # One status check
//! portal-cli kyc status esim 1234
//!
//! # Keep polling until the verification settles or the window closes
//! portal-cli kyc watch kyc-compliance 1234
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sim_portal::Portal;
use sim_portal::api::RequestSession;
use sim_portal::notify::TracingNotifier;
use sim_portal::provider::{Metadata, ProviderError, ProviderResult, VerificationProvider};
use sim_portal::reconcile::ReconciliationEngine;
use sim_portal_core::{
    DocumentType, FlowKind, RequestId, SessionId, VerificationOutcome, classify_status,
    extract_status, rejection_reason,
};

use super::{CommandError, print_json};

const NO_UI: &str = "No verification UI is available in a terminal";

/// Provider for terminal use. Nothing can be shown, so only verifications
/// submitted elsewhere are reconciled.
pub struct Headless;

#[async_trait]
impl VerificationProvider for Headless {
    async fn load(&self) -> Result<(), ProviderError> {
        Err(ProviderError::LoadFailed(NO_UI.to_owned()))
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn last_error(&self) -> Option<String> {
        Some(NO_UI.to_owned())
    }

    async fn start_verification(&self, _: DocumentType, _: Metadata) -> ProviderResult {
        ProviderResult::failed(SessionId::generate(), NO_UI)
    }

    fn cleanup(&self) {}
}

fn request_id(raw: &str) -> Result<RequestId, CommandError> {
    RequestId::new(raw.trim())
        .ok_or_else(|| CommandError::Invalid(format!("Invalid request id: {raw}")))
}

/// Read the current verification status once.
pub async fn status(portal: &Portal, flow: FlowKind, raw_id: &str) -> Result<(), CommandError> {
    let request_id = request_id(raw_id)?;
    let Some(payload) = portal.client().poll_status(flow, &request_id).await else {
        return Err(CommandError::Invalid(format!(
            "No status available for {flow} request {request_id}"
        )));
    };
    let class = classify_status(&payload);
    tracing::info!(request_id = %request_id, class = ?class, "Status read");
    print_json(&json!({
        "request_id": request_id,
        "status": extract_status(&payload),
        "outcome": class.outcome(),
        "rejection_reason": rejection_reason(&payload),
    }));
    Ok(())
}

/// Poll until the verification settles, the window closes, or Ctrl-C.
///
/// Returns the outcome; pending means the watch was stopped early.
pub async fn watch(
    portal: &Portal,
    flow: FlowKind,
    raw_id: &str,
) -> Result<VerificationOutcome, CommandError> {
    let request_id = request_id(raw_id)?;
    let engine = ReconciliationEngine::new(
        Arc::new(Headless),
        Arc::new(portal.request_status(flow, request_id.clone())),
        Arc::new(TracingNotifier),
        portal.config().engine,
    );

    tracing::info!(
        request_id = %request_id,
        window_secs = portal.config().engine.window.as_secs(),
        "Watching verification status"
    );
    let started = engine.resume().await?;
    let snapshot = if started.is_settled() {
        started
    } else {
        tokio::select! {
            snapshot = engine.wait_for_completion() => snapshot,
            _ = tokio::signal::ctrl_c() => {
                engine.shutdown();
                return Err(CommandError::Interrupted);
            }
        }
    };
    engine.shutdown();

    print_json(&json!({
        "request_id": request_id,
        "outcome": snapshot.outcome,
        "payload": snapshot.last_payload,
    }));
    Ok(snapshot.outcome)
}
