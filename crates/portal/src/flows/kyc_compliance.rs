//! KYC compliance: an existing subscriber re-verifies their identity.
//!
//! Only numbers on the subscriber list may take part; the list is checked
//! before the number is recorded on the request.

use core::fmt;

use serde_json::Value;
use sim_portal_core::{DocumentType, FlowKind, Msisdn, RegistrationDetails, RequestId};
use tracing::{info, instrument, warn};

use super::{
    FlowContext, FlowError, FlowServices, Navigation, VerificationView, registration_metadata,
};
use crate::api::Mutation;
use crate::notify::Notice;
use crate::provider::Metadata;
use crate::reconcile::EngineSnapshot;

const NOT_ELIGIBLE_MESSAGE: &str =
    "Your phone number is not part of this exercise. Please contact customer care.";

/// Steps of the KYC compliance flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KycComplianceStep {
    Terms,
    Number,
    Registration,
    Verification,
    Complete,
}

impl KycComplianceStep {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Terms => "terms",
            Self::Number => "number",
            Self::Registration => "registration",
            Self::Verification => "verification",
            Self::Complete => "complete",
        }
    }

    const fn previous(self) -> Navigation<Self> {
        match self {
            Self::Terms => Navigation::Exit,
            Self::Number => Navigation::Step(Self::Terms),
            Self::Registration => Navigation::Step(Self::Number),
            Self::Verification => Navigation::Step(Self::Registration),
            Self::Complete => Navigation::Stay(Self::Complete),
        }
    }
}

impl fmt::Display for KycComplianceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrates one KYC compliance request.
pub struct KycComplianceFlow {
    ctx: FlowContext,
    step: KycComplianceStep,
    msisdn: Option<Msisdn>,
    registration: Option<RegistrationDetails>,
    kyc_verification_id: Option<Value>,
    recorded: bool,
}

impl fmt::Debug for KycComplianceFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KycComplianceFlow")
            .field("request_id", &self.ctx.request_id())
            .field("step", &self.step)
            .field("msisdn", &self.msisdn)
            .field("recorded", &self.recorded)
            .finish_non_exhaustive()
    }
}

impl KycComplianceFlow {
    #[must_use]
    pub fn new(services: FlowServices) -> Self {
        Self::with_context(
            FlowContext::new(FlowKind::KycCompliance, services),
            KycComplianceStep::Terms,
        )
    }

    /// Continue an existing request at `step`.
    #[must_use]
    pub fn resume(services: FlowServices, request_id: RequestId, step: KycComplianceStep) -> Self {
        Self::with_context(
            FlowContext::with_request(FlowKind::KycCompliance, services, request_id),
            step,
        )
    }

    fn with_context(ctx: FlowContext, step: KycComplianceStep) -> Self {
        Self {
            ctx,
            step,
            msisdn: None,
            registration: None,
            kyc_verification_id: None,
            recorded: false,
        }
    }

    #[must_use]
    pub const fn step(&self) -> KycComplianceStep {
        self.step
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.ctx.request_id()
    }

    #[must_use]
    pub const fn msisdn(&self) -> Option<&Msisdn> {
        self.msisdn.as_ref()
    }

    /// Verification id reported to the backend on completion, as the
    /// status endpoint returned it.
    #[must_use]
    pub const fn kyc_verification_id(&self) -> Option<&Value> {
        self.kyc_verification_id.as_ref()
    }

    /// Whether the backend accepted the completion record.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        self.recorded
    }

    fn expect_step(&self, step: KycComplianceStep) -> Result<(), FlowError> {
        if self.step == step {
            Ok(())
        } else {
            Err(FlowError::InvalidStep(self.step.name()))
        }
    }

    /// Create the request and record acceptance of the terms.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the flow stays on the terms step.
    #[instrument(skip(self))]
    pub async fn accept_terms(&mut self) -> Result<(), FlowError> {
        self.expect_step(KycComplianceStep::Terms)?;
        self.ctx.ensure_started("Failed to start KYC compliance").await?;
        self.ctx
            .mutate(
                Mutation::AcceptTerms { accepted: true },
                "Failed to start KYC compliance",
            )
            .await?;
        self.step = KycComplianceStep::Number;
        Ok(())
    }

    /// Check `number` against the subscriber list, then record it.
    ///
    /// # Errors
    ///
    /// [`FlowError::NotEligible`] when the number is not on the list, or
    /// the lookup or backend error.
    #[instrument(skip(self))]
    pub async fn submit_number(&mut self, number: &str) -> Result<(), FlowError> {
        self.expect_step(KycComplianceStep::Number)?;
        let msisdn = Msisdn::parse(number).map_err(|e| {
            self.ctx.notify(Notice::error(e.to_string()));
            FlowError::from(e)
        })?;

        let known = match self.ctx.session().subscriber_lookup(&msisdn).await {
            Ok(known) => known,
            Err(e) => {
                warn!(msisdn = %msisdn, error = %e, "Subscriber lookup failed");
                self.ctx.notify(Notice::error("Failed to verify phone number"));
                return Err(e.into());
            }
        };
        if !known {
            info!(msisdn = %msisdn, "Number is not on the subscriber list");
            self.ctx.notify(Notice::error("Phone number not found"));
            return Err(FlowError::NotEligible(NOT_ELIGIBLE_MESSAGE.to_owned()));
        }

        self.ctx
            .mutate(
                Mutation::SelectNumber {
                    msisdn: msisdn.clone(),
                },
                "Failed to submit number",
            )
            .await?;
        self.msisdn = Some(msisdn);
        self.step = KycComplianceStep::Registration;
        Ok(())
    }

    /// Validate and submit address and next-of-kin details.
    ///
    /// # Errors
    ///
    /// Returns the per-field validation errors or the backend error.
    pub async fn submit_registration(&mut self, details: &RegistrationDetails) -> Result<(), FlowError> {
        self.expect_step(KycComplianceStep::Registration)?;
        let details = details.validate().map_err(|e| {
            self.ctx.notify(Notice::error(e.to_string()));
            FlowError::from(e)
        })?;
        self.ctx
            .mutate(
                Mutation::Registration(details.clone()),
                "Failed to submit registration",
            )
            .await?;
        self.registration = Some(details);
        self.step = KycComplianceStep::Verification;
        Ok(())
    }

    /// Open the provider for `document_type` and reconcile the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot load, the backend refuses
    /// the start, or an attempt is already running.
    pub async fn start_verification(
        &mut self,
        document_type: DocumentType,
    ) -> Result<VerificationView, FlowError> {
        self.expect_step(KycComplianceStep::Verification)?;
        let mut extra = Metadata::new();
        if let Some(details) = &self.registration {
            registration_metadata(&mut extra, details);
        }
        if let Some(msisdn) = &self.msisdn {
            extra.insert("msisdn".to_owned(), msisdn.to_string());
        }
        let view = self.ctx.start_verification(document_type, extra).await?;
        Ok(self.apply(view).await)
    }

    /// # Errors
    ///
    /// Returns an error outside the verification step.
    pub async fn refresh_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(KycComplianceStep::Verification)?;
        let view = self.ctx.refresh_verification().await?;
        Ok(self.apply(view).await)
    }

    /// # Errors
    ///
    /// Returns an error outside the verification step.
    pub async fn await_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(KycComplianceStep::Verification)?;
        let view = self.ctx.await_verification().await?;
        Ok(self.apply(view).await)
    }

    /// # Errors
    ///
    /// Returns an error outside the verification step or while an attempt
    /// runs.
    pub async fn resume_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(KycComplianceStep::Verification)?;
        let view = self.ctx.resume_verification().await?;
        Ok(self.apply(view).await)
    }

    pub fn retry_verification(&mut self) {
        self.ctx.retry_verification();
    }

    #[must_use]
    pub fn verification(&self) -> VerificationView {
        self.ctx.verification_view()
    }

    /// On success, record completion and finish. A failed completion call
    /// is logged; the customer still sees the completed screen.
    async fn apply(&mut self, view: VerificationView) -> VerificationView {
        if let VerificationView::Verified(snapshot) = &view {
            let kyc_verification_id = completion_id(snapshot);
            self.recorded = self
                .ctx
                .mutate_logged(Mutation::Complete {
                    verified: true,
                    kyc_verification_id: kyc_verification_id.clone(),
                })
                .await;
            self.kyc_verification_id = kyc_verification_id;
            self.step = KycComplianceStep::Complete;
            info!(request_id = ?self.ctx.request_id(), recorded = self.recorded, "KYC compliance complete");
        }
        view
    }

    /// Go back one step without touching the backend.
    pub fn back(&mut self) -> Navigation<KycComplianceStep> {
        let target = self.step.previous();
        if let Navigation::Step(step) = target {
            if self.step == KycComplianceStep::Verification {
                self.ctx.retry_verification();
            }
            self.step = step;
        }
        target
    }

    /// Leave the flow, stopping verification timers and provider UI.
    pub fn close(mut self) {
        info!(request_id = ?self.ctx.request_id(), step = %self.step, "KYC compliance flow closed");
        self.ctx.shutdown();
    }
}

/// The backend's verification id from the last status payload, top level
/// first. Null and blank values count as absent.
fn completion_id(snapshot: &EngineSnapshot) -> Option<Value> {
    let payload = snapshot.last_payload.as_ref()?;
    let nested = payload.get("data").and_then(|d| d.get("kyc_verification_id"));
    [payload.get("kyc_verification_id"), nested]
        .into_iter()
        .flatten()
        .find(|id| match id {
            Value::String(s) => !s.trim().is_empty(),
            Value::Null => false,
            _ => true,
        })
        .cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use sim_portal_core::VerificationOutcome;

    use super::*;
    use crate::flows::test_support::{fixture, registration};
    use crate::notify::NoticeLevel;

    fn at_step(services: FlowServices, step: KycComplianceStep) -> KycComplianceFlow {
        KycComplianceFlow::resume(services, RequestId::new("req-1").unwrap(), step)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_flow() {
        let fx = fixture();
        fx.session.push_status(Some(json!({
            "status": "verified",
            "kyc_verification_id": "kyc-77"
        })));
        let mut flow = KycComplianceFlow::new(fx.services.clone());

        flow.accept_terms().await.unwrap();
        flow.submit_number("71234567").await.unwrap();
        flow.submit_registration(&registration()).await.unwrap();
        let view = flow.start_verification(DocumentType::Omang).await.unwrap();

        assert!(matches!(view, VerificationView::Verified(_)));
        assert_eq!(flow.step(), KycComplianceStep::Complete);
        assert!(flow.is_recorded());
        assert_eq!(flow.kyc_verification_id(), Some(&json!("kyc-77")));
        assert_eq!(
            fx.session.calls(),
            [
                "kyc-compliance/start",
                "kyc-compliance/req-1/terms",
                "subscriber-lookup/71234567",
                "kyc-compliance/req-1/number",
                "kyc-compliance/req-1/registration",
                "kyc-compliance/req-1/kyc/start",
                "kyc-compliance/req-1/complete",
            ]
        );
        assert_eq!(
            fx.session.mutations().last(),
            Some(&Mutation::Complete {
                verified: true,
                kyc_verification_id: Some(json!("kyc-77"))
            })
        );
        assert_eq!(flow.back(), Navigation::Stay(KycComplianceStep::Complete));
    }

    #[tokio::test]
    async fn test_unknown_subscriber_is_not_eligible() {
        let fx = fixture();
        *fx.session.subscriber_exists.lock().unwrap() = false;
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Number);

        let err = flow.submit_number("71234567").await.unwrap_err();

        let FlowError::NotEligible(message) = err else {
            panic!("expected not eligible");
        };
        assert!(message.contains("not part of this exercise"));
        assert_eq!(flow.step(), KycComplianceStep::Number);
        assert_eq!(fx.session.calls(), ["subscriber-lookup/71234567"]);
        assert_eq!(
            fx.notifier.messages(NoticeLevel::Error),
            ["Phone number not found"]
        );
    }

    #[tokio::test]
    async fn test_malformed_number_skips_lookup() {
        let fx = fixture();
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Number);

        let err = flow.submit_number("12-34").await.unwrap_err();

        assert!(matches!(err, FlowError::Msisdn(_)));
        assert!(fx.session.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_failure_still_completes() {
        let fx = fixture();
        fx.session.fail_step("complete");
        fx.session.push_status(Some(json!({ "status": "approved" })));
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Verification);

        flow.start_verification(DocumentType::Passport).await.unwrap();

        assert_eq!(flow.step(), KycComplianceStep::Complete);
        assert!(!flow.is_recorded());
        assert_eq!(flow.kyc_verification_id(), None);
        assert!(fx.notifier.messages(NoticeLevel::Error).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_review_shows_failure_screen() {
        let fx = fixture();
        fx.session
            .push_status(Some(json!({ "status": "pending", "metadata": { "reviewNeeded": true } })));
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Verification);

        let view = flow.start_verification(DocumentType::Omang).await.unwrap();

        let VerificationView::Failed(screen) = view else {
            panic!("expected failure screen");
        };
        assert_eq!(screen.outcome, VerificationOutcome::ManualReview);
        assert_eq!(flow.step(), KycComplianceStep::Verification);
        assert!(!fx.session.calls().iter().any(|c| c.ends_with("/complete")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failure() {
        let fx = fixture();
        fx.session.push_status(Some(json!({ "status": "rejected" })));
        fx.session.push_status(Some(json!({ "status": "verified" })));
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Verification);

        let view = flow.start_verification(DocumentType::Omang).await.unwrap();
        assert!(matches!(view, VerificationView::Failed(_)));

        let err = flow.start_verification(DocumentType::Omang).await.unwrap_err();
        assert!(matches!(err, FlowError::Verification(_)));

        flow.retry_verification();
        assert_eq!(flow.verification(), VerificationView::Intro);
        let view = flow.start_verification(DocumentType::Omang).await.unwrap();
        assert!(matches!(view, VerificationView::Verified(_)));
    }

    #[test]
    fn test_completion_id_keeps_backend_value() {
        let snapshot = EngineSnapshot {
            last_payload: Some(json!({ "data": { "kyc_verification_id": 42 } })),
            verification_id: Some("ver-1".into()),
            ..EngineSnapshot::default()
        };
        assert_eq!(completion_id(&snapshot), Some(json!(42)));

        let snapshot = EngineSnapshot {
            last_payload: Some(json!({
                "kyc_verification_id": null,
                "data": { "kyc_verification_id": "kyc-9" }
            })),
            ..EngineSnapshot::default()
        };
        assert_eq!(completion_id(&snapshot), Some(json!("kyc-9")));

        // The provider's own id is never substituted.
        let snapshot = EngineSnapshot {
            last_payload: Some(json!({ "kyc_verification_id": " " })),
            verification_id: Some("ver-1".into()),
            ..EngineSnapshot::default()
        };
        assert_eq!(completion_id(&snapshot), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_numeric_completion_id_is_forwarded_unchanged() {
        let fx = fixture();
        fx.session
            .push_status(Some(json!({ "status": "verified", "kyc_verification_id": 42 })));
        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Verification);

        flow.start_verification(DocumentType::Omang).await.unwrap();

        assert_eq!(flow.kyc_verification_id(), Some(&json!(42)));
        let complete = fx.session.mutations().last().cloned().unwrap();
        assert_eq!(
            complete.body(),
            json!({ "verified": true, "kyc_verification_id": 42 })
        );
    }

    #[tokio::test]
    async fn test_back_navigation() {
        let fx = fixture();
        let mut flow = KycComplianceFlow::new(fx.services.clone());
        assert_eq!(flow.back(), Navigation::Exit);

        let mut flow = at_step(fx.services.clone(), KycComplianceStep::Verification);
        assert_eq!(flow.back(), Navigation::Step(KycComplianceStep::Registration));
        assert_eq!(flow.back(), Navigation::Step(KycComplianceStep::Number));
        assert!(fx.session.calls().is_empty());
    }
}
