//! eSIM purchase: terms, payment, number, registration, KYC, confirmation
//! and activation.

use core::fmt;

use sim_portal_core::{
    DocumentType, ExtractedIdentity, FlowKind, Msisdn, PaymentError, PaymentSelection, Plan,
    RegistrationDetails, RequestId,
};
use tracing::{info, instrument};

use super::{
    FlowContext, FlowError, FlowServices, Navigation, VerificationView, registration_metadata,
};
use crate::api::Mutation;
use crate::notify::Notice;
use crate::payment::{self, PaymentReceipt};
use crate::provider::Metadata;
use crate::reconcile::EngineSnapshot;

/// Plan preselected when the flow opens.
const DEFAULT_PLAN: &str = "starter";

/// Steps of the eSIM purchase, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsimStep {
    Terms,
    Payment,
    Number,
    Registration,
    Kyc,
    Confirm,
    Activation,
}

impl EsimStep {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Terms => "terms",
            Self::Payment => "payment",
            Self::Number => "number",
            Self::Registration => "registration",
            Self::Kyc => "kyc",
            Self::Confirm => "confirm",
            Self::Activation => "activation",
        }
    }

    const fn previous(self) -> Navigation<Self> {
        match self {
            Self::Terms => Navigation::Exit,
            Self::Payment => Navigation::Step(Self::Terms),
            Self::Number => Navigation::Step(Self::Payment),
            Self::Registration => Navigation::Step(Self::Number),
            Self::Kyc => Navigation::Step(Self::Registration),
            Self::Confirm => Navigation::Step(Self::Kyc),
            Self::Activation => Navigation::Stay(Self::Activation),
        }
    }
}

impl fmt::Display for EsimStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrates one eSIM purchase.
pub struct EsimPurchaseFlow {
    ctx: FlowContext,
    step: EsimStep,
    plan: &'static Plan,
    numbers: Vec<String>,
    msisdn: Option<Msisdn>,
    registration: Option<RegistrationDetails>,
    receipt: Option<PaymentReceipt>,
    verified: Option<EngineSnapshot>,
    activated: bool,
}

impl fmt::Debug for EsimPurchaseFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsimPurchaseFlow")
            .field("request_id", &self.ctx.request_id())
            .field("step", &self.step)
            .field("plan", &self.plan.id)
            .field("msisdn", &self.msisdn)
            .finish_non_exhaustive()
    }
}

impl EsimPurchaseFlow {
    /// A new purchase at the terms step. No backend call is made until the
    /// terms are accepted.
    #[must_use]
    pub fn new(services: FlowServices) -> Self {
        Self::with_context(FlowContext::new(FlowKind::EsimPurchase, services), EsimStep::Terms)
    }

    /// Continue an existing request at `step`.
    #[must_use]
    pub fn resume(services: FlowServices, request_id: RequestId, step: EsimStep) -> Self {
        Self::with_context(
            FlowContext::with_request(FlowKind::EsimPurchase, services, request_id),
            step,
        )
    }

    fn with_context(ctx: FlowContext, step: EsimStep) -> Self {
        Self {
            ctx,
            step,
            plan: Plan::find(DEFAULT_PLAN).unwrap_or(&sim_portal_core::PLANS[0]),
            numbers: Vec::new(),
            msisdn: None,
            registration: None,
            receipt: None,
            verified: None,
            activated: false,
        }
    }

    #[must_use]
    pub const fn step(&self) -> EsimStep {
        self.step
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.ctx.request_id()
    }

    #[must_use]
    pub const fn plan(&self) -> &'static Plan {
        self.plan
    }

    /// Numbers offered at the number step.
    #[must_use]
    pub fn numbers(&self) -> &[String] {
        &self.numbers
    }

    #[must_use]
    pub const fn msisdn(&self) -> Option<&Msisdn> {
        self.msisdn.as_ref()
    }

    #[must_use]
    pub const fn receipt(&self) -> Option<&PaymentReceipt> {
        self.receipt.as_ref()
    }

    /// Whether activation was accepted by the backend.
    #[must_use]
    pub const fn is_activated(&self) -> bool {
        self.activated
    }

    fn expect_step(&self, step: EsimStep) -> Result<(), FlowError> {
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
    /// Returns an error if the request cannot be started or the terms are
    /// rejected; the flow stays on the terms step.
    #[instrument(skip(self))]
    pub async fn accept_terms(&mut self) -> Result<(), FlowError> {
        self.expect_step(EsimStep::Terms)?;
        self.ctx.ensure_started("Failed to start eSIM flow").await?;
        self.ctx
            .mutate(Mutation::AcceptTerms { accepted: true }, "Failed to start eSIM flow")
            .await?;
        self.step = EsimStep::Payment;
        Ok(())
    }

    /// Pick the plan to pay for.
    ///
    /// # Errors
    ///
    /// [`PaymentError::UnknownPlan`] for an id outside the catalog.
    pub fn choose_plan(&mut self, plan_id: &str) -> Result<&'static Plan, FlowError> {
        self.expect_step(EsimStep::Payment)?;
        let plan = Plan::find(plan_id).ok_or_else(|| {
            let err = PaymentError::UnknownPlan(plan_id.to_owned());
            self.ctx.notify(Notice::error(err.to_string()));
            err
        })?;
        self.plan = plan;
        Ok(plan)
    }

    /// Pay for the chosen plan, including its activation fee.
    ///
    /// A plan named in `selection` replaces the current choice.
    ///
    /// # Errors
    ///
    /// Returns the validation or backend error; the flow stays on the
    /// payment step.
    #[instrument(skip(self, selection))]
    pub async fn pay(&mut self, selection: &PaymentSelection) -> Result<PaymentReceipt, FlowError> {
        self.expect_step(EsimStep::Payment)?;
        if let Some(plan_id) = &selection.plan_id {
            self.choose_plan(plan_id)?;
        }
        let receipt = payment::submit(&self.ctx, selection, self.plan.total(), None).await?;
        self.receipt = Some(receipt);
        self.step = EsimStep::Number;
        Ok(receipt)
    }

    /// Fetch the numbers available for selection.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the previous list is kept.
    pub async fn load_numbers(&mut self) -> Result<&[String], FlowError> {
        self.expect_step(EsimStep::Number)?;
        self.numbers = self.ctx.list_numbers("Failed to load numbers").await?;
        Ok(&self.numbers)
    }

    /// Reserve `number` for this purchase.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed number or a backend failure.
    #[instrument(skip(self))]
    pub async fn select_number(&mut self, number: &str) -> Result<(), FlowError> {
        self.expect_step(EsimStep::Number)?;
        let msisdn = Msisdn::parse(number).map_err(|e| {
            self.ctx.notify(Notice::error(e.to_string()));
            FlowError::from(e)
        })?;
        self.ctx
            .mutate(
                Mutation::SelectNumber {
                    msisdn: msisdn.clone(),
                },
                "Failed to select number",
            )
            .await?;
        self.msisdn = Some(msisdn);
        self.step = EsimStep::Registration;
        Ok(())
    }

    /// Validate and submit address and next-of-kin details.
    ///
    /// # Errors
    ///
    /// Returns the per-field validation errors or the backend error.
    pub async fn submit_registration(&mut self, details: &RegistrationDetails) -> Result<(), FlowError> {
        self.expect_step(EsimStep::Registration)?;
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
        self.step = EsimStep::Kyc;
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
        self.expect_step(EsimStep::Kyc)?;
        let mut extra = Metadata::new();
        if let Some(details) = &self.registration {
            registration_metadata(&mut extra, details);
        }
        if let Some(msisdn) = &self.msisdn {
            extra.insert("msisdn".to_owned(), msisdn.to_string());
        }
        let view = self.ctx.start_verification(document_type, extra).await?;
        Ok(self.apply(view))
    }

    /// Ask the backend for the verification status now.
    ///
    /// # Errors
    ///
    /// Returns an error outside the KYC step.
    pub async fn refresh_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(EsimStep::Kyc)?;
        let view = self.ctx.refresh_verification().await?;
        Ok(self.apply(view))
    }

    /// Wait for the verification to settle.
    ///
    /// # Errors
    ///
    /// Returns an error outside the KYC step.
    pub async fn await_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(EsimStep::Kyc)?;
        let view = self.ctx.await_verification().await?;
        Ok(self.apply(view))
    }

    /// Resume status checks for a verification submitted earlier.
    ///
    /// # Errors
    ///
    /// Returns an error outside the KYC step or while an attempt runs.
    pub async fn resume_verification(&mut self) -> Result<VerificationView, FlowError> {
        self.expect_step(EsimStep::Kyc)?;
        let view = self.ctx.resume_verification().await?;
        Ok(self.apply(view))
    }

    /// Clear a failed attempt so verification can start again.
    pub fn retry_verification(&mut self) {
        self.ctx.retry_verification();
    }

    /// Current state of the verification step.
    #[must_use]
    pub fn verification(&self) -> VerificationView {
        self.ctx.verification_view()
    }

    fn apply(&mut self, view: VerificationView) -> VerificationView {
        if let VerificationView::Verified(snapshot) = &view {
            info!(request_id = ?self.ctx.request_id(), "Identity verified, moving to confirmation");
            self.verified = Some(snapshot.clone());
            self.step = EsimStep::Confirm;
        }
        view
    }

    /// Identity fields to confirm.
    ///
    /// `None` until the verified payload carries an identity record; the
    /// confirmation screen is not shown without one.
    #[must_use]
    pub fn confirmation(&self) -> Option<ExtractedIdentity> {
        if self.step != EsimStep::Confirm {
            return None;
        }
        self.verified
            .as_ref()
            .and_then(|snapshot| snapshot.last_payload.as_ref())
            .and_then(ExtractedIdentity::from_payload)
    }

    /// Confirm the extracted identity and activate the eSIM.
    ///
    /// Activation failure does not stop the flow; the result reports
    /// whether it was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if confirmation is rejected; the flow stays on the
    /// confirm step.
    #[instrument(skip(self))]
    pub async fn confirm_identity(&mut self) -> Result<bool, FlowError> {
        self.expect_step(EsimStep::Confirm)?;
        self.ctx
            .mutate(Mutation::ConfirmKyc { verified: true }, "Failed to confirm KYC")
            .await?;
        self.step = EsimStep::Activation;
        self.activated = self.ctx.mutate_logged(Mutation::Activate).await;
        if self.activated {
            info!(request_id = ?self.ctx.request_id(), "eSIM activated");
        }
        Ok(self.activated)
    }

    /// Go back one step without touching the backend.
    pub fn back(&mut self) -> Navigation<EsimStep> {
        let target = self.step.previous();
        if let Navigation::Step(step) = target {
            if self.step == EsimStep::Kyc {
                self.ctx.retry_verification();
            }
            self.step = step;
        }
        target
    }

    /// Leave the flow, stopping verification timers and provider UI.
    pub fn close(mut self) {
        info!(request_id = ?self.ctx.request_id(), step = %self.step, "eSIM flow closed");
        self.ctx.shutdown();
    }
}
