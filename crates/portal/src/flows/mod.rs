//! Step-flow orchestrators.
//!
//! Each customer flow is a state machine over named steps. A forward
//! transition is committed only after the step's backend mutation succeeds;
//! on failure the flow stays put and an error notice is emitted. Back
//! navigation never calls the backend.
//!
//! Operations take `&mut self`, so a flow cannot run two steps at once.

mod esim;
mod kyc_compliance;
mod sim_swap;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sim_portal_core::{
    DocumentType, FlowKind, MsisdnError, PaymentError, RegistrationDetails, RegistrationError,
    RequestId, VerificationOutcome, VerificationPhase,
};
use thiserror::Error;
use tracing::{info, warn};

pub use esim::{EsimPurchaseFlow, EsimStep};
pub use kyc_compliance::{KycComplianceFlow, KycComplianceStep};
pub use sim_swap::{SimSwapFlow, SimSwapStep};

use crate::api::{ApiError, Mutation, RequestSession};
use crate::config::EngineConfig;
use crate::notify::{Notice, Notifier};
use crate::provider::{Metadata, ProviderError, VerificationProvider};
use crate::reconcile::{EngineError, EngineSnapshot, ReconciliationEngine, RequestStatus};

/// Support contact shown when verification does not succeed.
pub const SUPPORT_EMAIL: &str = "support@btc.bw";
pub const SUPPORT_PHONE: &str = "+267 0800 123 456";

/// Delay before a failure screen returns the user home.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(10);

/// Errors from flow operations.
///
/// Every user-actionable error has already been reported as a notice by the
/// time it is returned.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow has no backend request yet.
    #[error("No request has been started for this flow")]
    MissingIdentifier,

    /// A backend call failed; the flow did not advance.
    #[error(transparent)]
    Mutation(#[from] ApiError),

    /// User input was rejected before any backend call.
    #[error("{0}")]
    Validation(String),

    /// Invalid phone number.
    #[error(transparent)]
    Msisdn(#[from] MsisdnError),

    /// Registration form errors.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The operation is not available at the current step.
    #[error("Not available at the {0} step")]
    InvalidStep(&'static str),

    /// The subscriber may not use this flow.
    #[error("{0}")]
    NotEligible(String),

    /// Verification could not be started.
    #[error(transparent)]
    Verification(#[from] EngineError),

    /// The verification provider is unavailable.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Payment selection is incomplete.
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// Collaborators every flow needs.
#[derive(Clone)]
pub struct FlowServices {
    pub session: Arc<dyn RequestSession>,
    pub provider: Arc<dyn VerificationProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub engine: EngineConfig,
    pub payment_delay: Duration,
}

impl std::fmt::Debug for FlowServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowServices")
            .field("engine", &self.engine)
            .field("payment_delay", &self.payment_delay)
            .finish_non_exhaustive()
    }
}

/// Shown when verification ends without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureScreen {
    pub outcome: VerificationOutcome,
    pub support_email: &'static str,
    pub support_phone: &'static str,
    pub redirect_after: Duration,
}

impl FailureScreen {
    #[must_use]
    pub const fn new(outcome: VerificationOutcome) -> Self {
        Self {
            outcome,
            support_email: SUPPORT_EMAIL,
            support_phone: SUPPORT_PHONE,
            redirect_after: REDIRECT_DELAY,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self.outcome {
            VerificationOutcome::Rejected => {
                "Your verification was not approved. Please contact support for assistance."
            }
            VerificationOutcome::ManualReview => {
                "Your verification requires manual review. Please contact support for assistance."
            }
            VerificationOutcome::Timeout => {
                "We couldn't receive the verification results in time. Please contact support."
            }
            VerificationOutcome::Pending | VerificationOutcome::Verified => {
                "We couldn't verify your identity. Please try again or contact support."
            }
        }
    }

    /// Wait out the automatic redirect.
    pub async fn await_redirect(&self) {
        tokio::time::sleep(self.redirect_after).await;
    }
}

/// What the verification step shows.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationView {
    /// Choose a document and start.
    Intro,
    /// Provider open or waiting on the backend.
    InProgress(EngineSnapshot),
    /// Verified; the flow has moved on.
    Verified(EngineSnapshot),
    /// Rejected, manual review or timed out.
    Failed(FailureScreen),
}

impl VerificationView {
    fn from_snapshot(snapshot: EngineSnapshot) -> Self {
        match (snapshot.phase, snapshot.outcome) {
            (VerificationPhase::Idle, _) => Self::Intro,
            (VerificationPhase::Complete, VerificationOutcome::Verified) => {
                Self::Verified(snapshot)
            }
            (VerificationPhase::Complete, outcome) => Self::Failed(FailureScreen::new(outcome)),
            _ => Self::InProgress(snapshot),
        }
    }
}

/// Where a back action leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation<S> {
    /// Moved to this step.
    Step(S),
    /// Left the flow from its first step.
    Exit,
    /// Terminal step; back is not offered.
    Stay(S),
}

/// Registration fields forwarded to the provider as metadata.
fn registration_metadata(metadata: &mut Metadata, details: &RegistrationDetails) {
    let fields = [
        ("plotNumber", &details.plot_number),
        ("ward", &details.ward),
        ("village", &details.village),
        ("city", &details.city),
        ("postalAddress", &details.postal_address),
        ("nextOfKinName", &details.next_of_kin_name),
        ("nextOfKinRelation", &details.next_of_kin_relation),
        ("nextOfKinPhone", &details.next_of_kin_phone),
        ("email", &details.email),
    ];
    for (key, value) in fields {
        metadata.insert(key.to_owned(), value.clone());
    }
}

/// State and collaborators shared by the flow implementations.
pub(crate) struct FlowContext {
    kind: FlowKind,
    services: FlowServices,
    request_id: Option<RequestId>,
    engine: Option<ReconciliationEngine>,
}

impl FlowContext {
    pub(crate) fn new(kind: FlowKind, services: FlowServices) -> Self {
        Self {
            kind,
            services,
            request_id: None,
            engine: None,
        }
    }

    pub(crate) fn with_request(kind: FlowKind, services: FlowServices, request_id: RequestId) -> Self {
        let mut ctx = Self::new(kind, services);
        ctx.request_id = Some(request_id);
        ctx
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.services.notifier.notify(notice);
    }

    pub(crate) fn session(&self) -> &dyn RequestSession {
        self.services.session.as_ref()
    }

    pub(crate) const fn kind(&self) -> FlowKind {
        self.kind
    }

    pub(crate) const fn payment_delay(&self) -> Duration {
        self.services.payment_delay
    }

    fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// The request id, or a "missing session" error without touching the
    /// backend.
    pub(crate) fn require_request(&self) -> Result<RequestId, FlowError> {
        self.request_id.clone().ok_or_else(|| {
            warn!(flow = %self.kind, "Operation attempted without a request id");
            self.notify(Notice::error(format!("Missing {} session", self.kind.label())));
            FlowError::MissingIdentifier
        })
    }

    /// Start the backend request unless one exists.
    async fn ensure_started(&mut self, failure: &str) -> Result<RequestId, FlowError> {
        if let Some(id) = &self.request_id {
            return Ok(id.clone());
        }
        match self.services.session.start(self.kind).await {
            Ok(id) => {
                info!(flow = %self.kind, request_id = %id, "Request started");
                self.request_id = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                warn!(flow = %self.kind, error = %e, "Failed to start request");
                self.notify(Notice::error(failure));
                Err(e.into())
            }
        }
    }

    /// Apply a step mutation, reporting failure with `failure`.
    pub(crate) async fn mutate(&self, mutation: Mutation, failure: &str) -> Result<Value, FlowError> {
        let request_id = self.require_request()?;
        let step = mutation.path();
        self.services
            .session
            .mutate(self.kind, &request_id, mutation)
            .await
            .map_err(|e| {
                warn!(flow = %self.kind, request_id = %request_id, step, error = %e, "Step mutation failed");
                self.notify(Notice::error(failure));
                FlowError::from(e)
            })
    }

    /// Apply a mutation whose failure is logged and otherwise ignored.
    async fn mutate_logged(&self, mutation: Mutation) -> bool {
        let Some(request_id) = self.request_id.clone() else {
            return false;
        };
        let step = mutation.path();
        match self.services.session.mutate(self.kind, &request_id, mutation).await {
            Ok(_) => true,
            Err(e) => {
                warn!(flow = %self.kind, request_id = %request_id, step, error = %e, "Step mutation failed, continuing");
                false
            }
        }
    }

    async fn list_numbers(&self, failure: &str) -> Result<Vec<String>, FlowError> {
        let request_id = self.require_request()?;
        self.services
            .session
            .list_numbers(self.kind, &request_id)
            .await
            .map_err(|e| {
                warn!(flow = %self.kind, request_id = %request_id, error = %e, "Failed to list numbers");
                self.notify(Notice::error(failure));
                FlowError::from(e)
            })
    }

    fn engine(&mut self) -> Result<ReconciliationEngine, FlowError> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let request_id = self.require_request()?;
        let source = RequestStatus::new(self.services.session.clone(), self.kind, request_id);
        let engine = ReconciliationEngine::new(
            self.services.provider.clone(),
            Arc::new(source),
            self.services.notifier.clone(),
            self.services.engine,
        );
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    fn verification_metadata(&self, request_id: &RequestId) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("requestId".to_owned(), request_id.to_string());
        metadata.insert("flow".to_owned(), self.kind.to_string());
        metadata.insert("timestamp".to_owned(), chrono::Utc::now().to_rfc3339());
        metadata
    }

    /// Start verification: record the document type on the request, then
    /// open the provider and reconcile.
    async fn start_verification(
        &mut self,
        document_type: DocumentType,
        extra: Metadata,
    ) -> Result<VerificationView, FlowError> {
        let request_id = self.require_request()?;
        let engine = self.engine()?;
        if engine.snapshot().phase != VerificationPhase::Idle {
            return Err(EngineError::Busy.into());
        }

        if let Err(e) = self.services.provider.load().await {
            self.notify(Notice::error("Verification service is unavailable. Please try again."));
            return Err(e.into());
        }

        self.mutate(
            Mutation::StartKyc { document_type },
            "Failed to start verification. Please try again.",
        )
        .await?;

        let mut metadata = self.verification_metadata(&request_id);
        metadata.extend(extra);
        let snapshot = engine.begin(document_type, metadata).await?;
        Ok(VerificationView::from_snapshot(snapshot))
    }

    async fn refresh_verification(&mut self) -> Result<VerificationView, FlowError> {
        let engine = self.engine()?;
        engine.manual_refresh().await;
        Ok(VerificationView::from_snapshot(engine.snapshot()))
    }

    async fn await_verification(&mut self) -> Result<VerificationView, FlowError> {
        let engine = self.engine()?;
        Ok(VerificationView::from_snapshot(
            engine.wait_for_completion().await,
        ))
    }

    /// Resume reconciling a verification submitted in an earlier session.
    async fn resume_verification(&mut self) -> Result<VerificationView, FlowError> {
        let engine = self.engine()?;
        let snapshot = engine.resume().await?;
        Ok(VerificationView::from_snapshot(snapshot))
    }

    fn retry_verification(&mut self) {
        if let Some(engine) = &self.engine {
            engine.retry();
        }
    }

    fn verification_snapshot(&self) -> Option<EngineSnapshot> {
        self.engine.as_ref().map(ReconciliationEngine::snapshot)
    }

    fn verification_view(&self) -> VerificationView {
        self.verification_snapshot()
            .map_or(VerificationView::Intro, VerificationView::from_snapshot)
    }

    /// Stop timers and tear down provider UI.
    fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown();
        }
    }
}

impl Drop for FlowContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use sim_portal_core::RegistrationDetails;

    use super::FlowServices;
    use crate::config::EngineConfig;
    use crate::provider::ProviderStatus;
    use crate::testing::{FakeProvider, FakeSession, RecordingNotifier};

    pub struct Fixture {
        pub services: FlowServices,
        pub session: Arc<FakeSession>,
        pub provider: Arc<FakeProvider>,
        pub notifier: Arc<RecordingNotifier>,
    }

    pub fn fixture() -> Fixture {
        let session = Arc::new(FakeSession::default());
        let provider = Arc::new(FakeProvider::new(ProviderStatus::Success));
        let notifier = Arc::new(RecordingNotifier::default());
        let services = FlowServices {
            session: session.clone(),
            provider: provider.clone(),
            notifier: notifier.clone(),
            engine: EngineConfig::default(),
            payment_delay: Duration::from_secs(2),
        };
        Fixture {
            services,
            session,
            provider,
            notifier,
        }
    }

    pub fn registration() -> RegistrationDetails {
        RegistrationDetails {
            plot_number: "1234".into(),
            ward: "Ward 5".into(),
            village: "Mogoditshane".into(),
            city: "Gaborone".into(),
            postal_address: String::new(),
            next_of_kin_name: "Neo Kgosi".into(),
            next_of_kin_relation: "sibling".into(),
            next_of_kin_phone: "71234567".into(),
            email: "neo@example.com".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_from_snapshot() {
        assert_eq!(
            VerificationView::from_snapshot(EngineSnapshot::default()),
            VerificationView::Intro
        );

        let timed_out = EngineSnapshot {
            phase: VerificationPhase::Complete,
            outcome: VerificationOutcome::Timeout,
            ..EngineSnapshot::default()
        };
        let VerificationView::Failed(screen) = VerificationView::from_snapshot(timed_out) else {
            panic!("expected failure screen");
        };
        assert_eq!(screen.redirect_after, Duration::from_secs(10));
        assert_eq!(screen.support_email, SUPPORT_EMAIL);
        assert!(screen.message().contains("in time"));
    }

    #[test]
    fn test_registration_metadata() {
        let mut metadata = Metadata::new();
        registration_metadata(&mut metadata, &test_support::registration());
        assert_eq!(metadata["village"], "Mogoditshane");
        assert_eq!(metadata["nextOfKinRelation"], "sibling");
        assert_eq!(metadata["postalAddress"], "");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_context_with_request_keeps_id() {
        let fx = test_support::fixture();
        let id = RequestId::new("req-9").unwrap();
        let ctx = FlowContext::with_request(FlowKind::SimSwap, fx.services.clone(), id.clone());

        assert_eq!(ctx.kind(), FlowKind::SimSwap);
        assert_eq!(ctx.require_request().unwrap(), id);
        assert!(fx.session.calls().is_empty());
        assert!(fx.notifier.messages(crate::notify::NoticeLevel::Error).is_empty());
    }
}
