//! Portal state shared by every flow.

use std::sync::Arc;

use sim_portal_core::RequestId;

use crate::admin::{AdminClient, FileSessionStore, MemorySessionStore, SessionStore};
use crate::api::{ApiError, PortalClient};
use crate::config::PortalConfig;
use crate::flows::{
    EsimPurchaseFlow, EsimStep, FlowServices, KycComplianceFlow, KycComplianceStep, SimSwapFlow,
    SimSwapStep,
};
use crate::notify::Notifier;
use crate::provider::{ProviderHost, VerificationProvider, WidgetProvider};
use crate::reconcile::RequestStatus;

/// Portal state: configuration, backend client, verification provider and
/// notifier.
///
/// Cheap to clone via `Arc`. Each flow started from it gets its own
/// reconciliation engine; the provider is shared because only one provider
/// interaction can be on screen at a time.
#[derive(Clone)]
pub struct Portal {
    inner: Arc<PortalInner>,
}

struct PortalInner {
    config: PortalConfig,
    client: PortalClient,
    provider: Arc<dyn VerificationProvider>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("config", &self.inner.config)
            .field("client", &self.inner.client)
            .finish_non_exhaustive()
    }
}

impl Portal {
    /// Create portal state with an explicit verification provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(
        config: PortalConfig,
        provider: Arc<dyn VerificationProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let client = PortalClient::new(&config.api)?;
        Ok(Self {
            inner: Arc::new(PortalInner {
                config,
                client,
                provider,
                notifier,
            }),
        })
    }

    /// Create portal state that drives the provider widget on `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_widget(
        config: PortalConfig,
        host: Arc<dyn ProviderHost>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let provider = Arc::new(WidgetProvider::new(host, config.provider.clone()));
        Self::new(config, provider, notifier)
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.inner.config
    }

    /// Backend client.
    #[must_use]
    pub fn client(&self) -> &PortalClient {
        &self.inner.client
    }

    /// Collaborators handed to each flow.
    #[must_use]
    pub fn services(&self) -> FlowServices {
        FlowServices {
            session: Arc::new(self.inner.client.clone()),
            provider: self.inner.provider.clone(),
            notifier: self.inner.notifier.clone(),
            engine: self.inner.config.engine,
            payment_delay: self.inner.config.payment_delay,
        }
    }

    #[must_use]
    pub fn esim_purchase(&self) -> EsimPurchaseFlow {
        EsimPurchaseFlow::new(self.services())
    }

    #[must_use]
    pub fn resume_esim_purchase(&self, request_id: RequestId, step: EsimStep) -> EsimPurchaseFlow {
        EsimPurchaseFlow::resume(self.services(), request_id, step)
    }

    #[must_use]
    pub fn sim_swap(&self) -> SimSwapFlow {
        SimSwapFlow::new(self.services())
    }

    #[must_use]
    pub fn resume_sim_swap(&self, request_id: RequestId, step: SimSwapStep) -> SimSwapFlow {
        SimSwapFlow::resume(self.services(), request_id, step)
    }

    #[must_use]
    pub fn kyc_compliance(&self) -> KycComplianceFlow {
        KycComplianceFlow::new(self.services())
    }

    #[must_use]
    pub fn resume_kyc_compliance(
        &self,
        request_id: RequestId,
        step: KycComplianceStep,
    ) -> KycComplianceFlow {
        KycComplianceFlow::resume(self.services(), request_id, step)
    }

    /// Status source for a request, for callers that watch verification
    /// outside a flow.
    #[must_use]
    pub fn request_status(
        &self,
        flow: sim_portal_core::FlowKind,
        request_id: RequestId,
    ) -> RequestStatus {
        RequestStatus::new(Arc::new(self.inner.client.clone()), flow, request_id)
    }

    /// Admin client whose token lives in the configured session file, or in
    /// memory when none is configured.
    #[must_use]
    pub fn admin(&self) -> AdminClient {
        let store: Arc<dyn SessionStore> = match &self.inner.config.session_file {
            Some(path) => Arc::new(FileSessionStore::new(path.clone())),
            None => Arc::new(MemorySessionStore::new()),
        };
        AdminClient::new(self.inner.client.clone(), store)
    }
}
