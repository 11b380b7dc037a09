use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sim_portal_core::{FlowKind, RequestId};

use crate::api::RequestSession;

/// Where the engine reads verification status from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Latest status payload, or `None` when nothing new could be read.
    async fn poll_status(&self) -> Option<Value>;
}

/// Status of one backend request.
#[derive(Clone)]
pub struct RequestStatus {
    session: Arc<dyn RequestSession>,
    flow: FlowKind,
    request_id: RequestId,
}

impl std::fmt::Debug for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStatus")
            .field("flow", &self.flow)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl RequestStatus {
    #[must_use]
    pub fn new(session: Arc<dyn RequestSession>, flow: FlowKind, request_id: RequestId) -> Self {
        Self {
            session,
            flow,
            request_id,
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

#[async_trait]
impl StatusSource for RequestStatus {
    async fn poll_status(&self) -> Option<Value> {
        self.session.poll_status(self.flow, &self.request_id).await
    }
}
