//! Verification provider adapter.
//!
//! Orchestrators depend on [`VerificationProvider`] only. [`WidgetProvider`]
//! drives the hosted identity widget through a [`ProviderHost`]; tests and
//! other shells can substitute their own implementation.

mod host;
mod widget;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use sim_portal_core::{DocumentType, SessionId};
use thiserror::Error;

pub use host::{
    BodyStyle, CONTAINER_ID, ComputedStyle, FrameNode, HostError, HostNode, NodeHandle,
    Position, ProviderHost, TriggerSpec,
};
pub use widget::WidgetProvider;

/// Caller-supplied key/value metadata forwarded to the provider.
pub type Metadata = BTreeMap<String, String>;

/// DOM event names announcing a finished verification.
pub const FINISH_EVENTS: [&str; 2] = ["metamap:userFinishedSdk", "mati:userFinishedSdk"];

/// DOM event names announcing the user left the widget.
pub const EXIT_EVENTS: [&str; 2] = ["metamap:exitedSdk", "mati:exitedSdk"];

/// Errors from preparing the provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The widget script could not be loaded.
    #[error("Failed to load verification SDK: {0}")]
    LoadFailed(String),
}

/// How an interaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    /// The user finished, or the widget went away without an explicit exit.
    Success,
    /// The interaction could not run.
    Failed,
    /// The user exited, or the interaction was superseded.
    Cancelled,
}

/// Why a successful interaction is considered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// The provider reported completion.
    Finished,
    /// The provider UI disappeared without a completion event.
    Dismissed,
    /// The interaction outlived the session ceiling.
    Ceiling,
}

/// Outcome of one provider interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub status: ProviderStatus,
    pub session_id: SessionId,
    pub verification_id: Option<String>,
    pub identity_id: Option<String>,
    /// Raw event detail, or an error description for failures.
    pub data: Value,
    /// Set for successful interactions.
    pub ended_by: Option<EndReason>,
}

impl ProviderResult {
    #[must_use]
    pub fn failed(session_id: SessionId, message: &str) -> Self {
        Self {
            status: ProviderStatus::Failed,
            session_id,
            verification_id: None,
            identity_id: None,
            data: serde_json::json!({ "error": message }),
            ended_by: None,
        }
    }

    #[must_use]
    pub const fn cancelled(session_id: SessionId) -> Self {
        Self {
            status: ProviderStatus::Cancelled,
            session_id,
            verification_id: None,
            identity_id: None,
            data: Value::Null,
            ended_by: None,
        }
    }

    /// Success without a completion event; the backend decides the outcome.
    #[must_use]
    pub const fn unconfirmed(session_id: SessionId, ended_by: EndReason) -> Self {
        Self {
            status: ProviderStatus::Success,
            session_id,
            verification_id: None,
            identity_id: None,
            data: Value::Null,
            ended_by: Some(ended_by),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, ProviderStatus::Success)
    }
}

/// Event raised by the provider widget.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Finished {
        session_id: Option<String>,
        verification_id: Option<String>,
        identity_id: Option<String>,
        detail: Value,
    },
    Exited {
        session_id: Option<String>,
        detail: Value,
    },
}

impl ProviderEvent {
    /// Translate a named DOM event into a provider event.
    ///
    /// Returns `None` for event names the adapter does not listen to.
    #[must_use]
    pub fn from_dom(name: &str, detail: Value) -> Option<Self> {
        let field = |key: &str| detail.get(key).and_then(Value::as_str).map(ToOwned::to_owned);
        if FINISH_EVENTS.contains(&name) {
            Some(Self::Finished {
                session_id: field("sessionId"),
                verification_id: field("verificationId"),
                identity_id: field("identityId"),
                detail,
            })
        } else if EXIT_EVENTS.contains(&name) {
            Some(Self::Exited {
                session_id: field("sessionId"),
                detail,
            })
        } else {
            None
        }
    }

    /// Events without a session id belong to whichever session is active.
    #[must_use]
    pub fn belongs_to(&self, session_id: SessionId) -> bool {
        let tagged = match self {
            Self::Finished { session_id, .. } | Self::Exited { session_id, .. } => session_id,
        };
        tagged
            .as_deref()
            .is_none_or(|id| id == session_id.to_string())
    }

    fn into_result(self, session_id: SessionId) -> ProviderResult {
        match self {
            Self::Finished {
                verification_id,
                identity_id,
                detail,
                ..
            } => ProviderResult {
                status: ProviderStatus::Success,
                session_id,
                verification_id,
                identity_id,
                data: detail,
                ended_by: Some(EndReason::Finished),
            },
            Self::Exited { detail, .. } => ProviderResult {
                data: detail,
                ..ProviderResult::cancelled(session_id)
            },
        }
    }
}

/// Contract every verification provider satisfies.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    /// Prepare the provider. Idempotent; concurrent calls share one load.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot be prepared. The error is
    /// also kept for [`VerificationProvider::last_error`] and a later call
    /// may retry.
    async fn load(&self) -> Result<(), ProviderError>;

    fn is_ready(&self) -> bool;

    /// Most recent load or start failure.
    fn last_error(&self) -> Option<String>;

    /// Run one interaction until it ends.
    ///
    /// Never fails; failures come back as [`ProviderStatus::Failed`]. At most
    /// one interaction is active: starting a new one cancels the previous.
    async fn start_verification(
        &self,
        document_type: DocumentType,
        metadata: Metadata,
    ) -> ProviderResult;

    /// Tear down any provider UI and restore the page. Idempotent.
    fn cleanup(&self);
}
