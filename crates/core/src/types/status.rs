//! Verification statuses and status-payload classification.
//!
//! The backend reports verification progress in loosely shaped JSON. A
//! domain-specific key (`kyc_status`, `verification_status`,
//! `identity_status`, camelCase variants, and their `data.*` equivalents)
//! always wins over the generic `status`/`data.status` fields, because both
//! may be populated with different values while a webhook is being applied.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::lookup;

/// Classification of one status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusClass {
    Verified,
    Rejected,
    ManualReview,
    /// No terminal information yet; keep polling.
    Pending,
}

impl StatusClass {
    /// Whether this classification ends polling.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The outcome recorded when this classification ends polling.
    #[must_use]
    pub const fn outcome(self) -> VerificationOutcome {
        match self {
            Self::Verified => VerificationOutcome::Verified,
            Self::Rejected => VerificationOutcome::Rejected,
            Self::ManualReview => VerificationOutcome::ManualReview,
            Self::Pending => VerificationOutcome::Pending,
        }
    }
}

/// Result of an identity verification as seen by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    #[default]
    Pending,
    Verified,
    Rejected,
    /// A human reviewer must decide; distinct from a hard decline.
    ManualReview,
    /// No terminal status arrived before the polling window closed.
    Timeout,
}

impl VerificationOutcome {
    /// Whether the outcome ends the verification without success.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Rejected | Self::ManualReview | Self::Timeout)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Rejected => write!(f, "rejected"),
            Self::ManualReview => write!(f, "manual_review"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Lifecycle phase of a reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPhase {
    #[default]
    Idle,
    /// The provider interaction is in progress.
    Verifying,
    /// Waiting for the backend to report a terminal status.
    Polling,
    Complete,
}

impl fmt::Display for VerificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Verifying => write!(f, "verifying"),
            Self::Polling => write!(f, "polling"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Status keys searched for a verification status, in priority order.
const STATUS_PATHS: &[&[&str]] = &[
    &["kyc_status"],
    &["kycStatus"],
    &["verification_status"],
    &["verificationStatus"],
    &["identity_status"],
    &["identityStatus"],
    &["data", "kyc_status"],
    &["data", "kycStatus"],
    &["data", "verification_status"],
    &["data", "verificationStatus"],
    &["data", "identity_status"],
    &["data", "identityStatus"],
    &["status"],
    &["data", "status"],
];

const VERIFIED: &[&str] = &["verified", "approved", "kyc_verified", "completed", "success"];
const REJECTED: &[&str] = &["rejected", "failed", "kyc_rejected", "declined", "expired"];
const MANUAL_REVIEW: &[&str] = &[
    "manual_review",
    "review_required",
    "requires_review",
    "pending_review",
];

/// Extract the normalized (trimmed, lowercase) status string from a payload.
///
/// Returns the first non-empty string found along the key list.
#[must_use]
pub fn extract_status(payload: &Value) -> Option<String> {
    STATUS_PATHS
        .iter()
        .filter_map(|path| lookup(payload, path))
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .find(|s| !s.is_empty())
}

/// Classify a normalized status string.
#[must_use]
pub fn classify_text(status: &str) -> StatusClass {
    if VERIFIED.contains(&status) {
        StatusClass::Verified
    } else if REJECTED.contains(&status) {
        StatusClass::Rejected
    } else if MANUAL_REVIEW.contains(&status) {
        StatusClass::ManualReview
    } else {
        StatusClass::Pending
    }
}

/// Classify a status payload.
///
/// A terminal status string decides the result. Without one, a truthy
/// `metadata.reviewNeeded` flag (top level or under `data`) yields
/// [`StatusClass::ManualReview`]; anything else is pending.
#[must_use]
pub fn classify_status(payload: &Value) -> StatusClass {
    let class = extract_status(payload).map_or(StatusClass::Pending, |s| classify_text(&s));
    if class.is_terminal() {
        return class;
    }

    let review_flagged = [
        &["metadata", "reviewNeeded"][..],
        &["data", "metadata", "reviewNeeded"][..],
    ]
    .iter()
    .filter_map(|path| lookup(payload, path))
    .any(is_truthy);

    if review_flagged {
        StatusClass::ManualReview
    } else {
        StatusClass::Pending
    }
}

/// Reason attached to a rejection, if the backend supplied one.
#[must_use]
pub fn rejection_reason(payload: &Value) -> Option<String> {
    [
        &["failure_reason"][..],
        &["rejection_reason"][..],
        &["data", "failure_reason"][..],
        &["data", "rejection_reason"][..],
    ]
    .iter()
    .filter_map(|path| lookup(payload, path))
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(ToOwned::to_owned)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
