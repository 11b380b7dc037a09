//! In-memory fakes shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use sim_portal_core::{DocumentType, FlowKind, Msisdn, RequestId, SessionId};

use crate::api::{ApiError, LedgerEntry, Mutation, RequestSession};
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::provider::{
    EndReason, Metadata, ProviderError, ProviderResult, ProviderStatus, VerificationProvider,
};

/// Collects every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Provider that resolves immediately with a preset status.
pub struct FakeProvider {
    pub status: Mutex<ProviderStatus>,
    pub starts: Mutex<Vec<(DocumentType, Metadata)>>,
    pub cleanups: AtomicUsize,
}

impl FakeProvider {
    pub fn new(status: ProviderStatus) -> Self {
        Self {
            status: Mutex::new(status),
            starts: Mutex::new(Vec::new()),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, status: ProviderStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationProvider for FakeProvider {
    async fn load(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    async fn start_verification(
        &self,
        document_type: DocumentType,
        metadata: Metadata,
    ) -> ProviderResult {
        self.starts.lock().unwrap().push((document_type, metadata));
        let session_id = SessionId::generate();
        match *self.status.lock().unwrap() {
            ProviderStatus::Success => ProviderResult {
                verification_id: Some("ver-fake".into()),
                identity_id: Some("ident-fake".into()),
                ..ProviderResult::unconfirmed(session_id, EndReason::Finished)
            },
            ProviderStatus::Failed => ProviderResult::failed(session_id, "boom"),
            ProviderStatus::Cancelled => ProviderResult::cancelled(session_id),
        }
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend double recording every call.
///
/// Status polls pop from a queue; once empty they return `fallback_status`.
pub struct FakeSession {
    pub request_id: Mutex<Option<&'static str>>,
    pub calls: Mutex<Vec<String>>,
    pub mutations: Mutex<Vec<Mutation>>,
    pub failing: Mutex<Vec<&'static str>>,
    pub statuses: Mutex<VecDeque<Option<Value>>>,
    pub fallback_status: Mutex<Option<Value>>,
    pub subscriber_exists: Mutex<bool>,
    pub ledger_fails: Mutex<bool>,
    pub ledger: Mutex<Vec<LedgerEntry>>,
    pub polls: AtomicUsize,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self {
            request_id: Mutex::new(Some("req-1")),
            calls: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: Mutex::new(Some(json!({ "kyc_status": "pending" }))),
            subscriber_exists: Mutex::new(true),
            ledger_fails: Mutex::new(false),
            ledger: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }
}

impl FakeSession {
    pub fn fail_step(&self, path: &'static str) {
        self.failing.lock().unwrap().push(path);
    }

    pub fn heal_step(&self, path: &'static str) {
        self.failing.lock().unwrap().retain(|p| *p != path);
    }

    pub fn push_status(&self, payload: Option<Value>) {
        self.statuses.lock().unwrap().push_back(payload);
    }

    pub fn set_fallback_status(&self, payload: Option<Value>) {
        *self.fallback_status.lock().unwrap() = payload;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RequestSession for FakeSession {
    async fn start(&self, flow: FlowKind) -> Result<RequestId, ApiError> {
        self.record(format!("{}/start", flow.path_segment()));
        self.request_id
            .lock()
            .unwrap()
            .and_then(|id| RequestId::new(id))
            .ok_or(ApiError::MissingIdentifier)
    }

    async fn mutate(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
        mutation: Mutation,
    ) -> Result<Value, ApiError> {
        let path = mutation.path();
        self.record(format!("{}/{request_id}/{path}", flow.path_segment()));
        if self.failing.lock().unwrap().contains(&path) {
            return Err(ApiError::Api {
                status: 422,
                message: format!("{path} rejected"),
            });
        }
        self.mutations.lock().unwrap().push(mutation);
        Ok(json!({ "success": true }))
    }

    async fn list_numbers(
        &self,
        flow: FlowKind,
        request_id: &RequestId,
    ) -> Result<Vec<String>, ApiError> {
        self.record(format!("{}/{request_id}/numbers", flow.path_segment()));
        Ok(vec!["71234567".into(), "72345678".into()])
    }

    async fn poll_status(&self, _flow: FlowKind, _request_id: &RequestId) -> Option<Value> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let queued = self.statuses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback_status.lock().unwrap().clone())
    }

    async fn subscriber_lookup(&self, msisdn: &Msisdn) -> Result<bool, ApiError> {
        self.record(format!("subscriber-lookup/{msisdn}"));
        Ok(*self.subscriber_exists.lock().unwrap())
    }

    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), ApiError> {
        self.record("payments/record".into());
        if *self.ledger_fails.lock().unwrap() {
            return Err(ApiError::Api {
                status: 500,
                message: "ledger unavailable".into(),
            });
        }
        self.ledger.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
