//! Status reconciliation engine.
//!
//! One engine drives the verification sub-step of every flow: it opens the
//! provider, then reconciles the backend's view of the request by polling
//! until a terminal status arrives or the verification window closes.
//!
//! Two timers run while polling: the status poll and a countdown enforcing
//! the window. A manual refresh can race both. Every state change is guarded
//! by a generation counter and the current phase, so the first terminal
//! decision wins and late callbacks are discarded.

mod source;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use sim_portal_core::{
    DocumentType, StatusClass, VerificationOutcome, VerificationPhase, classify_status,
    rejection_reason,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use source::{RequestStatus, StatusSource};

use crate::config::EngineConfig;
use crate::notify::{Notice, Notifier};
use crate::provider::{Metadata, ProviderStatus, VerificationProvider};

const VERIFIED_MESSAGE: &str = "Identity verified successfully!";
const REJECTED_MESSAGE: &str = "Verification was rejected. Please contact support.";
const MANUAL_REVIEW_MESSAGE: &str = "Your verification requires manual review";
const TIMEOUT_MESSAGE: &str = "Verification timed out. Please contact support.";
const SUBMITTED_MESSAGE: &str = "Verification submitted. Waiting for results...";
const STILL_PROCESSING_MESSAGE: &str = "Verification still processing. Please wait...";
const CANCELLED_MESSAGE: &str = "Verification was cancelled";
const START_FAILED_MESSAGE: &str = "Verification failed. Please try again.";

/// Errors from driving the engine.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A verification is already running or awaiting a retry.
    #[error("Verification already in progress")]
    Busy,
}

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineSnapshot {
    pub phase: VerificationPhase,
    pub outcome: VerificationOutcome,
    /// Time left in the verification window while polling.
    pub remaining: Option<Duration>,
    pub last_payload: Option<Value>,
    /// Ids reported by the provider for this attempt.
    pub verification_id: Option<String>,
    pub identity_id: Option<String>,
}

impl EngineSnapshot {
    /// Nothing is running: idle, or a terminal outcome was reached.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(
            self.phase,
            VerificationPhase::Idle | VerificationPhase::Complete
        )
    }
}

/// Result of one status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// This check settled the verification.
    Resolved(VerificationOutcome),
    /// No terminal status yet.
    StillProcessing,
    /// The engine was no longer waiting on this attempt; the result was dropped.
    Discarded,
}

#[derive(Default)]
struct EngineState {
    phase: VerificationPhase,
    outcome: VerificationOutcome,
    deadline: Option<Instant>,
    last_payload: Option<Value>,
    verification_id: Option<String>,
    identity_id: Option<String>,
    generation: u64,
    timers: Vec<JoinHandle<()>>,
}

impl EngineState {
    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            phase: self.phase,
            outcome: self.outcome,
            remaining: self
                .deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now())),
            last_payload: self.last_payload.clone(),
            verification_id: self.verification_id.clone(),
            identity_id: self.identity_id.clone(),
        }
    }

    const fn is_waiting(&self, generation: u64) -> bool {
        self.generation == generation
            && matches!(
                self.phase,
                VerificationPhase::Verifying | VerificationPhase::Polling
            )
    }
}

struct EngineInner {
    provider: Arc<dyn VerificationProvider>,
    source: Arc<dyn StatusSource>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    snapshots: watch::Sender<EngineSnapshot>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for timer in state.timers.drain(..) {
            timer.abort();
        }
    }
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &EngineState) {
        self.snapshots.send_replace(state.snapshot());
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Move from idle to verifying and open a new generation.
    fn claim(&self) -> Result<u64, EngineError> {
        let mut state = self.lock();
        if state.phase != VerificationPhase::Idle {
            return Err(EngineError::Busy);
        }
        state.generation += 1;
        state.phase = VerificationPhase::Verifying;
        state.outcome = VerificationOutcome::Pending;
        state.last_payload = None;
        state.verification_id = None;
        state.identity_id = None;
        self.publish(&state);
        Ok(state.generation)
    }

    /// Back to idle, cancelling timers and invalidating in-flight callbacks.
    /// Returns whether an attempt was in progress.
    fn reset(&self) -> bool {
        let (timers, was_waiting) = {
            let mut state = self.lock();
            let was_waiting = state.is_waiting(state.generation);
            let timers = std::mem::take(&mut state.timers);
            *state = EngineState {
                generation: state.generation + 1,
                ..EngineState::default()
            };
            self.publish(&state);
            (timers, was_waiting)
        };
        for timer in timers {
            timer.abort();
        }
        was_waiting
    }

    /// Settle the attempt. Only the first writer for a generation succeeds.
    fn finish(
        &self,
        generation: u64,
        outcome: VerificationOutcome,
        payload: Option<Value>,
        notice: Notice,
    ) -> bool {
        let timers = {
            let mut state = self.lock();
            if !state.is_waiting(generation) {
                return false;
            }
            state.phase = VerificationPhase::Complete;
            state.outcome = outcome;
            state.deadline = None;
            if payload.is_some() {
                state.last_payload = payload;
            }
            self.publish(&state);
            std::mem::take(&mut state.timers)
        };
        for timer in timers {
            timer.abort();
        }
        info!(outcome = %outcome, "Verification settled");
        self.notifier.notify(notice);
        true
    }

    async fn check(&self, generation: u64) -> Refresh {
        if !self.lock().is_waiting(generation) {
            return Refresh::Discarded;
        }

        let payload = self.source.poll_status().await;
        let class = payload.as_ref().map_or(StatusClass::Pending, classify_status);
        if class.is_terminal() {
            let outcome = class.outcome();
            let notice = outcome_notice(outcome, payload.as_ref());
            return if self.finish(generation, outcome, payload, notice) {
                Refresh::Resolved(outcome)
            } else {
                debug!("Late status result discarded");
                Refresh::Discarded
            };
        }

        let mut state = self.lock();
        if !state.is_waiting(generation) {
            return Refresh::Discarded;
        }
        if payload.is_some() {
            state.last_payload = payload;
            self.publish(&state);
        }
        Refresh::StillProcessing
    }

    /// Returns whether the countdown should keep running.
    fn countdown(&self, generation: u64) -> bool {
        let expired = {
            let state = self.lock();
            if state.generation != generation || state.phase != VerificationPhase::Polling {
                return false;
            }
            let expired = state.deadline.is_some_and(|d| Instant::now() >= d);
            if !expired {
                self.publish(&state);
            }
            expired
        };
        if expired {
            warn!("Verification window elapsed without a terminal status");
            self.finish(
                generation,
                VerificationOutcome::Timeout,
                None,
                Notice::error(TIMEOUT_MESSAGE),
            );
        }
        !expired
    }

    fn enter_polling(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.phase != VerificationPhase::Verifying {
            return;
        }
        state.phase = VerificationPhase::Polling;
        state.deadline = Some(Instant::now() + self.config.window);

        let weak = Arc::downgrade(self);
        state.timers.push(tokio::spawn(poll_loop(
            weak.clone(),
            generation,
            self.config.poll_interval,
        )));
        state.timers.push(tokio::spawn(countdown_loop(
            weak,
            generation,
            self.config.countdown_interval,
        )));
        self.publish(&state);
        debug!(window_secs = self.config.window.as_secs(), "Polling for verification status");
    }

    /// Check once right away; poll only if that is not already terminal.
    /// Returns whether polling started.
    async fn after_submission(self: &Arc<Self>, generation: u64) -> bool {
        if self.check(generation).await == Refresh::StillProcessing {
            self.enter_polling(generation);
            return true;
        }
        false
    }
}

async fn poll_loop(engine: Weak<EngineInner>, generation: u64, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = engine.upgrade() else {
            return;
        };
        if inner.check(generation).await != Refresh::StillProcessing {
            return;
        }
    }
}

async fn countdown_loop(engine: Weak<EngineInner>, generation: u64, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = engine.upgrade() else {
            return;
        };
        if !inner.countdown(generation) {
            return;
        }
    }
}

fn outcome_notice(outcome: VerificationOutcome, payload: Option<&Value>) -> Notice {
    match outcome {
        VerificationOutcome::Verified => Notice::success(VERIFIED_MESSAGE),
        VerificationOutcome::Rejected => Notice::error(
            payload
                .and_then(rejection_reason)
                .unwrap_or_else(|| REJECTED_MESSAGE.to_owned()),
        ),
        VerificationOutcome::ManualReview => Notice::warning(MANUAL_REVIEW_MESSAGE),
        VerificationOutcome::Timeout => Notice::error(TIMEOUT_MESSAGE),
        VerificationOutcome::Pending => Notice::info(STILL_PROCESSING_MESSAGE),
    }
}

/// Verification driver shared by all flows.
///
/// Cheap to clone; clones drive the same attempt. Dropping the last clone
/// stops the timers.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        provider: Arc<dyn VerificationProvider>,
        source: Arc<dyn StatusSource>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(EngineSnapshot::default());
        Self {
            inner: Arc::new(EngineInner {
                provider,
                source,
                notifier,
                config,
                state: Mutex::new(EngineState::default()),
                snapshots,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receive a snapshot on every state change and countdown tick.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Open the provider and start reconciling.
    ///
    /// Returns once the provider interaction ends: idle if the user
    /// cancelled, complete if the outcome is already known, polling
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`EngineError::Busy`] unless the engine is idle.
    pub async fn begin(
        &self,
        document_type: DocumentType,
        metadata: Metadata,
    ) -> Result<EngineSnapshot, EngineError> {
        let inner = &self.inner;
        let generation = inner.claim()?;
        let result = inner
            .provider
            .start_verification(document_type, metadata)
            .await;

        match result.status {
            ProviderStatus::Cancelled => {
                let mut state = inner.lock();
                if state.is_waiting(generation) {
                    state.phase = VerificationPhase::Idle;
                    inner.publish(&state);
                    drop(state);
                    info!("Verification cancelled by the user");
                    inner.notifier.notify(Notice::info(CANCELLED_MESSAGE));
                }
            }
            ProviderStatus::Failed => {
                warn!(detail = %result.data, "Verification provider failed");
                inner.finish(
                    generation,
                    VerificationOutcome::Rejected,
                    Some(result.data),
                    Notice::error(START_FAILED_MESSAGE),
                );
            }
            ProviderStatus::Success => {
                {
                    let mut state = inner.lock();
                    if !state.is_waiting(generation) {
                        return Ok(state.snapshot());
                    }
                    state.verification_id = result.verification_id;
                    state.identity_id = result.identity_id;
                    inner.publish(&state);
                }
                if inner.after_submission(generation).await {
                    inner.notifier.notify(Notice::info(SUBMITTED_MESSAGE));
                }
            }
        }
        Ok(self.snapshot())
    }

    /// Reconcile a verification submitted earlier without reopening the
    /// provider.
    ///
    /// # Errors
    ///
    /// [`EngineError::Busy`] unless the engine is idle.
    pub async fn resume(&self) -> Result<EngineSnapshot, EngineError> {
        let generation = self.inner.claim()?;
        info!("Resuming verification status checks");
        self.inner.after_submission(generation).await;
        Ok(self.snapshot())
    }

    /// One status check, as the poll timer runs it.
    pub async fn tick(&self) -> Refresh {
        let generation = self.inner.generation();
        self.inner.check(generation).await
    }

    /// One countdown step. Returns whether the countdown is still running.
    pub fn countdown_tick(&self) -> bool {
        let generation = self.inner.generation();
        self.inner.countdown(generation)
    }

    /// User-requested status check. Safe to race the timers.
    pub async fn manual_refresh(&self) -> Refresh {
        let refresh = self.tick().await;
        if refresh == Refresh::StillProcessing {
            self.inner
                .notifier
                .notify(Notice::info(STILL_PROCESSING_MESSAGE));
        }
        refresh
    }

    /// Forget the current attempt so a new one can begin.
    pub fn retry(&self) {
        if self.inner.reset() {
            self.inner.provider.cleanup();
        }
        debug!("Verification reset for retry");
    }

    /// Stop everything: timers, in-flight callbacks and the provider UI.
    pub fn shutdown(&self) {
        self.inner.reset();
        self.inner.provider.cleanup();
        debug!("Verification engine shut down");
    }

    /// Wait until the engine is idle or complete.
    pub async fn wait_for_completion(&self) -> EngineSnapshot {
        let mut snapshots = self.subscribe();
        match snapshots.wait_for(EngineSnapshot::is_settled).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }
}
