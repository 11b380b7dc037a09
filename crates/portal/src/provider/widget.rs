//! Hosted identity widget adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sim_portal_core::{DocumentType, SessionId};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::host::{BodyStyle, CONTAINER_ID, ProviderHost, TriggerSpec};
use super::{Metadata, ProviderError, ProviderEvent, ProviderResult, VerificationProvider};
use crate::config::ProviderConfig;

struct ActiveSession {
    session_id: SessionId,
    snapshot: BodyStyle,
}

/// Drives the provider's hosted widget.
///
/// The widget is opened through an off-screen trigger and reports back
/// through DOM events, which the host forwards to [`WidgetProvider::event_sink`].
/// A watchdog notices when the widget disappears without reporting.
pub struct WidgetProvider {
    host: Arc<dyn ProviderHost>,
    config: ProviderConfig,
    ready: AtomicBool,
    last_error: Mutex<Option<String>>,
    load_lock: tokio::sync::Mutex<()>,
    events_tx: mpsc::UnboundedSender<ProviderEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProviderEvent>>,
    active: Mutex<Option<ActiveSession>>,
    active_tx: watch::Sender<Option<SessionId>>,
}

impl std::fmt::Debug for WidgetProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetProvider")
            .field("ready", &self.is_ready())
            .field("active", &*self.active_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl WidgetProvider {
    #[must_use]
    pub fn new(host: Arc<dyn ProviderHost>, config: ProviderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (active_tx, _) = watch::channel(None);
        Self {
            host,
            config,
            ready: AtomicBool::new(false),
            last_error: Mutex::new(None),
            load_lock: tokio::sync::Mutex::new(()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            active: Mutex::new(None),
            active_tx,
        }
    }

    /// Where the host delivers provider events.
    #[must_use]
    pub fn event_sink(&self) -> mpsc::UnboundedSender<ProviderEvent> {
        self.events_tx.clone()
    }

    /// Session of the interaction in progress, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        *self.active_tx.borrow()
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Whether any provider UI is still on screen.
    fn provider_ui_present(&self) -> bool {
        let overlay = self
            .host
            .provider_nodes()
            .iter()
            .any(|node| node.is_provider_ui() && node.looks_like_overlay() && node.is_visible());
        overlay
            || self
                .host
                .frames()
                .iter()
                .any(|frame| frame.mentions(&self.config.frame_pattern))
    }

    async fn await_outcome(
        &self,
        session_id: SessionId,
        events: &mut mpsc::UnboundedReceiver<ProviderEvent>,
        active_rx: &mut watch::Receiver<Option<SessionId>>,
    ) -> ProviderResult {
        let started = Instant::now();
        let mut watchdog = tokio::time::interval(self.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        watchdog.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) if event.belongs_to(session_id) => {
                        debug!(?event, "Provider event received");
                        self.cleanup();
                        return event.into_result(session_id);
                    }
                    Some(_) => debug!("Ignoring event for another session"),
                    None => return ProviderResult::cancelled(session_id),
                },
                changed = active_rx.changed() => {
                    if changed.is_err() || *active_rx.borrow_and_update() != Some(session_id) {
                        info!("Verification interaction superseded");
                        return ProviderResult::cancelled(session_id);
                    }
                }
                _ = watchdog.tick() => {
                    if started.elapsed() > self.config.max_session {
                        warn!("Verification interaction hit the session ceiling");
                        self.cleanup();
                        return ProviderResult::unconfirmed(session_id, super::EndReason::Ceiling);
                    }
                    if !self.host.has_container() {
                        continue;
                    }
                    if !self.provider_ui_present() {
                        info!("Provider UI closed without a completion event");
                        self.cleanup();
                        return ProviderResult::unconfirmed(session_id, super::EndReason::Dismissed);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl VerificationProvider for WidgetProvider {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<(), ProviderError> {
        if self.is_ready() {
            return Ok(());
        }
        let _guard = self.load_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        let src = &self.config.script_url;
        if !self.host.has_script(src) {
            if let Err(e) = self.host.load_script(src).await {
                error!(error = %e, src, "Failed to load verification SDK");
                self.set_error(Some("Failed to load verification SDK".to_owned()));
                return Err(ProviderError::LoadFailed(e.to_string()));
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        self.set_error(None);
        info!("Verification SDK ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[instrument(skip(self, metadata), fields(document_type = %document_type))]
    async fn start_verification(
        &self,
        document_type: DocumentType,
        metadata: Metadata,
    ) -> ProviderResult {
        let session_id = SessionId::generate();
        if !self.is_ready() {
            warn!("Verification requested before the SDK was ready");
            self.set_error(Some("Verification SDK not ready".to_owned()));
            return ProviderResult::failed(session_id, "Verification SDK not ready");
        }

        // Ends any interaction in flight; its loop sees the signal and releases the receiver.
        self.cleanup();
        let mut events = self.events_rx.lock().await;
        while events.try_recv().is_ok() {}

        let snapshot = self.host.body_style();
        self.host.set_body_style(&snapshot.locked());
        *self.active() = Some(ActiveSession {
            session_id,
            snapshot,
        });
        self.active_tx.send_replace(Some(session_id));
        let mut active_rx = self.active_tx.subscribe();

        let mut metadata = metadata;
        metadata.insert("sessionId".to_owned(), session_id.to_string());
        metadata.insert("documentType".to_owned(), document_type.as_str().to_owned());
        let trigger = TriggerSpec {
            container_id: CONTAINER_ID,
            client_id: self.config.client_id.clone(),
            flow_id: self.config.flow_for(document_type).to_owned(),
            metadata: serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_owned()),
            nopersist: true,
        };

        if let Err(e) = self.host.mount_trigger(&trigger) {
            error!(error = %e, "Failed to start verification");
            self.cleanup();
            self.set_error(Some("Failed to start verification".to_owned()));
            return ProviderResult::failed(session_id, "Failed to start verification");
        }
        if let Err(e) = self.host.activate_trigger() {
            warn!(error = %e, "Trigger activation failed, waiting for provider anyway");
        }
        info!(session_id = %session_id, "Verification started");

        self.await_outcome(session_id, &mut events, &mut active_rx)
            .await
    }

    fn cleanup(&self) {
        let active = self.active().take();
        self.active_tx.send_replace(None);

        self.host.remove_container();
        for frame in self.host.frames() {
            match frame.handle {
                Some(handle) if frame.src_matches(&self.config.frame_pattern) => {
                    self.host.remove_node(handle);
                }
                _ => {}
            }
        }
        for node in self.host.provider_nodes() {
            if node.looks_like_overlay() {
                self.host.remove_node(node.handle);
            }
        }

        if let Some(active) = active {
            self.host.set_body_style(&active.snapshot);
            debug!(session_id = %active.session_id, "Provider UI cleaned up");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::super::host::{ComputedStyle, FrameNode, HostError, HostNode, NodeHandle, Position};
    use super::super::{EndReason, ProviderStatus};
    use super::*;

    #[derive(Default)]
    struct FakeState {
        script_present: bool,
        fail_load: bool,
        injections: usize,
        style: BodyStyle,
        container: bool,
        trigger: Option<TriggerSpec>,
        nodes: Vec<HostNode>,
        frames: Vec<FrameNode>,
        fail_mount: bool,
        fail_activate: bool,
        show_overlay: bool,
        on_activate: Option<ProviderEvent>,
        sink: Option<mpsc::UnboundedSender<ProviderEvent>>,
    }

    #[derive(Default)]
    struct FakeHost {
        state: Mutex<FakeState>,
    }

    impl FakeHost {
        fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }

        fn dismiss(&self) {
            self.with(|s| {
                s.nodes.clear();
                s.frames.clear();
            });
        }
    }

    #[async_trait]
    impl ProviderHost for FakeHost {
        fn has_script(&self, _src: &str) -> bool {
            self.with(|s| s.script_present)
        }

        async fn load_script(&self, _src: &str) -> Result<(), HostError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.with(|s| {
                s.injections += 1;
                if s.fail_load {
                    Err(HostError("network error".into()))
                } else {
                    s.script_present = true;
                    Ok(())
                }
            })
        }

        fn body_style(&self) -> BodyStyle {
            self.with(|s| s.style.clone())
        }

        fn set_body_style(&self, style: &BodyStyle) {
            self.with(|s| s.style = style.clone());
        }

        fn mount_trigger(&self, trigger: &TriggerSpec) -> Result<(), HostError> {
            self.with(|s| {
                if s.fail_mount {
                    return Err(HostError("no document body".into()));
                }
                s.container = true;
                s.trigger = Some(trigger.clone());
                Ok(())
            })
        }

        fn activate_trigger(&self) -> Result<(), HostError> {
            self.with(|s| {
                if s.show_overlay {
                    s.nodes.push(HostNode {
                        handle: NodeHandle(7),
                        id: "mati-frame-wrapper".into(),
                        style: ComputedStyle {
                            position: Position::Fixed,
                            z_index: 10_000,
                            ..ComputedStyle::default()
                        },
                        inside_container: false,
                    });
                    s.frames.push(FrameNode {
                        handle: Some(NodeHandle(8)),
                        src: "https://signup.getmati.com/flow".into(),
                        ..FrameNode::default()
                    });
                }
                if let (Some(event), Some(sink)) = (s.on_activate.take(), &s.sink) {
                    sink.send(event).unwrap();
                }
                if s.fail_activate {
                    Err(HostError("click blocked".into()))
                } else {
                    Ok(())
                }
            })
        }

        fn has_container(&self) -> bool {
            self.with(|s| s.container)
        }

        fn remove_container(&self) {
            self.with(|s| {
                s.container = false;
                s.trigger = None;
            });
        }

        fn provider_nodes(&self) -> Vec<HostNode> {
            self.with(|s| s.nodes.clone())
        }

        fn frames(&self) -> Vec<FrameNode> {
            self.with(|s| s.frames.clone())
        }

        fn remove_node(&self, handle: NodeHandle) {
            self.with(|s| {
                s.nodes.retain(|n| n.handle != handle);
                s.frames.retain(|f| f.handle != Some(handle));
            });
        }
    }

    fn original_style() -> BodyStyle {
        BodyStyle {
            body_overflow: "auto".into(),
            body_position: "static".into(),
            html_overflow: "scroll".into(),
        }
    }

    fn setup(configure: impl FnOnce(&mut FakeState)) -> (Arc<FakeHost>, Arc<WidgetProvider>) {
        let host = Arc::new(FakeHost::default());
        host.with(|s| {
            s.style = original_style();
            configure(s);
        });
        let provider = Arc::new(WidgetProvider::new(
            host.clone(),
            ProviderConfig::new("client", "citizen-flow", "passport-flow"),
        ));
        host.with(|s| s.sink = Some(provider.event_sink()));
        (host, provider)
    }

    fn finished(verification_id: &str) -> ProviderEvent {
        ProviderEvent::Finished {
            session_id: None,
            verification_id: Some(verification_id.into()),
            identity_id: Some("ident".into()),
            detail: json!({ "verificationId": verification_id }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_is_idempotent() {
        let (host, provider) = setup(|_| {});
        let (a, b) = tokio::join!(provider.load(), provider.load());
        a.unwrap();
        b.unwrap();
        provider.load().await.unwrap();
        assert!(provider.is_ready());
        assert_eq!(host.with(|s| s.injections), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_skips_present_script() {
        let (host, provider) = setup(|s| s.script_present = true);
        provider.load().await.unwrap();
        assert_eq!(host.with(|s| s.injections), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_recorded_and_retryable() {
        let (host, provider) = setup(|s| s.fail_load = true);
        assert!(provider.load().await.is_err());
        assert!(!provider.is_ready());
        assert_eq!(
            provider.last_error().as_deref(),
            Some("Failed to load verification SDK")
        );

        let result = provider
            .start_verification(DocumentType::Omang, Metadata::new())
            .await;
        assert_eq!(result.status, ProviderStatus::Failed);

        host.with(|s| s.fail_load = false);
        provider.load().await.unwrap();
        assert!(provider.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_event_resolves_success() {
        let (host, provider) = setup(|s| {
            s.show_overlay = true;
            s.on_activate = Some(finished("ver-1"));
        });
        provider.load().await.unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("requestId".into(), "r-1".into());
        let result = provider
            .start_verification(DocumentType::Passport, metadata)
            .await;

        assert_eq!(result.status, ProviderStatus::Success);
        assert_eq!(result.ended_by, Some(EndReason::Finished));
        assert_eq!(result.verification_id.as_deref(), Some("ver-1"));
        assert_eq!(result.identity_id.as_deref(), Some("ident"));

        host.with(|s| {
            assert_eq!(s.style, original_style());
            assert!(!s.container);
            assert!(s.nodes.is_empty());
            assert!(s.frames.is_empty());
        });
        assert!(provider.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_carries_flow_and_metadata() {
        let (host, provider) = setup(|_| {});
        provider.load().await.unwrap();

        let task = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Passport, Metadata::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let trigger = host.with(|s| s.trigger.clone()).unwrap();
        assert_eq!(trigger.flow_id, "passport-flow");
        assert!(trigger.nopersist);
        let metadata: serde_json::Value = serde_json::from_str(&trigger.metadata).unwrap();
        assert_eq!(metadata["documentType"], "passport");
        assert_eq!(
            metadata["sessionId"],
            provider.active_session().unwrap().to_string()
        );
        assert_eq!(host.with(|s| s.style.body_overflow.clone()), "hidden");

        provider.event_sink().send(finished("ver-2")).unwrap();
        assert!(task.await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_event_resolves_cancelled() {
        let (_, provider) = setup(|s| {
            s.on_activate = Some(ProviderEvent::Exited {
                session_id: None,
                detail: serde_json::Value::Null,
            });
        });
        provider.load().await.unwrap();
        let result = provider
            .start_verification(DocumentType::Omang, Metadata::new())
            .await;
        assert_eq!(result.status, ProviderStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_other_sessions_are_ignored() {
        let (_, provider) = setup(|s| {
            s.on_activate = Some(ProviderEvent::Exited {
                session_id: Some(SessionId::generate().to_string()),
                detail: serde_json::Value::Null,
            });
        });
        provider.load().await.unwrap();

        let task = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Omang, Metadata::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        provider.event_sink().send(finished("ver-3")).unwrap();
        assert_eq!(
            task.await.unwrap().verification_id.as_deref(),
            Some("ver-3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_resolves_when_ui_disappears() {
        let (host, provider) = setup(|s| s.show_overlay = true);
        provider.load().await.unwrap();

        let task = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Omang, Metadata::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!task.is_finished());

        host.dismiss();
        let result = task.await.unwrap();
        assert_eq!(result.status, ProviderStatus::Success);
        assert_eq!(result.ended_by, Some(EndReason::Dismissed));
        assert_eq!(host.with(|s| s.style.clone()), original_style());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ceiling() {
        let (host, provider) = setup(|s| s.show_overlay = true);
        provider.load().await.unwrap();

        let result = provider
            .start_verification(DocumentType::Omang, Metadata::new())
            .await;
        assert_eq!(result.status, ProviderStatus::Success);
        assert_eq!(result.ended_by, Some(EndReason::Ceiling));
        host.with(|s| {
            assert!(s.nodes.is_empty());
            assert!(!s.container);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_failure_is_swallowed() {
        let (_, provider) = setup(|s| {
            s.fail_activate = true;
            s.on_activate = Some(finished("ver-4"));
        });
        provider.load().await.unwrap();
        let result = provider
            .start_verification(DocumentType::Omang, Metadata::new())
            .await;
        assert_eq!(result.status, ProviderStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_failure_fails_and_restores() {
        let (host, provider) = setup(|s| s.fail_mount = true);
        provider.load().await.unwrap();
        let result = provider
            .start_verification(DocumentType::Omang, Metadata::new())
            .await;
        assert_eq!(result.status, ProviderStatus::Failed);
        assert_eq!(
            provider.last_error().as_deref(),
            Some("Failed to start verification")
        );
        assert_eq!(host.with(|s| s.style.clone()), original_style());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_and_is_idempotent() {
        let (host, provider) = setup(|s| s.show_overlay = true);
        provider.load().await.unwrap();

        let task = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Omang, Metadata::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        provider.cleanup();
        provider.cleanup();
        assert_eq!(task.await.unwrap().status, ProviderStatus::Cancelled);

        host.with(|s| s.style.body_overflow = "visible".into());
        provider.cleanup();
        // No active session, so styles are left alone.
        assert_eq!(host.with(|s| s.style.body_overflow.clone()), "visible");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_start_supersedes_previous() {
        let (_, provider) = setup(|s| s.show_overlay = true);
        provider.load().await.unwrap();

        let first = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Omang, Metadata::new())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = tokio::spawn({
            let provider = provider.clone();
            async move {
                provider
                    .start_verification(DocumentType::Passport, Metadata::new())
                    .await
            }
        });
        assert_eq!(first.await.unwrap().status, ProviderStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(100)).await;
        provider.event_sink().send(finished("ver-5")).unwrap();
        assert!(second.await.unwrap().is_success());
    }
}
