//! Integration tests for the SIM portal.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p sim-portal-integration-tests
//! ```
//!
//! Everything runs in process: [`MockBackend`] serves the portal API with
//! axum on a loopback port, and [`ScriptedHost`] plays the provider widget.
//!
//! # Test Categories
//!
//! - `esim_purchase` - eSIM purchase end to end, provider race outcomes
//! - `sim_swap` - SIM swap with and without OTP
//! - `kyc_compliance` - Subscriber eligibility and completion
//! - `admin_session` - Admin sign-in, 401 handling, subscriber upload

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use sim_portal::Portal;
use sim_portal::config::{EngineConfig, PortalConfig, ProviderConfig};
use sim_portal::notify::{Notice, NoticeLevel, Notifier};
use sim_portal::provider::{
    BodyStyle, ComputedStyle, FrameNode, HostError, HostNode, NodeHandle, Position,
    ProviderEvent, ProviderHost, TriggerSpec, WidgetProvider,
};
use sim_portal_core::RegistrationDetails;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Password the mock backend accepts for any admin.
pub const ADMIN_PASSWORD: &str = "correct horse";

/// One request received by the mock backend.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Value,
    pub bearer: Option<String>,
}

/// Scripted behavior and recorded traffic of the mock backend.
#[derive(Debug)]
pub struct BackendState {
    pub calls: Vec<Call>,
    pub next_request: u64,
    /// Status payloads served in order; `fallback_status` once empty.
    pub statuses: VecDeque<Value>,
    pub fallback_status: Value,
    /// Request sub-paths (e.g. `otp/verify`) that answer 422.
    pub failing: Vec<String>,
    pub subscribers: HashSet<String>,
    pub numbers: Vec<String>,
    /// Token issued at login; `None` after revocation.
    pub admin_token: Option<String>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            next_request: 0,
            statuses: VecDeque::new(),
            fallback_status: json!({ "kyc_status": "pending" }),
            failing: Vec::new(),
            subscribers: HashSet::new(),
            numbers: vec!["71230001".into(), "71230002".into()],
            admin_token: None,
        }
    }
}

type Shared = Arc<Mutex<BackendState>>;

/// In-process portal backend.
#[derive(Clone)]
pub struct MockBackend {
    state: Shared,
    addr: SocketAddr,
}

impl MockBackend {
    /// Bind a loopback port and start serving.
    pub async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/api/admin/login", post(admin_login))
            .route("/api/admin/dashboard", get(admin_read))
            .route("/api/admin/users", get(admin_read).post(admin_create_user))
            .route("/api/admin/payments", get(admin_read))
            .route("/api/subscriber-lookup", post(subscriber_lookup))
            .route("/api/subscriber-upload", post(subscriber_upload))
            .route("/api/payments/record", post(record_payment))
            .fallback(request_resource)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { state, addr }
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    /// Queue status payloads for the next polls.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = Value>) {
        self.state().statuses.extend(statuses);
    }

    pub fn fail(&self, step: &str) {
        self.state().failing.push(step.to_owned());
    }

    /// Paths of every call so far, as `METHOD /path`.
    pub fn calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }

    /// Body of the last call to `path`.
    pub fn body_of(&self, path: &str) -> Option<Value> {
        self.state()
            .calls
            .iter()
            .rev()
            .find(|c| c.path == path)
            .map(|c| c.body.clone())
    }

    /// Configuration pointing at this backend, with timings shortened for
    /// tests.
    pub fn config(&self) -> PortalConfig {
        let mut config = PortalConfig::new(self.base_url());
        config.api.timeout = Duration::from_secs(5);
        config.payment_delay = Duration::from_millis(10);
        config.engine = EngineConfig {
            poll_interval: Duration::from_millis(50),
            countdown_interval: Duration::from_millis(10),
            window: Duration::from_secs(3),
        };
        config.provider = ProviderConfig {
            watchdog_interval: Duration::from_millis(20),
            max_session: Duration::from_secs(2),
            ..ProviderConfig::new("client-1", "flow-citizen", "flow-visitor")
        };
        config
    }
}

fn record(state: &Shared, method: Method, path: &str, headers: &HeaderMap, body: Value) {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned);
    state.lock().unwrap().calls.push(Call {
        method,
        path: path.to_owned(),
        body,
        bearer,
    });
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn parse_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// `/api/{flow}/start` and `/api/{flow}/{id}/...`.
async fn request_resource(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_owned();
    record(&state, method.clone(), &path, &headers, parse_body(&body));

    let segments: Vec<&str> = path
        .trim_start_matches("/api/")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let mut state = state.lock().unwrap();

    match (method.as_str(), segments.as_slice()) {
        ("POST", [_, "start"]) => {
            state.next_request += 1;
            Json(json!({ "data": { "request_id": state.next_request } })).into_response()
        }
        ("GET", [_, _, "numbers"]) => {
            Json(json!({ "numbers": state.numbers })).into_response()
        }
        ("GET", [_, _, "status"] | [_, _, "kyc", "status"]) => {
            let status = state
                .statuses
                .pop_front()
                .unwrap_or_else(|| state.fallback_status.clone());
            Json(status).into_response()
        }
        ("POST", [_, _, rest @ ..]) if !rest.is_empty() => {
            let step = rest.join("/");
            if state.failing.contains(&step) {
                error(StatusCode::UNPROCESSABLE_ENTITY, &format!("{step} rejected"))
            } else {
                Json(json!({ "success": true })).into_response()
            }
        }
        _ => error(StatusCode::NOT_FOUND, "Not found"),
    }
}

async fn subscriber_lookup(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, Method::POST, "/api/subscriber-lookup", &headers, body.clone());
    let msisdn = body.get("msisdn").and_then(Value::as_str).unwrap_or_default();
    let exists = state.lock().unwrap().subscribers.contains(msisdn);
    Json(json!({ "exists": exists })).into_response()
}

async fn subscriber_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, Method::POST, "/api/subscriber-upload", &headers, body.clone());
    let numbers: Vec<String> = body
        .get("phoneNumbers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let mut state = state.lock().unwrap();
    let inserted = numbers
        .into_iter()
        .filter(|n| state.subscribers.insert(n.clone()))
        .count();
    Json(json!({ "inserted": inserted })).into_response()
}

async fn record_payment(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, Method::POST, "/api/payments/record", &headers, body);
    if state.lock().unwrap().failing.iter().any(|s| s == "payments/record") {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable");
    }
    Json(json!({ "success": true })).into_response()
}

async fn admin_login(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let email = body
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();
    let accepted = password == ADMIN_PASSWORD;
    record(
        &state,
        Method::POST,
        "/api/admin/login",
        &headers,
        json!({ "email": email }),
    );
    if !accepted {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    let token = format!("tok-{}", uuid::Uuid::new_v4());
    state.lock().unwrap().admin_token = Some(token.clone());
    Json(json!({
        "access_token": token,
        "user": { "email": email, "name": "Operations" }
    }))
    .into_response()
}

fn authorized(state: &Shared, headers: &HeaderMap) -> bool {
    let expected = state.lock().unwrap().admin_token.clone();
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    matches!((expected.as_deref(), presented), (Some(e), Some(p)) if e == p)
}

async fn admin_read(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, method, uri.path(), &headers, Value::Null);
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthenticated");
    }
    match uri.path() {
        "/api/admin/dashboard" => Json(json!({
            "total_payments": 3,
            "pending_kyc": 1
        }))
        .into_response(),
        "/api/admin/payments" => Json(json!({
            "data": [],
            "query": uri.query().unwrap_or_default()
        }))
        .into_response(),
        _ => Json(json!({ "data": [{ "email": "ops@example.com" }] })).into_response(),
    }
}

async fn admin_create_user(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, Method::POST, "/api/admin/users", &headers, body.clone());
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthenticated");
    }
    (StatusCode::CREATED, Json(json!({ "email": body["email"] }))).into_response()
}

/// What the scripted widget does once the trigger is clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Show the overlay and report completion.
    Finish,
    /// Show the overlay and report that the user closed it.
    Exit,
    /// Never show any UI and never report anything.
    Dismiss,
    /// Show the overlay and stay silent.
    Hang,
}

#[derive(Debug)]
struct HostState {
    script: Script,
    script_present: bool,
    script_loads: usize,
    style: BodyStyle,
    container: bool,
    trigger: Option<TriggerSpec>,
    nodes: Vec<HostNode>,
    frames: Vec<FrameNode>,
    sink: Option<UnboundedSender<ProviderEvent>>,
}

/// Provider host that plays a scripted widget.
#[derive(Debug)]
pub struct ScriptedHost {
    state: Mutex<HostState>,
}

impl ScriptedHost {
    pub fn new(script: Script) -> Self {
        Self {
            state: Mutex::new(HostState {
                script,
                script_present: false,
                script_loads: 0,
                style: BodyStyle {
                    body_overflow: "auto".into(),
                    body_position: "static".into(),
                    html_overflow: String::new(),
                },
                container: false,
                trigger: None,
                nodes: Vec::new(),
                frames: Vec::new(),
                sink: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Deliver widget events to `sink`.
    pub fn connect(&self, sink: UnboundedSender<ProviderEvent>) {
        self.lock().sink = Some(sink);
    }

    pub fn set_script(&self, script: Script) {
        self.lock().script = script;
    }

    pub fn current_style(&self) -> BodyStyle {
        self.lock().style.clone()
    }

    pub fn script_loads(&self) -> usize {
        self.lock().script_loads
    }

    /// Last trigger mounted.
    pub fn trigger(&self) -> Option<TriggerSpec> {
        self.lock().trigger.clone()
    }

    /// Whether no container, overlay or frame is left behind.
    pub fn is_clean(&self) -> bool {
        let state = self.lock();
        !state.container && state.nodes.is_empty() && state.frames.is_empty()
    }
}

#[async_trait]
impl ProviderHost for ScriptedHost {
    fn has_script(&self, _src: &str) -> bool {
        self.lock().script_present
    }

    async fn load_script(&self, _src: &str) -> Result<(), HostError> {
        let mut state = self.lock();
        state.script_loads += 1;
        state.script_present = true;
        Ok(())
    }

    fn body_style(&self) -> BodyStyle {
        self.lock().style.clone()
    }

    fn set_body_style(&self, style: &BodyStyle) {
        self.lock().style = style.clone();
    }

    fn mount_trigger(&self, trigger: &TriggerSpec) -> Result<(), HostError> {
        let mut state = self.lock();
        state.container = true;
        state.trigger = Some(trigger.clone());
        Ok(())
    }

    fn activate_trigger(&self) -> Result<(), HostError> {
        let mut state = self.lock();
        if state.script != Script::Dismiss {
            state.nodes.push(HostNode {
                handle: NodeHandle(1),
                id: "mati-frame-wrapper".into(),
                style: ComputedStyle {
                    position: Position::Fixed,
                    z_index: 9999,
                    ..ComputedStyle::default()
                },
                inside_container: false,
            });
            state.frames.push(FrameNode {
                handle: Some(NodeHandle(2)),
                src: "https://signup.getmati.com/?flowId=flow-citizen".into(),
                title: "MetaMap".into(),
                ..FrameNode::default()
            });
        }

        let session_id = state
            .trigger
            .as_ref()
            .and_then(|t| serde_json::from_str::<Value>(&t.metadata).ok())
            .and_then(|m| m.get("sessionId").cloned())
            .unwrap_or(Value::Null);
        let event = match state.script {
            Script::Finish => ProviderEvent::from_dom(
                "metamap:userFinishedSdk",
                json!({
                    "sessionId": session_id,
                    "verificationId": "ver-123",
                    "identityId": "ident-456"
                }),
            ),
            Script::Exit => ProviderEvent::from_dom(
                "mati:exitedSdk",
                json!({ "sessionId": session_id }),
            ),
            Script::Dismiss | Script::Hang => None,
        };
        if let (Some(event), Some(sink)) = (event, &state.sink) {
            let _ = sink.send(event);
        }
        Ok(())
    }

    fn has_container(&self) -> bool {
        self.lock().container
    }

    fn remove_container(&self) {
        self.lock().container = false;
    }

    fn provider_nodes(&self) -> Vec<HostNode> {
        self.lock().nodes.clone()
    }

    fn frames(&self) -> Vec<FrameNode> {
        self.lock().frames.clone()
    }

    fn remove_node(&self, handle: NodeHandle) {
        let mut state = self.lock();
        state.nodes.retain(|n| n.handle != handle);
        state.frames.retain(|f| f.handle != Some(handle));
    }
}

/// Collects every notice.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.level == level)
            .map(|n| n.message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// A registration form that passes validation.
pub fn registration() -> RegistrationDetails {
    RegistrationDetails {
        plot_number: "1234".into(),
        ward: "Ward 5".into(),
        village: "Mogoditshane".into(),
        city: "Gaborone".into(),
        postal_address: "P.O. Box 100".into(),
        next_of_kin_name: "Neo Kgosi".into(),
        next_of_kin_relation: "sibling".into(),
        next_of_kin_phone: "71234567".into(),
        email: "neo@example.com".into(),
    }
}

/// A verified status payload carrying an identity record.
pub fn verified_status() -> Value {
    json!({
        "kyc_status": "verified",
        "data": {
            "full_name": "Neo Kgosi",
            "document_number": "123456789",
            "date_of_birth": "1990-04-12",
            "document_type": "omang"
        }
    })
}

/// A portal wired to a mock backend and a scripted widget.
pub struct Harness {
    pub backend: MockBackend,
    pub host: Arc<ScriptedHost>,
    pub provider: Arc<WidgetProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub portal: Portal,
}

impl Harness {
    pub async fn start(script: Script) -> Self {
        let backend = MockBackend::start().await;
        Self::with_config(backend.clone(), backend.config(), script)
    }

    pub fn with_config(backend: MockBackend, config: PortalConfig, script: Script) -> Self {
        let host = Arc::new(ScriptedHost::new(script));
        let provider = Arc::new(WidgetProvider::new(host.clone(), config.provider.clone()));
        host.connect(provider.event_sink());
        let notifier = Arc::new(RecordingNotifier::default());
        let portal = Portal::new(config, provider.clone(), notifier.clone()).unwrap();
        Self {
            backend,
            host,
            provider,
            notifier,
            portal,
        }
    }
}
